//! Core types shared by the entities, the loopback substrate and the drain.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Highest domain id that maps onto valid transport ports.
pub const MAX_DOMAIN_ID: u32 = 232;

/// Numeric identifier of a pub/sub domain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DomainId(pub u32);

impl fmt::Debug for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainId({})", self.0)
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a data instance or an endpoint (16-byte key hash).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
    /// Derive the handle from serialized key bytes.
    pub fn from_key(key: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(key);
        let digest = hasher.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        InstanceHandle(out)
    }

    /// Handle for an endpoint, derived from its numeric id.
    pub fn from_entity_id(kind: &str, id: u64) -> Self {
        let mut key = kind.as_bytes().to_vec();
        key.extend_from_slice(&id.to_be_bytes());
        Self::from_key(&key)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceHandle({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Per-writer sequence number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SequenceNumber(pub u64);

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SN({})", self.0)
    }
}

impl SequenceNumber {
    pub fn next(self) -> Self {
        SequenceNumber(self.0 + 1)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Lifecycle state of a data instance as seen by a reader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceState::Alive => "ALIVE",
            InstanceState::NotAliveDisposed => "NOT_ALIVE_DISPOSED",
            InstanceState::NotAliveNoWriters => "NOT_ALIVE_NO_WRITERS",
        };
        f.write_str(name)
    }
}

/// Whether the reader saw this instance before the sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewState {
    New,
    NotNew,
}

/// Metadata that accompanies every taken sample.
#[derive(Clone, Debug)]
pub struct SampleInfo {
    /// False for state-transition records that carry no payload.
    pub valid_data: bool,
    pub instance_state: InstanceState,
    pub view_state: ViewState,
    pub instance_handle: InstanceHandle,
    pub publication_handle: InstanceHandle,
    pub sequence_number: SequenceNumber,
    pub source_timestamp: Timestamp,
    pub reception_timestamp: Timestamp,
}

/// A received sample: metadata plus a payload present only when valid.
#[derive(Clone, Debug)]
pub struct Sample<T> {
    info: SampleInfo,
    data: Option<T>,
}

impl<T> Sample<T> {
    pub(crate) fn new(info: SampleInfo, data: Option<T>) -> Self {
        Self { info, data }
    }

    pub fn info(&self) -> &SampleInfo {
        &self.info
    }

    /// Payload, `None` for state-transition samples.
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.info.valid_data
    }
}

/// Kind of a filterable field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Numeric,
    Text,
    Boolean,
}

/// Value of a field extracted from a payload.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Numeric(f64),
    Text(String),
    Boolean(bool),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Numeric(_) => FieldKind::Numeric,
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Boolean(_) => FieldKind::Boolean,
        }
    }
}

/// Filterable fields of a data type, addressed by dotted path.
#[derive(Clone, Debug, Default)]
pub struct TypeSchema {
    fields: Vec<(String, FieldKind)>,
}

impl TypeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, path: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push((path.into(), kind));
        self
    }

    /// Look up the kind of a field path.
    pub fn kind_of(&self, path: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, kind)| *kind)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldKind)> {
        self.fields.iter().map(|(name, kind)| (name.as_str(), *kind))
    }
}

/// A data type that can be carried on a topic.
///
/// Implemented by the externally defined record types. The schema lists the
/// fields a content filter may reference, and `field` extracts them from a
/// payload.
pub trait TopicType: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Registered type name; a topic only matches writers of the same type.
    const TYPE_NAME: &'static str;

    fn schema() -> TypeSchema;

    fn field(&self, path: &str) -> Option<FieldValue>;

    /// Serialized key fields. Keyless types use a single instance.
    fn key(&self) -> Vec<u8> {
        Vec::new()
    }

    fn instance_handle(&self) -> InstanceHandle {
        InstanceHandle::from_key(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_handle_is_stable() {
        let a = InstanceHandle::from_key(b"robot-1");
        let b = InstanceHandle::from_key(b"robot-1");
        let c = InstanceHandle::from_key(b"robot-2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_hex().len(), 32);
    }

    #[test]
    fn test_schema_lookup() {
        let schema = TypeSchema::new()
            .field("position.x", FieldKind::Numeric)
            .field("name", FieldKind::Text);
        assert_eq!(schema.kind_of("position.x"), Some(FieldKind::Numeric));
        assert_eq!(schema.kind_of("name"), Some(FieldKind::Text));
        assert_eq!(schema.kind_of("position.w"), None);
    }

    #[test]
    fn test_instance_state_display() {
        assert_eq!(InstanceState::NotAliveDisposed.to_string(), "NOT_ALIVE_DISPOSED");
    }
}
