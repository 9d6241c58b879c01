//! Frame codec for changes travelling through the loopback transport.
//!
//! Frame layout: `len: u32 LE | MessagePack change | crc32: u32 LE`.

use crate::error::{Result, SubscriberError};
use crate::types::{InstanceHandle, SequenceNumber, Timestamp};
use serde::{Deserialize, Serialize};

const HEADER_LEN: usize = 4;
const CHECKSUM_LEN: usize = 4;

/// What a change does to its instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ChangeKind {
    Alive,
    Disposed,
    Unregistered,
}

/// One change sent by a writer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CacheChange {
    pub kind: ChangeKind,
    pub writer: [u8; 16],
    pub instance: [u8; 16],
    pub sequence: SequenceNumber,
    pub source_timestamp: Timestamp,
    /// Encoded sample; for non-alive changes, the sample carrying the key.
    pub payload: Vec<u8>,
}

impl CacheChange {
    pub fn writer_handle(&self) -> InstanceHandle {
        InstanceHandle(self.writer)
    }

    pub fn instance_handle(&self) -> InstanceHandle {
        InstanceHandle(self.instance)
    }
}

pub(crate) fn encode_payload<T: Serialize>(sample: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(sample)?)
}

pub(crate) fn decode_payload<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

pub(crate) fn encode_frame(change: &CacheChange) -> Result<Vec<u8>> {
    let encoded = rmp_serde::to_vec(change)?;

    let mut frame = Vec::with_capacity(HEADER_LEN + encoded.len() + CHECKSUM_LEN);
    frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    frame.extend_from_slice(&encoded);
    frame.extend_from_slice(&crc32fast::hash(&encoded).to_le_bytes());
    Ok(frame)
}

pub(crate) fn decode_frame(frame: &[u8]) -> Result<CacheChange> {
    if frame.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(SubscriberError::Corruption(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }

    let mut len_bytes = [0u8; HEADER_LEN];
    len_bytes.copy_from_slice(&frame[..HEADER_LEN]);
    let len = u32::from_le_bytes(len_bytes) as usize;
    if frame.len() != HEADER_LEN + len + CHECKSUM_LEN {
        return Err(SubscriberError::Corruption(format!(
            "frame length {} does not match header {}",
            frame.len(),
            len
        )));
    }

    let encoded = &frame[HEADER_LEN..HEADER_LEN + len];
    let mut crc_bytes = [0u8; CHECKSUM_LEN];
    crc_bytes.copy_from_slice(&frame[HEADER_LEN + len..]);
    let expected = u32::from_le_bytes(crc_bytes);
    let got = crc32fast::hash(encoded);
    if expected != got {
        return Err(SubscriberError::Corruption(format!(
            "frame checksum mismatch: expected {:08x}, got {:08x}",
            expected, got
        )));
    }

    Ok(rmp_serde::from_slice(encoded)?)
}
