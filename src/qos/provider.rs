//! QoS profile documents and their resolution into typed QoS bundles.

use super::policy::{
    DataReaderQos, Deadline, DomainParticipantQos, Durability, History, Reliability,
    ResourceLimits, SubscriberQos, TopicQos,
};
use crate::error::{Result, SubscriberError};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

const FILE_SCHEME: &str = "file://";
const INLINE_SCHEME: &str = "str://";

/// Resolved QoS for every entity kind of one profile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QosBundle {
    /// `library::profile` this bundle was resolved from.
    pub name: String,
    pub participant: DomainParticipantQos,
    pub topic: TopicQos,
    pub subscriber: SubscriberQos,
    pub reader: DataReaderQos,
}

/// A `library::profile` identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProfileName {
    pub library: String,
    pub profile: String,
}

impl ProfileName {
    pub fn parse(qualified: &str) -> Option<Self> {
        let (library, profile) = qualified.split_once("::")?;
        if library.is_empty() || profile.is_empty() || profile.contains("::") {
            return None;
        }
        Some(Self {
            library: library.to_string(),
            profile: profile.to_string(),
        })
    }

    fn qualified(&self) -> String {
        format!("{}::{}", self.library, self.profile)
    }
}

// --- Document model ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QosDocument {
    #[serde(default)]
    qos_library: Vec<LibraryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LibraryEntry {
    name: String,
    #[serde(default)]
    qos_profile: Vec<ProfileEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileEntry {
    name: String,
    base_name: Option<String>,
    participant_qos: Option<ParticipantSection>,
    topic_qos: Option<TopicSection>,
    subscriber_qos: Option<SubscriberSection>,
    datareader_qos: Option<ReaderSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ParticipantSection {
    entity_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TopicSection {
    durability: Option<Durability>,
    reliability: Option<Reliability>,
    history: Option<History>,
    deadline: Option<Deadline>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SubscriberSection {
    partition: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ReaderSection {
    durability: Option<Durability>,
    reliability: Option<Reliability>,
    history: Option<History>,
    resource_limits: Option<ResourceLimitsSection>,
    deadline: Option<Deadline>,
}

/// Limits a profile sets; absent fields keep the inherited value.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ResourceLimitsSection {
    max_samples: Option<u32>,
    max_instances: Option<u32>,
    max_samples_per_instance: Option<u32>,
}

impl ResourceLimitsSection {
    fn apply(&self, limits: &mut ResourceLimits) {
        if self.max_samples.is_some() {
            limits.max_samples = self.max_samples;
        }
        if self.max_instances.is_some() {
            limits.max_instances = self.max_instances;
        }
        if self.max_samples_per_instance.is_some() {
            limits.max_samples_per_instance = self.max_samples_per_instance;
        }
    }
}

impl ProfileEntry {
    /// Overlay the sections this profile declares onto `bundle`.
    fn apply(&self, bundle: &mut QosBundle) {
        if let Some(section) = &self.participant_qos {
            if let Some(name) = &section.entity_name {
                bundle.participant.entity_name = Some(name.clone());
            }
        }

        if let Some(section) = &self.topic_qos {
            let topic = &mut bundle.topic;
            overlay(&mut topic.durability, section.durability);
            overlay(&mut topic.reliability, section.reliability);
            overlay(&mut topic.history, section.history);
            overlay(&mut topic.deadline, section.deadline);
        }

        if let Some(section) = &self.subscriber_qos {
            if let Some(partition) = &section.partition {
                bundle.subscriber.partition = partition.clone();
            }
        }

        if let Some(section) = &self.datareader_qos {
            let reader = &mut bundle.reader;
            overlay(&mut reader.durability, section.durability);
            overlay(&mut reader.reliability, section.reliability);
            overlay(&mut reader.history, section.history);
            if let Some(limits) = &section.resource_limits {
                limits.apply(&mut reader.resource_limits);
            }
            overlay(&mut reader.deadline, section.deadline);
        }
    }
}

fn overlay<T: Copy>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl QosDocument {
    fn find(&self, name: &ProfileName) -> Option<&ProfileEntry> {
        self.qos_library
            .iter()
            .find(|lib| lib.name == name.library)?
            .qos_profile
            .iter()
            .find(|p| p.name == name.profile)
    }

    /// Resolve a profile and its base chain. Errors are plain reasons.
    fn resolve(
        &self,
        name: &ProfileName,
        chain: &mut Vec<ProfileName>,
    ) -> std::result::Result<QosBundle, String> {
        if chain.contains(name) {
            return Err(format!(
                "profile inheritance cycle through {}",
                name.qualified()
            ));
        }

        let entry = self
            .find(name)
            .ok_or_else(|| format!("unknown profile {}", name.qualified()))?;

        chain.push(name.clone());
        let mut bundle = match &entry.base_name {
            Some(base) => {
                let base_name = ProfileName::parse(base).unwrap_or_else(|| ProfileName {
                    library: name.library.clone(),
                    profile: base.clone(),
                });
                self.resolve(&base_name, chain)?
            }
            None => QosBundle::default(),
        };
        chain.pop();

        entry.apply(&mut bundle);
        bundle.name = name.qualified();
        Ok(bundle)
    }
}

fn load_document(source_uri: &str) -> std::result::Result<QosDocument, String> {
    let text = if let Some(inline) = source_uri.strip_prefix(INLINE_SCHEME) {
        inline.to_string()
    } else {
        let path = match source_uri.strip_prefix(FILE_SCHEME) {
            Some(path) => path,
            None if source_uri.contains("://") => {
                return Err("unsupported URI scheme".to_string());
            }
            None => source_uri,
        };
        fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path, e))?
    };

    serde_json::from_str(&text).map_err(|e| format!("malformed profile document: {}", e))
}

/// Loads profile documents and caches the resolved bundles.
pub struct QosProvider {
    cache: Mutex<HashMap<(String, ProfileName), Arc<QosBundle>>>,
}

impl QosProvider {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Provider whose cache lives for the whole process.
    pub fn global() -> &'static QosProvider {
        static GLOBAL: OnceLock<QosProvider> = OnceLock::new();
        GLOBAL.get_or_init(QosProvider::new)
    }

    /// Resolve `library::profile` from the document at `source_uri`.
    ///
    /// The first successful resolution is cached; later calls for the same
    /// pair return the same bundle without touching the source again.
    pub fn resolve(&self, source_uri: &str, profile: &str) -> Result<Arc<QosBundle>> {
        let name = ProfileName::parse(profile).ok_or_else(|| {
            SubscriberError::configuration(
                source_uri,
                profile,
                "profile must be written as <library>::<profile>",
            )
        })?;
        let key = (source_uri.to_string(), name);

        if let Some(bundle) = self.cache.lock().get(&key) {
            debug!(uri = source_uri, profile, "QoS profile served from cache");
            return Ok(Arc::clone(bundle));
        }

        let document = load_document(source_uri)
            .map_err(|reason| SubscriberError::configuration(source_uri, profile, reason))?;
        let bundle = document
            .resolve(&key.1, &mut Vec::new())
            .map_err(|reason| SubscriberError::configuration(source_uri, profile, reason))?;
        bundle
            .reader
            .validate()
            .map_err(|e| SubscriberError::configuration(source_uri, profile, e.to_string()))?;

        info!(uri = source_uri, profile, "Resolved QoS profile");
        let bundle = Arc::new(bundle);
        let mut cache = self.cache.lock();
        let entry = cache.entry(key).or_insert(bundle);
        Ok(Arc::clone(entry))
    }

    pub fn cached_profiles(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Default for QosProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve through the process-wide provider.
pub fn resolve(source_uri: &str, profile: &str) -> Result<Arc<QosBundle>> {
    QosProvider::global().resolve(source_uri, profile)
}
