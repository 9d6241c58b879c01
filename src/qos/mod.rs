//! Quality-of-service policies and profile resolution.
//!
//! Profiles are read from a JSON document grouped by library and addressed
//! as `<library>::<profile>`. Resolution produces a [`QosBundle`] holding
//! one typed QoS set per entity kind; nothing downstream looks at the raw
//! document again.
//!
//! # Example
//!
//! ```ignore
//! let bundle = qos::resolve("file://MY_QOS_PROFILES.json", "MyQosLibrary::MyQosProfile")?;
//! let participant = DomainParticipant::new(&domain, bundle.participant.clone())?;
//! ```

mod policy;
mod provider;

pub use policy::{
    incompatible_policies, DataReaderQos, DataWriterQos, Deadline, DomainParticipantQos,
    Durability, History, QosPolicyId, Reliability, ResourceLimits, SubscriberQos, TopicQos,
};
pub(crate) use policy::partitions_overlap;
pub use provider::{resolve, ProfileName, QosBundle, QosProvider};
