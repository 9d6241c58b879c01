//! # Domain Subscriber
//!
//! The subscribing side of a publish/subscribe data domain: a client joins a
//! domain, applies QoS taken from named profiles, filters samples by content
//! before they are buffered, and drains them from a condition-driven loop.
//!
//! ## Core Concepts
//!
//! - **QoS profiles**: Named policy bundles resolved once from a JSON document
//! - **Content filters**: SQL-style predicates compiled against the data type
//! - **Entities**: Participant → topic → filtered topic → subscriber → reader
//! - **Loans**: Taken samples hold reader capacity until released
//! - **Conditions**: Triggers a single wait set blocks on
//!
//! ## Example
//!
//! ```ignore
//! use domain_subscriber::{
//!     run_subscriber_application, CancellationToken, Domain, DomainId, SubscriberConfig,
//! };
//!
//! let domain = Domain::new(DomainId(0));
//! let cancel = CancellationToken::new();
//! let config = SubscriberConfig {
//!     qos_uri: "file://MY_QOS_PROFILES.json".into(),
//!     sample_count: 10,
//!     ..Default::default()
//! };
//!
//! let outcome = run_subscriber_application(&domain, &config, cancel)?;
//! println!("read {} samples", outcome.samples_read);
//! ```

pub mod app;
pub mod conditions;
pub mod domain;
pub mod drain;
pub mod entities;
pub mod error;
pub mod event_loop;
pub mod filter;
pub mod pose;
pub mod qos;
pub mod status;
pub mod types;

// Re-exports
pub use app::{exit_code, run_subscriber_application, SubscriberConfig};
pub use conditions::{
    Condition, ConditionId, GuardCondition, ReadCondition, StatusCondition, WaitSet,
};
pub use domain::{Domain, LoanedSamples, PeerWriter};
pub use drain::{drain, drain_with, Drained, SampleView};
pub use entities::{
    ContentFilteredTopic, DataReader, DomainParticipant, EntityGraph, Subscriber, Topic,
    TopicDescription,
};
pub use error::{Result, SubscriberError};
pub use event_loop::{
    CancellationToken, EventLoop, LoopConfig, LoopExit, LoopOutcome, Reaction, RunState,
};
pub use filter::{CompiledFilter, FilterExpression};
pub use pose::{Point, Pose, Quaternion, POSE_TOPIC_NAME};
pub use qos::{
    DataReaderQos, DataWriterQos, DomainParticipantQos, Durability, History, QosBundle,
    QosPolicyId, QosProvider, Reliability, SubscriberQos, TopicQos,
};
pub use status::{
    RequestedIncompatibleQosStatus, SampleLostStatus, SampleRejectedStatus, StatusMask,
    SubscriptionMatchedStatus,
};
pub use types::{
    DomainId, InstanceHandle, InstanceState, Sample, SampleInfo, TopicType, ViewState,
};
