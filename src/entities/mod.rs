//! Subscription entities.
//!
//! Entities form a chain rooted at the participant:
//! participant → topic → optional content filtered topic → subscriber →
//! data reader. Each is deleted before the entity above it.
//!
//! ## Example
//!
//! ```ignore
//! use domain_subscriber::{Domain, DomainId, EntityGraph, FilterExpression, Pose};
//!
//! let domain = Domain::new(DomainId(0));
//! let bundle = domain_subscriber::qos::resolve(uri, "MyQosLibrary::MyQosProfile")?;
//! let mut graph = EntityGraph::<Pose>::create(
//!     &domain,
//!     &bundle,
//!     "Example acme::Pose",
//!     Some(FilterExpression::new("position.x >= 0")),
//! )?;
//! graph.on_incompatible_qos(|status| println!("{}", status.last_policy_id));
//! ```

mod graph;
mod participant;
mod reader;
mod subscriber;
mod topic;

pub use graph::{EntityGraph, IncompatibleQosHandler};
pub use participant::DomainParticipant;
pub use reader::DataReader;
pub use subscriber::Subscriber;
pub use topic::{ContentFilteredTopic, Topic, TopicDescription};
