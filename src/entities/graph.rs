//! The participant → topic → filtered topic → subscriber → reader chain.

use super::participant::DomainParticipant;
use super::reader::DataReader;
use super::subscriber::Subscriber;
use super::topic::{ContentFilteredTopic, Topic};
use crate::domain::Domain;
use crate::error::Result;
use crate::filter::FilterExpression;
use crate::qos::QosBundle;
use crate::status::{RequestedIncompatibleQosStatus, StatusMask};
use crate::types::TopicType;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{info, warn};

/// Reaction to a requested-incompatible-QoS notice.
pub type IncompatibleQosHandler = Box<dyn FnMut(&RequestedIncompatibleQosStatus)>;

/// Handler list shared between the graph and any loop wired to it.
pub(crate) type IncompatibleQosHandlers = Rc<RefCell<Vec<IncompatibleQosHandler>>>;

/// Suffix of the content filtered topic created for a filter.
const FILTERED_SUFFIX: &str = "/filtered";

/// Every entity a subscribing application needs, built from one QoS bundle.
///
/// The reader's status mask only enables requested-incompatible-QoS, so
/// other status changes never wake a wait set holding its status condition.
pub struct EntityGraph<T: TopicType> {
    participant: DomainParticipant,
    topic: Topic<T>,
    filtered_topic: Option<ContentFilteredTopic<T>>,
    subscriber: Subscriber,
    reader: DataReader<T>,
    incompatible_qos_handlers: IncompatibleQosHandlers,
    torn_down: bool,
}

impl<T: TopicType> EntityGraph<T> {
    /// Build the chain in order. An invalid filter fails before the
    /// subscriber and reader exist.
    pub fn create(
        domain: &Domain,
        bundle: &QosBundle,
        topic_name: &str,
        filter: Option<FilterExpression>,
    ) -> Result<Self> {
        let participant = DomainParticipant::new(domain, bundle.participant.clone())?;
        let topic = participant.create_topic::<T>(topic_name, bundle.topic.clone())?;
        let filtered_topic = match filter {
            Some(expression) => Some(participant.create_contentfilteredtopic(
                &format!("{}{}", topic_name, FILTERED_SUFFIX),
                &topic,
                expression,
            )?),
            None => None,
        };

        let subscriber = participant.create_subscriber(bundle.subscriber.clone())?;
        let mask = StatusMask::REQUESTED_INCOMPATIBLE_QOS;
        let reader = match &filtered_topic {
            Some(filtered) => {
                subscriber.create_datareader::<T, _>(filtered, bundle.reader.clone(), mask)?
            }
            None => subscriber.create_datareader::<T, _>(&topic, bundle.reader.clone(), mask)?,
        };

        info!(profile = %bundle.name, topic = topic_name, domain = %domain.id(), "Entity graph created");
        Ok(Self {
            participant,
            topic,
            filtered_topic,
            subscriber,
            reader,
            incompatible_qos_handlers: IncompatibleQosHandlers::default(),
            torn_down: false,
        })
    }

    /// Register a reaction for requested-incompatible-QoS notices.
    ///
    /// The handler runs on the event loop thread of any
    /// [`EventLoop`](crate::EventLoop) wired to this graph, whether it was
    /// registered before or after the wiring. It receives the cumulative count,
    /// the change since the last notice and the first mismatched policy.
    pub fn on_incompatible_qos(
        &mut self,
        handler: impl FnMut(&RequestedIncompatibleQosStatus) + 'static,
    ) {
        self.incompatible_qos_handlers
            .borrow_mut()
            .push(Box::new(handler));
    }

    pub(crate) fn incompatible_qos_handlers(&self) -> IncompatibleQosHandlers {
        Rc::clone(&self.incompatible_qos_handlers)
    }

    pub fn participant(&self) -> &DomainParticipant {
        &self.participant
    }

    pub fn topic(&self) -> &Topic<T> {
        &self.topic
    }

    pub fn filtered_topic(&self) -> Option<&ContentFilteredTopic<T>> {
        self.filtered_topic.as_ref()
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    pub fn reader(&self) -> &DataReader<T> {
        &self.reader
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Delete every entity in reverse creation order.
    ///
    /// Only valid once no wait set holds the reader's conditions. Calling it
    /// again after success does nothing.
    pub fn teardown(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }

        self.reader.delete()?;
        self.subscriber.delete()?;
        if let Some(filtered) = &self.filtered_topic {
            self.participant.delete_contentfilteredtopic(filtered)?;
        }
        self.participant.delete_topic(&self.topic)?;
        self.participant.delete()?;

        self.torn_down = true;
        info!(topic = self.reader.topic_name(), "Entity graph torn down");
        Ok(())
    }
}

impl<T: TopicType> Drop for EntityGraph<T> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(error = %e, "Entity graph dropped without teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::WaitSet;
    use crate::error::SubscriberError;
    use crate::pose::Pose;
    use crate::qos::{History, ResourceLimits};
    use crate::types::DomainId;

    #[test]
    fn test_create_and_teardown_is_idempotent() {
        let domain = Domain::new(DomainId(3));
        let mut graph = EntityGraph::<Pose>::create(
            &domain,
            &QosBundle::default(),
            "poses",
            Some(FilterExpression::new("position.x >= 0")),
        )
        .unwrap();
        assert!(graph.filtered_topic().is_some());

        graph.teardown().unwrap();
        assert!(graph.is_torn_down());
        graph.teardown().unwrap();
        assert!(matches!(
            graph.reader().take(),
            Err(SubscriberError::PreconditionNotMet(_))
        ));
    }

    #[test]
    fn test_inconsistent_reader_qos_fails_creation() {
        let domain = Domain::new(DomainId(0));
        let mut bundle = QosBundle::default();
        bundle.reader.history = History::KeepLast { depth: 10 };
        bundle.reader.resource_limits = ResourceLimits {
            max_samples_per_instance: Some(2),
            ..Default::default()
        };
        let result = EntityGraph::<Pose>::create(&domain, &bundle, "poses", None);
        assert!(matches!(
            result,
            Err(SubscriberError::InconsistentPolicy { .. })
        ));
    }

    #[test]
    fn test_teardown_refused_while_conditions_attached() {
        let domain = Domain::new(DomainId(0));
        let mut graph =
            EntityGraph::<Pose>::create(&domain, &QosBundle::default(), "poses", None).unwrap();

        let mut waitset = WaitSet::new();
        waitset.attach(graph.reader().create_read_condition()).unwrap();
        assert!(matches!(
            graph.teardown(),
            Err(SubscriberError::PreconditionNotMet(_))
        ));
        assert!(!graph.is_torn_down());

        drop(waitset);
        graph.teardown().unwrap();
    }

    #[test]
    fn test_reader_status_mask_is_incompatible_qos_only() {
        let domain = Domain::new(DomainId(0));
        let graph =
            EntityGraph::<Pose>::create(&domain, &QosBundle::default(), "poses", None).unwrap();
        assert_eq!(
            graph.reader().status_condition().enabled_statuses(),
            StatusMask::REQUESTED_INCOMPATIBLE_QOS
        );
    }
}
