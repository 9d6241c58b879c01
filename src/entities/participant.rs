//! Domain participant: the root of the entity chain.

use super::subscriber::Subscriber;
use super::topic::{ContentFilteredTopic, Topic, TopicDescription};
use crate::domain::Domain;
use crate::error::{Result, SubscriberError};
use crate::filter::{CompiledFilter, FilterExpression};
use crate::qos::{DomainParticipantQos, SubscriberQos, TopicQos};
use crate::types::{InstanceHandle, TopicType, MAX_DOMAIN_ID};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Membership of one application in a domain.
///
/// Owns the names of the topic descriptions it created and counts its
/// subscribers; it can only be deleted once both are gone.
pub struct DomainParticipant {
    domain: Domain,
    handle: InstanceHandle,
    qos: DomainParticipantQos,
    /// Topic description name to type name.
    topics: Mutex<HashMap<String, &'static str>>,
    subscribers: Arc<AtomicUsize>,
    deleted: AtomicBool,
}

impl DomainParticipant {
    /// Join `domain`.
    pub fn new(domain: &Domain, qos: DomainParticipantQos) -> Result<Self> {
        let id = domain.id();
        if id.0 > MAX_DOMAIN_ID {
            return Err(SubscriberError::entity_creation(
                "participant",
                format!("domain id {} is above {}", id, MAX_DOMAIN_ID),
            ));
        }
        if let Err(e) = domain.health().check() {
            return Err(SubscriberError::entity_creation("participant", e.to_string()));
        }

        let handle = domain.next_handle("participant");
        info!(domain = %id, name = qos.entity_name.as_deref().unwrap_or(""), "Participant created");

        Ok(Self {
            domain: domain.clone(),
            handle,
            qos,
            topics: Mutex::new(HashMap::new()),
            subscribers: Arc::new(AtomicUsize::new(0)),
            deleted: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    pub fn qos(&self) -> &DomainParticipantQos {
        &self.qos
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn create_topic<T: TopicType>(&self, name: &str, qos: TopicQos) -> Result<Topic<T>> {
        self.ensure_alive()?;
        self.register_name(name, T::TYPE_NAME, "topic")?;
        info!(topic = name, type_name = T::TYPE_NAME, "Topic created");
        Ok(Topic::new(name.to_string(), qos))
    }

    /// Create a filtered view of `topic`. The filter is compiled here, so an
    /// invalid expression fails before any reader exists.
    pub fn create_contentfilteredtopic<T: TopicType>(
        &self,
        name: &str,
        topic: &Topic<T>,
        expression: FilterExpression,
    ) -> Result<ContentFilteredTopic<T>> {
        self.ensure_alive()?;
        let filter = CompiledFilter::for_type::<T>(&expression)?;
        self.register_name(name, T::TYPE_NAME, "content filtered topic")?;
        info!(
            topic = name,
            related = topic.topic_name(),
            filter = %expression.expression,
            "Content filtered topic created"
        );
        Ok(ContentFilteredTopic::new(name.to_string(), topic, filter))
    }

    pub fn create_subscriber(&self, qos: SubscriberQos) -> Result<Subscriber> {
        self.ensure_alive()?;
        let subscriber = Subscriber::new(
            self.domain.clone(),
            self.domain.next_handle("subscriber"),
            qos,
            Arc::clone(&self.subscribers),
        );
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        Ok(subscriber)
    }

    pub fn delete_topic<T: TopicType>(&self, topic: &Topic<T>) -> Result<()> {
        self.unregister_name(topic.name())
    }

    pub fn delete_contentfilteredtopic<T: TopicType>(
        &self,
        topic: &ContentFilteredTopic<T>,
    ) -> Result<()> {
        self.unregister_name(topic.name())
    }

    /// Leave the domain. Fails while topics or subscribers still exist.
    pub fn delete(&self) -> Result<()> {
        if self.deleted.load(Ordering::SeqCst) {
            return Ok(());
        }
        let topics = self.topics.lock().len();
        let subscribers = self.subscribers.load(Ordering::SeqCst);
        if topics > 0 || subscribers > 0 {
            return Err(SubscriberError::PreconditionNotMet(format!(
                "participant still has {} topics and {} subscribers",
                topics, subscribers
            )));
        }
        self.deleted.store(true, Ordering::SeqCst);
        info!(domain = %self.domain.id(), "Participant deleted");
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(SubscriberError::PreconditionNotMet(
                "participant has been deleted".to_string(),
            ));
        }
        Ok(())
    }

    fn register_name(&self, name: &str, type_name: &'static str, what: &str) -> Result<()> {
        let mut topics = self.topics.lock();
        if let Some(existing) = topics.get(name) {
            return Err(SubscriberError::entity_creation(
                what,
                format!("name {:?} already used by a {} description", name, existing),
            ));
        }
        topics.insert(name.to_string(), type_name);
        Ok(())
    }

    fn unregister_name(&self, name: &str) -> Result<()> {
        match self.topics.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(SubscriberError::PreconditionNotMet(format!(
                "topic {:?} does not belong to this participant",
                name
            ))),
        }
    }
}
