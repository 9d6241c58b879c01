//! Subscriber: groups data readers under one set of partitions.

use super::reader::DataReader;
use super::topic::TopicDescription;
use crate::domain::{Domain, ReaderCache, ReaderEndpoint};
use crate::error::{Result, SubscriberError};
use crate::qos::{DataReaderQos, SubscriberQos};
use crate::status::StatusMask;
use crate::types::{InstanceHandle, TopicType};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct Subscriber {
    domain: Domain,
    handle: InstanceHandle,
    qos: SubscriberQos,
    /// Live subscriber count of the owning participant.
    siblings: Arc<AtomicUsize>,
    readers: Arc<AtomicUsize>,
    deleted: AtomicBool,
}

impl Subscriber {
    pub(crate) fn new(
        domain: Domain,
        handle: InstanceHandle,
        qos: SubscriberQos,
        siblings: Arc<AtomicUsize>,
    ) -> Self {
        info!(subscriber = %handle, partitions = ?qos.partition, "Subscriber created");
        Self {
            domain,
            handle,
            qos,
            siblings,
            readers: Arc::new(AtomicUsize::new(0)),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> InstanceHandle {
        self.handle
    }

    pub fn qos(&self) -> &SubscriberQos {
        &self.qos
    }

    /// Create a reader on `topic`.
    ///
    /// `mask` restricts which status changes trigger the reader's status
    /// condition. The reader starts matching writers immediately.
    pub fn create_datareader<T, D>(
        &self,
        topic: &D,
        qos: DataReaderQos,
        mask: StatusMask,
    ) -> Result<DataReader<T>>
    where
        T: TopicType,
        D: TopicDescription<T>,
    {
        if self.deleted.load(Ordering::SeqCst) {
            return Err(SubscriberError::PreconditionNotMet(
                "subscriber has been deleted".to_string(),
            ));
        }
        qos.validate()?;
        if let Err(e) = self.domain.health().check() {
            return Err(SubscriberError::entity_creation("data reader", e.to_string()));
        }

        let filter = topic.filter();
        let cache = Arc::new(ReaderCache::<T>::new(
            self.domain.next_handle("reader"),
            topic.topic_name().to_string(),
            self.qos.partition.clone(),
            qos,
            filter.clone(),
            self.domain.health(),
        ));
        info!(
            topic = topic.name(),
            reader = %cache.handle(),
            filter = filter.as_ref().map(|f| f.expression().expression.as_str()).unwrap_or(""),
            "Data reader created"
        );

        let reader = DataReader::new(
            Arc::clone(&cache),
            self.domain.clone(),
            mask,
            Arc::clone(&self.readers),
        );
        self.readers.fetch_add(1, Ordering::SeqCst);
        self.domain.add_reader(cache as Arc<dyn ReaderEndpoint>);
        Ok(reader)
    }

    /// Delete the subscriber. Fails while it still has readers.
    pub fn delete(&self) -> Result<()> {
        if self.deleted.load(Ordering::SeqCst) {
            return Ok(());
        }
        let readers = self.readers.load(Ordering::SeqCst);
        if readers > 0 {
            return Err(SubscriberError::PreconditionNotMet(format!(
                "subscriber still has {} data readers",
                readers
            )));
        }
        self.deleted.store(true, Ordering::SeqCst);
        self.siblings.fetch_sub(1, Ordering::SeqCst);
        info!(subscriber = %self.handle, "Subscriber deleted");
        Ok(())
    }
}
