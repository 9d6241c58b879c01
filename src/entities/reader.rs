//! Data reader: the only entity that produces samples.

use crate::conditions::{ReadCondition, StatusCondition};
use crate::domain::{Domain, LoanedSamples, ReaderCache, ReaderEndpoint};
use crate::error::{Result, SubscriberError};
use crate::qos::DataReaderQos;
use crate::status::{
    RequestedIncompatibleQosStatus, SampleLostStatus, SampleRejectedStatus, StatusMask,
    SubscriptionMatchedStatus,
};
use crate::types::{InstanceHandle, TopicType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Typed access to the samples and statuses of one reader.
///
/// Clones share the same reader. After [`DataReader::delete`] every clone
/// fails on `take`.
pub struct DataReader<T> {
    cache: Arc<ReaderCache<T>>,
    domain: Domain,
    status_condition: Arc<StatusCondition>,
    /// Live reader count of the owning subscriber.
    siblings: Arc<AtomicUsize>,
}

impl<T> Clone for DataReader<T> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            domain: self.domain.clone(),
            status_condition: Arc::clone(&self.status_condition),
            siblings: Arc::clone(&self.siblings),
        }
    }
}

impl<T: TopicType> DataReader<T> {
    pub(crate) fn new(
        cache: Arc<ReaderCache<T>>,
        domain: Domain,
        mask: StatusMask,
        siblings: Arc<AtomicUsize>,
    ) -> Self {
        let endpoint: Arc<dyn ReaderEndpoint> = cache.clone();
        Self {
            status_condition: Arc::new(StatusCondition::new(endpoint, mask)),
            cache,
            domain,
            siblings,
        }
    }

    pub fn handle(&self) -> InstanceHandle {
        self.cache.handle()
    }

    pub fn topic_name(&self) -> &str {
        self.cache.topic_name()
    }

    pub fn qos(&self) -> &DataReaderQos {
        self.cache.qos()
    }

    /// Take every buffered sample as one loan. Never blocks.
    pub fn take(&self) -> Result<LoanedSamples<T>> {
        self.cache.take()
    }

    /// The reader's status condition, enabled for the mask given at creation.
    pub fn status_condition(&self) -> Arc<StatusCondition> {
        Arc::clone(&self.status_condition)
    }

    /// A new condition that triggers while samples are buffered.
    pub fn create_read_condition(&self) -> Arc<ReadCondition> {
        let endpoint: Arc<dyn ReaderEndpoint> = self.cache.clone();
        Arc::new(ReadCondition::new(endpoint))
    }

    /// Read the status and reset its change counters.
    pub fn requested_incompatible_qos_status(&self) -> RequestedIncompatibleQosStatus {
        self.cache.requested_incompatible_qos_status()
    }

    pub fn subscription_matched_status(&self) -> SubscriptionMatchedStatus {
        self.cache.subscription_matched_status()
    }

    pub fn sample_rejected_status(&self) -> SampleRejectedStatus {
        self.cache.sample_rejected_status()
    }

    pub fn sample_lost_status(&self) -> SampleLostStatus {
        self.cache.sample_lost_status()
    }

    /// Kinds of status changed since they were last read.
    pub fn status_changes(&self) -> StatusMask {
        self.cache.status_changes()
    }

    /// Samples waiting to be taken.
    pub fn buffered(&self) -> usize {
        self.cache.buffered()
    }

    /// Remove the reader from the domain.
    ///
    /// Fails while any of its conditions is attached to a wait set.
    pub fn delete(&self) -> Result<()> {
        let attached = self.cache.attached_conditions();
        if attached > 0 {
            return Err(SubscriberError::PreconditionNotMet(format!(
                "{} conditions of the reader on {} are still attached to a wait set",
                attached,
                self.topic_name()
            )));
        }
        if self.cache.close() {
            self.domain.remove_reader(self.handle());
            self.siblings.fetch_sub(1, Ordering::SeqCst);
            info!(topic = self.topic_name(), reader = %self.handle(), "Data reader deleted");
        }
        Ok(())
    }
}
