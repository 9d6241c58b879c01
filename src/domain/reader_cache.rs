//! Per-reader sample cache: history, resource limits, instances and loans.

use super::loan::LoanedSamples;
use super::wire::{decode_frame, decode_payload, CacheChange, ChangeKind};
use super::DomainHealth;
use crate::conditions::WakerRegistry;
use crate::error::{Result, SubscriberError};
use crate::filter::CompiledFilter;
use crate::qos::{DataReaderQos, History, QosPolicyId};
use crate::status::{
    ReaderStatuses, RequestedIncompatibleQosStatus, SampleLostStatus, SampleRejectedReason,
    SampleRejectedStatus, StatusMask, SubscriptionMatchedStatus,
};
use crate::types::{
    InstanceHandle, InstanceState, Sample, SampleInfo, SequenceNumber, Timestamp, TopicType,
    ViewState,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Reader side of the loopback transport, as seen by the domain.
pub(crate) trait ReaderEndpoint: Send + Sync {
    fn handle(&self) -> InstanceHandle;
    fn topic_name(&self) -> &str;
    fn type_name(&self) -> &str;
    fn partitions(&self) -> &[String];
    fn qos(&self) -> &DataReaderQos;
    fn health(&self) -> Result<()>;
    fn has_samples(&self) -> bool;
    fn status_changes(&self) -> StatusMask;
    fn wakers(&self) -> &WakerRegistry;
    fn on_incompatible_writer(&self, writer: InstanceHandle, failed: &[QosPolicyId]);
    fn on_writer_matched(&self, writer: InstanceHandle);
    fn on_writer_unmatched(&self, writer: InstanceHandle);
    fn deliver(&self, frame: &[u8]);
}

struct CachedSample<T> {
    instance: InstanceHandle,
    writer: InstanceHandle,
    sequence: SequenceNumber,
    source_timestamp: Timestamp,
    reception_timestamp: Timestamp,
    data: Option<T>,
}

struct InstanceRecord {
    state: InstanceState,
    writers: HashSet<InstanceHandle>,
    /// Samples of this instance waiting in the queue.
    queued: usize,
    /// Whether a sample of this instance has been taken before.
    viewed: bool,
}

impl InstanceRecord {
    fn new() -> Self {
        Self {
            state: InstanceState::Alive,
            writers: HashSet::new(),
            queued: 0,
            viewed: false,
        }
    }
}

struct CacheState<T> {
    /// Samples in arrival order across all instances.
    queue: VecDeque<CachedSample<T>>,
    instances: HashMap<InstanceHandle, InstanceRecord>,
    /// Samples handed out on the current loan.
    loaned: usize,
    loan_outstanding: bool,
    statuses: ReaderStatuses,
}

impl<T> CacheState<T> {
    fn evict_oldest(&mut self, instance: InstanceHandle) {
        if let Some(pos) = self.queue.iter().position(|s| s.instance == instance) {
            self.queue.remove(pos);
            if let Some(record) = self.instances.get_mut(&instance) {
                record.queued -= 1;
            }
        }
    }

    /// Check resource limits for a new sample. Returns whether admitting it
    /// replaces the oldest sample of the instance.
    fn admit(
        &self,
        qos: &DataReaderQos,
        instance: InstanceHandle,
    ) -> std::result::Result<bool, SampleRejectedReason> {
        let limits = &qos.resource_limits;
        let record = self.instances.get(&instance);

        if record.is_none() {
            if let Some(max) = limits.max_instances {
                if self.instances.len() >= max as usize {
                    return Err(SampleRejectedReason::InstancesLimit);
                }
            }
        }

        let queued = record.map_or(0, |r| r.queued);
        match qos.history {
            History::KeepLast { depth } if queued >= depth as usize => return Ok(true),
            History::KeepAll => {
                if let Some(max) = limits.max_samples_per_instance {
                    if queued >= max as usize {
                        return Err(SampleRejectedReason::SamplesPerInstanceLimit);
                    }
                }
            }
            _ => {}
        }

        if let Some(max) = limits.max_samples {
            if self.queue.len() + self.loaned >= max as usize {
                return Err(SampleRejectedReason::SamplesLimit);
            }
        }

        Ok(false)
    }
}

/// Buffered samples and statuses of one data reader.
pub(crate) struct ReaderCache<T> {
    handle: InstanceHandle,
    topic_name: String,
    type_name: &'static str,
    partitions: Vec<String>,
    qos: DataReaderQos,
    filter: Option<Arc<CompiledFilter>>,
    health: Arc<DomainHealth>,
    state: Mutex<CacheState<T>>,
    wakers: WakerRegistry,
    closed: AtomicBool,
}

impl<T> ReaderCache<T> {
    /// Give back the capacity held by the outstanding loan.
    pub(crate) fn return_loan(&self) {
        let mut state = self.state.lock();
        trace!(topic = %self.topic_name, samples = state.loaned, "Loan returned");
        state.loaned = 0;
        state.loan_outstanding = false;
    }

    /// Stop accepting samples. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn attached_conditions(&self) -> usize {
        self.wakers.len()
    }

    /// Samples buffered and not yet taken.
    pub(crate) fn buffered(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub(crate) fn requested_incompatible_qos_status(&self) -> RequestedIncompatibleQosStatus {
        self.state.lock().statuses.take_requested_incompatible_qos()
    }

    pub(crate) fn subscription_matched_status(&self) -> SubscriptionMatchedStatus {
        self.state.lock().statuses.take_subscription_matched()
    }

    pub(crate) fn sample_rejected_status(&self) -> SampleRejectedStatus {
        self.state.lock().statuses.take_sample_rejected()
    }

    pub(crate) fn sample_lost_status(&self) -> SampleLostStatus {
        self.state.lock().statuses.take_sample_lost()
    }

    fn flag_status(&self, state: &mut CacheState<T>, kind: StatusMask) {
        state.statuses.changes.insert(kind);
    }

    fn reject(
        &self,
        state: &mut CacheState<T>,
        instance: InstanceHandle,
        reason: SampleRejectedReason,
    ) {
        let status = &mut state.statuses.sample_rejected;
        status.total_count += 1;
        status.total_count_change += 1;
        status.last_reason = reason;
        status.last_instance_handle = instance;
        self.flag_status(state, StatusMask::SAMPLE_REJECTED);
    }
}

impl<T: TopicType> ReaderCache<T> {
    pub(crate) fn new(
        handle: InstanceHandle,
        topic_name: String,
        partitions: Vec<String>,
        qos: DataReaderQos,
        filter: Option<Arc<CompiledFilter>>,
        health: Arc<DomainHealth>,
    ) -> Self {
        Self {
            handle,
            topic_name,
            type_name: T::TYPE_NAME,
            partitions,
            qos,
            filter,
            health,
            state: Mutex::new(CacheState {
                queue: VecDeque::new(),
                instances: HashMap::new(),
                loaned: 0,
                loan_outstanding: false,
                statuses: ReaderStatuses::default(),
            }),
            wakers: WakerRegistry::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Remove every buffered sample in one batch and loan it out.
    ///
    /// Never blocks on data availability; an empty cache yields an empty
    /// loan. Only one loan may be outstanding at a time.
    pub(crate) fn take(self: &Arc<Self>) -> Result<LoanedSamples<T>> {
        self.health.check()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubscriberError::PreconditionNotMet(format!(
                "reader on {} has been deleted",
                self.topic_name
            )));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.loan_outstanding {
            return Err(SubscriberError::PreconditionNotMet(format!(
                "reader on {} already has an outstanding loan",
                self.topic_name
            )));
        }

        let mut samples = Vec::with_capacity(state.queue.len());
        let mut seen = Vec::new();
        for cached in state.queue.drain(..) {
            let (instance_state, view_state) = match state.instances.get_mut(&cached.instance) {
                Some(record) => {
                    record.queued -= 1;
                    let view = if record.viewed {
                        ViewState::NotNew
                    } else {
                        ViewState::New
                    };
                    (record.state, view)
                }
                None => (InstanceState::NotAliveNoWriters, ViewState::NotNew),
            };
            seen.push(cached.instance);

            let info = SampleInfo {
                valid_data: cached.data.is_some(),
                instance_state,
                view_state,
                instance_handle: cached.instance,
                publication_handle: cached.writer,
                sequence_number: cached.sequence,
                source_timestamp: cached.source_timestamp,
                reception_timestamp: cached.reception_timestamp,
            };
            samples.push(Sample::new(info, cached.data));
        }

        for instance in seen {
            if let Some(record) = state.instances.get_mut(&instance) {
                record.viewed = true;
            }
        }
        state
            .instances
            .retain(|_, r| r.queued > 0 || r.state == InstanceState::Alive);

        state.loaned = samples.len();
        state.loan_outstanding = true;
        state.statuses.changes.remove(StatusMask::DATA_AVAILABLE);
        drop(guard);

        debug!(topic = %self.topic_name, samples = samples.len(), "Took samples on loan");
        Ok(LoanedSamples::new(samples, Arc::clone(self)))
    }

    fn insert(&self, change: CacheChange, data: T) {
        let instance = change.instance_handle();
        let writer = change.writer_handle();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let replaces = match state.admit(&self.qos, instance) {
            Ok(replaces) => replaces,
            Err(reason) => {
                self.reject(state, instance, reason);
                drop(guard);
                warn!(topic = %self.topic_name, ?reason, "Sample rejected");
                self.wakers.wake_status(StatusMask::SAMPLE_REJECTED);
                return;
            }
        };
        if replaces {
            state.evict_oldest(instance);
        }

        let record = state
            .instances
            .entry(instance)
            .or_insert_with(InstanceRecord::new);
        if record.state != InstanceState::Alive {
            record.state = InstanceState::Alive;
            record.viewed = false;
        }
        record.writers.insert(writer);
        record.queued += 1;

        state.queue.push_back(CachedSample {
            instance,
            writer,
            sequence: change.sequence,
            source_timestamp: change.source_timestamp,
            reception_timestamp: Timestamp::now(),
            data: Some(data),
        });
        self.flag_status(state, StatusMask::DATA_AVAILABLE);
        drop(guard);

        self.wakers.wake_data();
        self.wakers.wake_status(StatusMask::DATA_AVAILABLE);
    }

    /// Apply a dispose or unregister to a known instance.
    fn transition(&self, change: CacheChange) {
        let instance = change.instance_handle();
        let writer = change.writer_handle();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(record) = state.instances.get_mut(&instance) else {
            trace!(topic = %self.topic_name, %instance, "State change for unknown instance ignored");
            return;
        };

        let new_state = match change.kind {
            ChangeKind::Disposed if record.state != InstanceState::NotAliveDisposed => {
                InstanceState::NotAliveDisposed
            }
            ChangeKind::Unregistered => {
                record.writers.remove(&writer);
                if record.writers.is_empty() && record.state == InstanceState::Alive {
                    InstanceState::NotAliveNoWriters
                } else {
                    return;
                }
            }
            _ => return,
        };

        // State changes occupy a buffer slot like data does
        match state.admit(&self.qos, instance) {
            Ok(true) => state.evict_oldest(instance),
            Ok(false) => {}
            Err(reason) => {
                self.reject(state, instance, reason);
                drop(guard);
                warn!(topic = %self.topic_name, %instance, ?reason, "State change rejected");
                self.wakers.wake_status(StatusMask::SAMPLE_REJECTED);
                return;
            }
        }

        let Some(record) = state.instances.get_mut(&instance) else {
            return;
        };
        record.state = new_state;
        record.queued += 1;
        state.queue.push_back(CachedSample {
            instance,
            writer,
            sequence: change.sequence,
            source_timestamp: change.source_timestamp,
            reception_timestamp: Timestamp::now(),
            data: None,
        });
        self.flag_status(state, StatusMask::DATA_AVAILABLE);
        drop(guard);

        debug!(topic = %self.topic_name, %instance, state = %new_state, "Instance state changed");
        self.wakers.wake_data();
        self.wakers.wake_status(StatusMask::DATA_AVAILABLE);
    }

    fn lose(&self, error: SubscriberError) {
        {
            let mut state = self.state.lock();
            state.statuses.sample_lost.total_count += 1;
            state.statuses.sample_lost.total_count_change += 1;
            state.statuses.changes.insert(StatusMask::SAMPLE_LOST);
        }
        warn!(topic = %self.topic_name, %error, "Sample lost");
        self.wakers.wake_status(StatusMask::SAMPLE_LOST);
    }
}

impl<T: TopicType> ReaderEndpoint for ReaderCache<T> {
    fn handle(&self) -> InstanceHandle {
        self.handle
    }

    fn topic_name(&self) -> &str {
        &self.topic_name
    }

    fn type_name(&self) -> &str {
        self.type_name
    }

    fn partitions(&self) -> &[String] {
        &self.partitions
    }

    fn qos(&self) -> &DataReaderQos {
        &self.qos
    }

    fn health(&self) -> Result<()> {
        self.health.check()
    }

    fn has_samples(&self) -> bool {
        !self.state.lock().queue.is_empty()
    }

    fn status_changes(&self) -> StatusMask {
        self.state.lock().statuses.changes
    }

    fn wakers(&self) -> &WakerRegistry {
        &self.wakers
    }

    fn on_incompatible_writer(&self, writer: InstanceHandle, failed: &[QosPolicyId]) {
        let status = {
            let mut state = self.state.lock();
            state.statuses.requested_incompatible_qos.record(failed);
            state
                .statuses
                .changes
                .insert(StatusMask::REQUESTED_INCOMPATIBLE_QOS);
            state.statuses.requested_incompatible_qos.clone()
        };
        warn!(
            topic = %self.topic_name,
            %writer,
            policy = %status.last_policy_id,
            total_count = status.total_count,
            "Requested QoS incompatible with offered QoS"
        );
        self.wakers
            .wake_status(StatusMask::REQUESTED_INCOMPATIBLE_QOS);
    }

    fn on_writer_matched(&self, writer: InstanceHandle) {
        {
            let mut state = self.state.lock();
            let status = &mut state.statuses.subscription_matched;
            status.total_count += 1;
            status.total_count_change += 1;
            status.current_count += 1;
            status.current_count_change += 1;
            status.last_publication_handle = writer;
            state.statuses.changes.insert(StatusMask::SUBSCRIPTION_MATCHED);
        }
        debug!(topic = %self.topic_name, %writer, "Matched writer");
        self.wakers.wake_status(StatusMask::SUBSCRIPTION_MATCHED);
    }

    fn on_writer_unmatched(&self, writer: InstanceHandle) {
        {
            let mut state = self.state.lock();
            let status = &mut state.statuses.subscription_matched;
            status.current_count = status.current_count.saturating_sub(1);
            status.current_count_change -= 1;
            status.last_publication_handle = writer;
            state.statuses.changes.insert(StatusMask::SUBSCRIPTION_MATCHED);
        }
        debug!(topic = %self.topic_name, %writer, "Writer unmatched");
        self.wakers.wake_status(StatusMask::SUBSCRIPTION_MATCHED);
    }

    fn deliver(&self, frame: &[u8]) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let change = match decode_frame(frame) {
            Ok(change) => change,
            Err(e) => return self.lose(e),
        };
        let data: T = match decode_payload(&change.payload) {
            Ok(data) => data,
            Err(e) => return self.lose(e),
        };

        match change.kind {
            ChangeKind::Alive => {
                if let Some(filter) = &self.filter {
                    if !filter.evaluate(&data) {
                        trace!(topic = %self.topic_name, "Sample filtered out");
                        return;
                    }
                }
                self.insert(change, data);
            }
            ChangeKind::Disposed | ChangeKind::Unregistered => self.transition(change),
        }
    }
}
