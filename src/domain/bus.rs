//! In-process domain: endpoint matching and sample routing.

use super::reader_cache::ReaderEndpoint;
use super::wire::{encode_frame, encode_payload, CacheChange, ChangeKind};
use crate::error::{Result, SubscriberError};
use crate::qos::{incompatible_policies, partitions_overlap, DataWriterQos, Durability, History};
use crate::types::{DomainId, InstanceHandle, SequenceNumber, Timestamp, TopicType};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Whether the transport is still usable.
#[derive(Debug, Default)]
pub(crate) struct DomainHealth {
    fault: RwLock<Option<String>>,
}

impl DomainHealth {
    pub fn check(&self) -> Result<()> {
        match &*self.fault.read() {
            Some(reason) => Err(SubscriberError::RuntimeFault(format!(
                "transport unusable: {}",
                reason
            ))),
            None => Ok(()),
        }
    }
}

struct WriterState {
    sequence: SequenceNumber,
    matched: Vec<InstanceHandle>,
    /// Registered instances and the last payload carrying their key.
    instances: HashMap<InstanceHandle, Vec<u8>>,
    /// Frames kept for late-joining readers.
    history: VecDeque<(InstanceHandle, Vec<u8>)>,
}

/// Writer side of the loopback transport.
pub(crate) struct WriterEndpoint {
    handle: InstanceHandle,
    topic_name: String,
    type_name: &'static str,
    qos: DataWriterQos,
    state: Mutex<WriterState>,
}

impl WriterEndpoint {
    fn is_durable(&self) -> bool {
        self.qos.durability >= Durability::TransientLocal
    }

    /// Build the frame for one change and update writer bookkeeping.
    fn emit(&self, kind: ChangeKind, instance: InstanceHandle, payload: Vec<u8>) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        state.sequence = state.sequence.next();

        match kind {
            ChangeKind::Alive | ChangeKind::Disposed => {
                state.instances.insert(instance, payload.clone());
            }
            ChangeKind::Unregistered => {
                state.instances.remove(&instance);
            }
        }

        let change = CacheChange {
            kind,
            writer: self.handle.0,
            instance: instance.0,
            sequence: state.sequence,
            source_timestamp: Timestamp::now(),
            payload,
        };
        let frame = encode_frame(&change)?;

        if self.is_durable() {
            state.history.push_back((instance, frame.clone()));
            if let History::KeepLast { depth } = self.qos.history {
                let kept = state.history.iter().filter(|(i, _)| *i == instance).count();
                if kept > depth as usize {
                    if let Some(pos) = state.history.iter().position(|(i, _)| *i == instance) {
                        state.history.remove(pos);
                    }
                }
            }
        }

        Ok(frame)
    }

    fn matched(&self) -> Vec<InstanceHandle> {
        self.state.lock().matched.clone()
    }
}

struct DomainInner {
    id: DomainId,
    health: Arc<DomainHealth>,
    readers: RwLock<Vec<Arc<dyn ReaderEndpoint>>>,
    writers: RwLock<Vec<Arc<WriterEndpoint>>>,
    next_entity: AtomicU64,
}

/// An isolated in-process pub/sub domain.
///
/// Stands in for the network substrate: it matches readers with writers by
/// topic, type and partition, checks requested against offered QoS, and
/// routes encoded samples to matched readers.
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    pub fn new(id: DomainId) -> Self {
        Self {
            inner: Arc::new(DomainInner {
                id,
                health: Arc::new(DomainHealth::default()),
                readers: RwLock::new(Vec::new()),
                writers: RwLock::new(Vec::new()),
                next_entity: AtomicU64::new(1),
            }),
        }
    }

    pub fn id(&self) -> DomainId {
        self.inner.id
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.health.check().is_ok()
    }

    /// Mark the transport unusable. Blocked waits on this domain wake up and
    /// every later wait or take fails with a runtime fault.
    pub fn inject_fault(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(domain = %self.inner.id, %reason, "Transport fault");
        *self.inner.health.fault.write() = Some(reason);
        for reader in self.inner.readers.read().iter() {
            reader.wakers().wake_all();
        }
    }

    /// Announce a remote writer on `topic_name` offering `qos`.
    pub fn announce_writer<T: TopicType>(
        &self,
        topic_name: &str,
        qos: DataWriterQos,
    ) -> Result<PeerWriter<T>> {
        self.inner.health.check()?;

        let endpoint = Arc::new(WriterEndpoint {
            handle: self.next_handle("writer"),
            topic_name: topic_name.to_string(),
            type_name: T::TYPE_NAME,
            qos,
            state: Mutex::new(WriterState {
                sequence: SequenceNumber::default(),
                matched: Vec::new(),
                instances: HashMap::new(),
                history: VecDeque::new(),
            }),
        });
        self.inner.writers.write().push(Arc::clone(&endpoint));
        info!(domain = %self.inner.id, topic = topic_name, writer = %endpoint.handle, "Writer announced");

        let readers = self.inner.readers.read().clone();
        for reader in &readers {
            self.match_pair(&endpoint, reader);
        }

        Ok(PeerWriter {
            domain: self.clone(),
            endpoint,
            _marker: PhantomData,
        })
    }

    pub(crate) fn health(&self) -> Arc<DomainHealth> {
        Arc::clone(&self.inner.health)
    }

    pub(crate) fn next_handle(&self, kind: &str) -> InstanceHandle {
        let id = self.inner.next_entity.fetch_add(1, Ordering::Relaxed);
        InstanceHandle::from_entity_id(kind, id)
    }

    pub(crate) fn add_reader(&self, reader: Arc<dyn ReaderEndpoint>) {
        self.inner.readers.write().push(Arc::clone(&reader));
        let writers = self.inner.writers.read().clone();
        for writer in &writers {
            self.match_pair(writer, &reader);
        }
    }

    pub(crate) fn remove_reader(&self, handle: InstanceHandle) {
        self.inner.readers.write().retain(|r| r.handle() != handle);
        for writer in self.inner.writers.read().iter() {
            writer.state.lock().matched.retain(|h| *h != handle);
        }
    }

    fn remove_writer(&self, handle: InstanceHandle) {
        let removed = {
            let mut writers = self.inner.writers.write();
            let pos = writers.iter().position(|w| w.handle == handle);
            pos.map(|p| writers.remove(p))
        };
        let Some(writer) = removed else {
            return;
        };

        let matched = writer.matched();
        for reader in self.inner.readers.read().iter() {
            if matched.contains(&reader.handle()) {
                reader.on_writer_unmatched(handle);
            }
        }
    }

    fn match_pair(&self, writer: &Arc<WriterEndpoint>, reader: &Arc<dyn ReaderEndpoint>) {
        if writer.topic_name != reader.topic_name()
            || writer.type_name != reader.type_name()
            || !partitions_overlap(&writer.qos.partition, reader.partitions())
        {
            return;
        }

        let failed = incompatible_policies(reader.qos(), &writer.qos);
        if !failed.is_empty() {
            reader.on_incompatible_writer(writer.handle, &failed);
            return;
        }

        let replay = {
            let mut state = writer.state.lock();
            state.matched.push(reader.handle());
            if writer.is_durable() && reader.qos().durability >= Durability::TransientLocal {
                state.history.iter().map(|(_, f)| f.clone()).collect()
            } else {
                Vec::new()
            }
        };

        reader.on_writer_matched(writer.handle);
        if !replay.is_empty() {
            debug!(topic = %writer.topic_name, samples = replay.len(), "Replaying durable history");
        }
        for frame in &replay {
            reader.deliver(frame);
        }
    }

    fn route(&self, writer: &WriterEndpoint, frame: &[u8]) {
        let matched = writer.matched();
        for reader in self.inner.readers.read().iter() {
            if matched.contains(&reader.handle()) {
                reader.deliver(frame);
            }
        }
    }
}

/// A remote writer simulated by the loopback domain.
///
/// Stands for the counterpart a subscriber matches against; dropping it
/// unregisters its instances and unmatches it from every reader.
pub struct PeerWriter<T> {
    domain: Domain,
    endpoint: Arc<WriterEndpoint>,
    _marker: PhantomData<fn(T)>,
}

impl<T: TopicType> PeerWriter<T> {
    pub fn handle(&self) -> InstanceHandle {
        self.endpoint.handle
    }

    pub fn qos(&self) -> &DataWriterQos {
        &self.endpoint.qos
    }

    pub fn matched_readers(&self) -> usize {
        self.endpoint.state.lock().matched.len()
    }

    pub fn write(&self, sample: &T) -> Result<()> {
        self.send(ChangeKind::Alive, sample)
    }

    /// Mark the sample's instance as disposed.
    pub fn dispose(&self, sample: &T) -> Result<()> {
        self.send(ChangeKind::Disposed, sample)
    }

    /// Stop writing the sample's instance.
    pub fn unregister(&self, sample: &T) -> Result<()> {
        self.send(ChangeKind::Unregistered, sample)
    }

    /// Send an arbitrary frame to matched readers, bypassing the encoder.
    pub fn write_raw(&self, frame: &[u8]) -> Result<()> {
        self.domain.inner.health.check()?;
        self.domain.route(&self.endpoint, frame);
        Ok(())
    }

    fn send(&self, kind: ChangeKind, sample: &T) -> Result<()> {
        self.domain.inner.health.check()?;
        let payload = encode_payload(sample)?;
        let frame = self
            .endpoint
            .emit(kind, sample.instance_handle(), payload)?;
        self.domain.route(&self.endpoint, &frame);
        Ok(())
    }
}

impl<T> Drop for PeerWriter<T> {
    fn drop(&mut self) {
        let instances: Vec<(InstanceHandle, Vec<u8>)> = self
            .endpoint
            .state
            .lock()
            .instances
            .iter()
            .map(|(h, p)| (*h, p.clone()))
            .collect();

        if self.domain.is_healthy() {
            for (instance, payload) in instances {
                match self.endpoint.emit(ChangeKind::Unregistered, instance, payload) {
                    Ok(frame) => self.domain.route(&self.endpoint, &frame),
                    Err(e) => error!(%instance, error = %e, "Failed to unregister instance"),
                }
            }
        }

        self.domain.remove_writer(self.endpoint.handle);
        debug!(writer = %self.endpoint.handle, "Writer removed");
    }
}
