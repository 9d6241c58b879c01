//! Condition trait, wake-up plumbing and the guard condition.

use crate::error::{Result, SubscriberError};
use crate::status::StatusMask;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_CONDITION_KEY: AtomicU64 = AtomicU64::new(1);

/// Identifier of a wait set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WaitSetId(pub(crate) u64);

/// Handle used by an entity to wake a blocked wait set.
///
/// Only wait sets create wakers; entities keep them while a condition is
/// attached.
#[derive(Clone, Debug)]
pub struct Waker {
    sender: Sender<()>,
}

impl Waker {
    pub(crate) fn new(sender: Sender<()>) -> Self {
        Self { sender }
    }

    pub(crate) fn wake(&self) {
        // Full means a wakeup is already pending; disconnected means the
        // wait set is gone. Neither needs handling.
        let _ = self.sender.try_send(());
    }
}

/// What an attached condition wants to be woken for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Interest {
    Any,
    Data,
    Status(StatusMask),
}

/// Wakers registered on one entity, keyed by condition.
#[derive(Debug, Default)]
pub(crate) struct WakerRegistry {
    entries: Mutex<Vec<(u64, Interest, Waker)>>,
}

impl WakerRegistry {
    pub fn register(&self, key: u64, interest: Interest, waker: Waker) {
        let mut entries = self.entries.lock();
        entries.retain(|(k, _, _)| *k != key);
        entries.push((key, interest, waker));
    }

    pub fn unregister(&self, key: u64) {
        self.entries.lock().retain(|(k, _, _)| *k != key);
    }

    pub fn wake_data(&self) {
        self.wake_where(|interest| matches!(interest, Interest::Data | Interest::Any));
    }

    pub fn wake_status(&self, kind: StatusMask) {
        self.wake_where(|interest| match interest {
            Interest::Status(mask) => mask.intersects(kind),
            Interest::Any => true,
            Interest::Data => false,
        });
    }

    pub fn wake_all(&self) {
        self.wake_where(|_| true);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn wake_where(&self, wants: impl Fn(&Interest) -> bool) {
        for (_, interest, waker) in self.entries.lock().iter() {
            if wants(interest) {
                waker.wake();
            }
        }
    }
}

/// Tracks which wait set, if any, a condition belongs to.
#[derive(Debug)]
pub(crate) struct Attachment {
    key: u64,
    owner: Mutex<Option<WaitSetId>>,
}

impl Attachment {
    pub fn new() -> Self {
        Self {
            key: NEXT_CONDITION_KEY.fetch_add(1, Ordering::Relaxed),
            owner: Mutex::new(None),
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn claim(&self, waitset: WaitSetId, what: &str) -> Result<()> {
        let mut owner = self.owner.lock();
        match *owner {
            Some(current) if current != waitset => Err(SubscriberError::PreconditionNotMet(
                format!("{} is already attached to another wait set", what),
            )),
            _ => {
                *owner = Some(waitset);
                Ok(())
            }
        }
    }

    /// Returns true if `waitset` owned the condition.
    pub fn release(&self, waitset: WaitSetId) -> bool {
        let mut owner = self.owner.lock();
        if *owner == Some(waitset) {
            *owner = None;
            true
        } else {
            false
        }
    }
}

/// A boolean trigger that a wait set can block on.
pub trait Condition: Send + Sync {
    /// Current trigger value. Fails if the underlying transport is unusable.
    fn trigger_value(&self) -> Result<bool>;

    /// Called by a wait set when the condition joins it.
    fn on_attach(&self, waitset: WaitSetId, waker: Waker) -> Result<()>;

    /// Called by a wait set when the condition leaves it.
    fn on_detach(&self, waitset: WaitSetId);

    /// Short label for logs.
    fn describe(&self) -> String {
        "condition".to_string()
    }
}

/// A condition whose trigger value is set by the application.
#[derive(Debug)]
pub struct GuardCondition {
    triggered: AtomicBool,
    attachment: Attachment,
    wakers: WakerRegistry,
}

impl GuardCondition {
    pub fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            attachment: Attachment::new(),
            wakers: WakerRegistry::default(),
        }
    }

    /// Set the trigger value; setting it wakes any wait set holding it.
    pub fn set_trigger_value(&self, value: bool) {
        self.triggered.store(value, Ordering::SeqCst);
        if value {
            self.wakers.wake_all();
        }
    }
}

impl Default for GuardCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition for GuardCondition {
    fn trigger_value(&self) -> Result<bool> {
        Ok(self.triggered.load(Ordering::SeqCst))
    }

    fn on_attach(&self, waitset: WaitSetId, waker: Waker) -> Result<()> {
        self.attachment.claim(waitset, "guard condition")?;
        self.wakers
            .register(self.attachment.key(), Interest::Any, waker);
        Ok(())
    }

    fn on_detach(&self, waitset: WaitSetId) {
        if self.attachment.release(waitset) {
            self.wakers.unregister(self.attachment.key());
        }
    }

    fn describe(&self) -> String {
        "guard condition".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_waker_coalesces() {
        let (tx, rx) = bounded(1);
        let waker = Waker::new(tx);
        waker.wake();
        waker.wake();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_registry_respects_interest() {
        let registry = WakerRegistry::default();
        let (data_tx, data_rx) = bounded(1);
        let (status_tx, status_rx) = bounded(1);
        registry.register(1, Interest::Data, Waker::new(data_tx));
        registry.register(
            2,
            Interest::Status(StatusMask::REQUESTED_INCOMPATIBLE_QOS),
            Waker::new(status_tx),
        );

        registry.wake_status(StatusMask::SUBSCRIPTION_MATCHED);
        assert!(data_rx.try_recv().is_err());
        assert!(status_rx.try_recv().is_err());

        registry.wake_status(StatusMask::REQUESTED_INCOMPATIBLE_QOS);
        assert!(status_rx.try_recv().is_ok());

        registry.wake_data();
        assert!(data_rx.try_recv().is_ok());

        registry.unregister(1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_attachment_is_exclusive() {
        let attachment = Attachment::new();
        attachment.claim(WaitSetId(1), "c").unwrap();
        attachment.claim(WaitSetId(1), "c").unwrap();
        assert!(attachment.claim(WaitSetId(2), "c").is_err());
        assert!(!attachment.release(WaitSetId(2)));
        assert!(attachment.release(WaitSetId(1)));
        attachment.claim(WaitSetId(2), "c").unwrap();
    }
}
