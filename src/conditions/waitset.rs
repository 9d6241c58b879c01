//! Wait set: block until any attached condition triggers.

use super::condition::{Condition, WaitSetId, Waker};
use crate::error::{Result, SubscriberError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

static NEXT_WAITSET_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a condition within one wait set, in attach order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConditionId(pub u64);

/// A set of conditions that a single blocking call can wait on.
///
/// Holds conditions by membership: they may outlive the wait set, and are
/// detached when it is dropped. Entities signal state changes through a
/// one-slot channel, so repeated signals before a wait coalesce into one
/// wakeup and the wait never spins.
pub struct WaitSet {
    id: WaitSetId,
    conditions: Vec<(ConditionId, Arc<dyn Condition>)>,
    next_condition: u64,
    sender: Sender<()>,
    receiver: Receiver<()>,
    waiting: AtomicBool,
}

impl WaitSet {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(1);
        Self {
            id: WaitSetId(NEXT_WAITSET_ID.fetch_add(1, Ordering::Relaxed)),
            conditions: Vec::new(),
            next_condition: 1,
            sender,
            receiver,
            waiting: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> WaitSetId {
        self.id
    }

    /// Attach a condition. Fails if it already belongs to another wait set.
    pub fn attach(&mut self, condition: Arc<dyn Condition>) -> Result<ConditionId> {
        let target = Arc::as_ptr(&condition) as *const ();
        if let Some((id, _)) = self
            .conditions
            .iter()
            .find(|(_, c)| Arc::as_ptr(c) as *const () == target)
        {
            return Ok(*id);
        }

        condition.on_attach(self.id, Waker::new(self.sender.clone()))?;
        let id = ConditionId(self.next_condition);
        self.next_condition += 1;
        self.conditions.push((id, condition));
        Ok(id)
    }

    /// Detach a condition. Returns false if it was not attached.
    pub fn detach(&mut self, id: ConditionId) -> bool {
        match self.conditions.iter().position(|(c, _)| *c == id) {
            Some(index) => {
                let (_, condition) = self.conditions.remove(index);
                condition.on_detach(self.id);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Block until at least one condition triggers or `timeout` elapses.
    ///
    /// Returns the triggered conditions in attach order, or an empty list
    /// on timeout. A timeout is not an error.
    pub fn wait(&self, timeout: Duration) -> Result<Vec<ConditionId>> {
        if self.waiting.swap(true, Ordering::SeqCst) {
            return Err(SubscriberError::PreconditionNotMet(
                "wait set is already being waited on".to_string(),
            ));
        }
        let result = self.wait_inner(timeout);
        self.waiting.store(false, Ordering::SeqCst);
        result
    }

    fn wait_inner(&self, timeout: Duration) -> Result<Vec<ConditionId>> {
        let deadline = Instant::now() + timeout;

        loop {
            let active = self.active_conditions()?;
            if !active.is_empty() {
                return Ok(active);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }

            match self.receiver.recv_timeout(remaining) {
                Ok(()) => trace!(waitset = self.id.0, "wait set woken"),
                Err(RecvTimeoutError::Timeout) => return self.active_conditions(),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SubscriberError::RuntimeFault(
                        "wait set wakeup channel closed".to_string(),
                    ));
                }
            }
        }
    }

    fn active_conditions(&self) -> Result<Vec<ConditionId>> {
        let mut active = Vec::new();
        for (id, condition) in &self.conditions {
            if condition.trigger_value()? {
                active.push(*id);
            }
        }
        Ok(active)
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitSet {
    fn drop(&mut self) {
        for (_, condition) in self.conditions.drain(..) {
            condition.on_detach(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::GuardCondition;
    use std::thread;

    #[test]
    fn test_timeout_returns_empty() {
        let mut waitset = WaitSet::new();
        waitset.attach(Arc::new(GuardCondition::new())).unwrap();

        let start = Instant::now();
        let active = waitset.wait(Duration::from_millis(30)).unwrap();
        assert!(active.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_guard_wakes_blocked_wait() {
        let guard = Arc::new(GuardCondition::new());
        let mut waitset = WaitSet::new();
        let id = waitset.attach(guard.clone()).unwrap();

        let trigger = guard.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.set_trigger_value(true);
        });

        let start = Instant::now();
        let active = waitset.wait(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(active, vec![id]);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_active_conditions_in_attach_order() {
        let first = Arc::new(GuardCondition::new());
        let second = Arc::new(GuardCondition::new());
        let mut waitset = WaitSet::new();
        let a = waitset.attach(first.clone()).unwrap();
        let b = waitset.attach(second.clone()).unwrap();

        second.set_trigger_value(true);
        first.set_trigger_value(true);
        assert_eq!(waitset.wait(Duration::from_millis(10)).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_condition_in_one_waitset_only() {
        let guard = Arc::new(GuardCondition::new());
        let mut first = WaitSet::new();
        let mut second = WaitSet::new();

        let id = first.attach(guard.clone()).unwrap();
        assert_eq!(first.attach(guard.clone()).unwrap(), id);
        assert!(matches!(
            second.attach(guard.clone()),
            Err(SubscriberError::PreconditionNotMet(_))
        ));

        assert!(first.detach(id));
        assert!(!first.detach(id));
        second.attach(guard.clone()).unwrap();
    }

    #[test]
    fn test_drop_releases_conditions() {
        let guard = Arc::new(GuardCondition::new());
        {
            let mut waitset = WaitSet::new();
            waitset.attach(guard.clone()).unwrap();
        }
        let mut other = WaitSet::new();
        assert!(other.attach(guard).is_ok());
    }
}
