//! Condition-driven event loop.
//!
//! The loop blocks on a single [`WaitSet`] and runs the reaction of every
//! condition the wait reports, one at a time, on the calling thread. When
//! several conditions are ready in the same wait, reactions run in the order
//! the conditions were attached.
//!
//! Exit is checked once per iteration, before blocking:
//! - the [`CancellationToken`] has been cancelled, or
//! - the running sample count has reached the configured target.

use crate::conditions::{Condition, ConditionId, GuardCondition, WaitSet};
use crate::drain::{drain_with, SampleView};
use crate::entities::EntityGraph;
use crate::error::{Result, SubscriberError};
use crate::status::StatusMask;
use crate::types::TopicType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default bound on a single wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared cancellation flag.
///
/// Clones observe the same flag. Cancelling also triggers a guard condition
/// so a loop blocked in a wait wakes up at once instead of at its timeout.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    wakeup: Arc<GuardCondition>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            info!("Cancellation requested");
        }
        self.wakeup.set_trigger_value(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn condition(&self) -> Arc<GuardCondition> {
        Arc::clone(&self.wakeup)
    }
}

/// State threaded through every reaction.
///
/// Only the loop thread touches it.
#[derive(Debug)]
pub struct RunState {
    samples_read: u64,
    cancel: CancellationToken,
}

impl RunState {
    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }

    pub fn add_samples(&mut self, count: usize) {
        self.samples_read += count as u64;
    }

    /// Ask the loop to stop at its next exit check.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }
}

/// A condition's reaction.
pub type Reaction = Box<dyn FnMut(&mut RunState) -> Result<()>>;

#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Samples to read before finishing. Zero runs until cancelled.
    pub sample_count: u64,
    /// Bound on each wait. Only bounds how late cancellation is noticed.
    pub wait_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            sample_count: 0,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl LoopConfig {
    fn target_reached(&self, samples_read: u64) -> bool {
        self.sample_count > 0 && samples_read >= self.sample_count
    }
}

/// Why the loop finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    TargetReached,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopOutcome {
    pub samples_read: u64,
    /// Waits performed.
    pub iterations: u64,
    pub exit: LoopExit,
}

pub struct EventLoop {
    waitset: WaitSet,
    reactions: Vec<(ConditionId, Reaction)>,
    config: LoopConfig,
    state: RunState,
    iterations: u64,
}

impl EventLoop {
    /// Create a loop observing `cancel`. Its wakeup condition is attached
    /// first.
    pub fn new(config: LoopConfig, cancel: CancellationToken) -> Result<Self> {
        let mut waitset = WaitSet::new();
        waitset.attach(cancel.condition())?;
        Ok(Self {
            waitset,
            reactions: Vec::new(),
            config,
            state: RunState {
                samples_read: 0,
                cancel,
            },
            iterations: 0,
        })
    }

    /// Wire a loop to an entity graph.
    ///
    /// The reader's read condition drains the reader, passes every sample to
    /// `on_sample` and adds the valid count to the running total. The
    /// reader's status condition runs the graph's incompatible-QoS handlers.
    pub fn for_graph<T, F>(
        graph: &mut EntityGraph<T>,
        config: LoopConfig,
        cancel: CancellationToken,
        on_sample: F,
    ) -> Result<Self>
    where
        T: TopicType,
        F: FnMut(SampleView<'_, T>) -> Result<()> + 'static,
    {
        let mut event_loop = Self::new(config, cancel)?;

        let reader = graph.reader().clone();
        let mut on_sample = on_sample;
        event_loop.add_reaction(
            graph.reader().create_read_condition(),
            move |state: &mut RunState| {
                let count = drain_with(&reader, &mut on_sample)?;
                state.add_samples(count);
                Ok(())
            },
        )?;

        let reader = graph.reader().clone();
        let status_condition = reader.status_condition();
        let mask = status_condition.enabled_statuses();
        let handlers = graph.incompatible_qos_handlers();
        event_loop.add_reaction(status_condition, move |_: &mut RunState| {
            let changes = reader.status_changes();
            let pending = |kind: StatusMask| mask.contains(kind) && changes.contains(kind);

            if pending(StatusMask::REQUESTED_INCOMPATIBLE_QOS) {
                let status = reader.requested_incompatible_qos_status();
                if status.total_count_change > 0 {
                    for handler in handlers.borrow_mut().iter_mut() {
                        handler(&status);
                    }
                }
            }
            if pending(StatusMask::SUBSCRIPTION_MATCHED) {
                let status = reader.subscription_matched_status();
                debug!(current = status.current_count, total = status.total_count, "Subscription matched");
            }
            if pending(StatusMask::SAMPLE_REJECTED) {
                let status = reader.sample_rejected_status();
                warn!(total = status.total_count, reason = ?status.last_reason, "Samples rejected");
            }
            if pending(StatusMask::SAMPLE_LOST) {
                let status = reader.sample_lost_status();
                warn!(total = status.total_count, "Samples lost");
            }
            Ok(())
        })?;

        Ok(event_loop)
    }

    /// Attach `condition` and run `reaction` whenever a wait reports it.
    pub fn add_reaction(
        &mut self,
        condition: Arc<dyn Condition>,
        reaction: impl FnMut(&mut RunState) -> Result<()> + 'static,
    ) -> Result<ConditionId> {
        let id = self.waitset.attach(condition)?;
        match self.reactions.iter_mut().find(|(c, _)| *c == id) {
            Some((_, existing)) => *existing = Box::new(reaction),
            None => self.reactions.push((id, Box::new(reaction))),
        }
        Ok(id)
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Run until cancelled or the target count is reached.
    ///
    /// A transport fault during a wait, or any error from a reaction, ends
    /// the loop and is returned.
    pub fn run(&mut self) -> Result<LoopOutcome> {
        info!(
            target_count = self.config.sample_count,
            timeout_ms = self.config.wait_timeout.as_millis() as u64,
            "Event loop started"
        );

        let exit = loop {
            if self.state.cancel.is_cancelled() {
                break LoopExit::Cancelled;
            }
            if self.config.target_reached(self.state.samples_read) {
                break LoopExit::TargetReached;
            }

            self.iterations += 1;
            let active = match self.waitset.wait(self.config.wait_timeout) {
                Ok(active) => active,
                Err(e) => {
                    error!(error = %e, iteration = self.iterations, "Wait failed");
                    return Err(e);
                }
            };
            if active.is_empty() {
                debug!(iteration = self.iterations, "Wait timed out");
                continue;
            }

            debug!(iteration = self.iterations, ready = active.len(), "Conditions ready");
            for id in active {
                let Some((_, reaction)) = self.reactions.iter_mut().find(|(c, _)| *c == id)
                else {
                    continue;
                };
                if let Err(e) = reaction(&mut self.state) {
                    error!(error = %e, iteration = self.iterations, "Reaction failed");
                    return Err(e);
                }
            }
        };

        let outcome = LoopOutcome {
            samples_read: self.state.samples_read,
            iterations: self.iterations,
            exit,
        };
        info!(
            samples_read = outcome.samples_read,
            iterations = outcome.iterations,
            exit = ?outcome.exit,
            "Event loop finished"
        );
        Ok(outcome)
    }
}

/// Whether `error` ended a loop because of the transport.
pub fn is_fatal_fault(error: &SubscriberError) -> bool {
    matches!(
        error,
        SubscriberError::RuntimeFault(_) | SubscriberError::Corruption(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_cancelled_before_run_exits_without_waiting() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut event_loop = EventLoop::new(LoopConfig::default(), cancel).unwrap();
        let outcome = event_loop.run().unwrap();
        assert_eq!(outcome.exit, LoopExit::Cancelled);
        assert_eq!(outcome.iterations, 0);
    }

    #[test]
    fn test_cancel_wakes_blocked_wait() {
        let cancel = CancellationToken::new();
        let config = LoopConfig {
            sample_count: 3,
            wait_timeout: Duration::from_secs(30),
        };
        let mut event_loop = EventLoop::new(config, cancel.clone()).unwrap();

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        });
        let start = Instant::now();
        let outcome = event_loop.run().unwrap();
        canceller.join().unwrap();

        assert_eq!(outcome.exit, LoopExit::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_reactions_run_in_attach_order() {
        let cancel = CancellationToken::new();
        let mut event_loop = EventLoop::new(LoopConfig::default(), cancel).unwrap();

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let first = Arc::new(GuardCondition::new());
        let second = Arc::new(GuardCondition::new());

        let seen = Arc::clone(&order);
        let guard = Arc::clone(&second);
        event_loop
            .add_reaction(second.clone(), move |_: &mut RunState| {
                seen.lock().push("second");
                guard.set_trigger_value(false);
                Ok(())
            })
            .unwrap();
        let seen = Arc::clone(&order);
        let guard = Arc::clone(&first);
        event_loop
            .add_reaction(first.clone(), move |state: &mut RunState| {
                seen.lock().push("first");
                guard.set_trigger_value(false);
                state.request_stop();
                Ok(())
            })
            .unwrap();

        first.set_trigger_value(true);
        second.set_trigger_value(true);
        let outcome = event_loop.run().unwrap();

        assert_eq!(outcome.exit, LoopExit::Cancelled);
        assert_eq!(*order.lock(), vec!["second", "first"]);
    }

    #[test]
    fn test_reaction_error_ends_loop() {
        let cancel = CancellationToken::new();
        let mut event_loop = EventLoop::new(LoopConfig::default(), cancel).unwrap();
        let trigger = Arc::new(GuardCondition::new());
        event_loop
            .add_reaction(trigger.clone(), |_: &mut RunState| {
                Err(SubscriberError::RuntimeFault("boom".to_string()))
            })
            .unwrap();
        trigger.set_trigger_value(true);

        let err = event_loop.run().unwrap_err();
        assert!(is_fatal_fault(&err));
    }

    #[test]
    fn test_target_count_ends_loop() {
        let cancel = CancellationToken::new();
        let config = LoopConfig {
            sample_count: 2,
            ..Default::default()
        };
        let mut event_loop = EventLoop::new(config, cancel).unwrap();
        let trigger = Arc::new(GuardCondition::new());
        trigger.set_trigger_value(true);
        event_loop
            .add_reaction(trigger, |state: &mut RunState| {
                state.add_samples(1);
                Ok(())
            })
            .unwrap();

        let outcome = event_loop.run().unwrap();
        assert_eq!(outcome.exit, LoopExit::TargetReached);
        assert_eq!(outcome.samples_read, 2);
        assert_eq!(outcome.iterations, 2);
    }

    #[test]
    fn test_handler_registered_after_wiring_fires() {
        use crate::domain::Domain;
        use crate::pose::{Pose, POSE_TOPIC_NAME};
        use crate::qos::{DataWriterQos, Durability, QosBundle, QosPolicyId};
        use crate::types::DomainId;
        use std::cell::RefCell;
        use std::rc::Rc;

        let domain = Domain::new(DomainId(0));
        let mut bundle = QosBundle::default();
        bundle.reader.durability = Durability::TransientLocal;
        let mut graph =
            EntityGraph::<Pose>::create(&domain, &bundle, POSE_TOPIC_NAME, None).unwrap();

        let cancel = CancellationToken::new();
        let config = LoopConfig {
            sample_count: 1,
            wait_timeout: Duration::from_millis(50),
        };
        let mut event_loop =
            EventLoop::for_graph(&mut graph, config, cancel.clone(), |_| Ok(())).unwrap();

        let notices = Rc::new(RefCell::new(Vec::new()));
        {
            let notices = Rc::clone(&notices);
            graph.on_incompatible_qos(move |status| {
                notices.borrow_mut().push(status.last_policy_id);
                cancel.cancel();
            });
        }
        let _volatile = domain
            .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
            .unwrap();

        let outcome = event_loop.run().unwrap();
        assert_eq!(outcome.exit, LoopExit::Cancelled);
        assert_eq!(*notices.borrow(), vec![QosPolicyId::Durability]);

        drop(event_loop);
        graph.teardown().unwrap();
    }
}
