//! Conditions and wait sets.
//!
//! A condition is a boolean trigger over some entity state. Conditions are
//! attached to a [`WaitSet`], and one blocking [`WaitSet::wait`] call returns
//! whichever of them are active:
//! - [`ReadCondition`]: the reader holds samples not yet taken
//! - [`StatusCondition`]: a reader status in the enabled mask changed
//! - [`GuardCondition`]: set by the application
//!
//! When several conditions are active at once they are reported in the
//! order they were attached.

mod condition;
mod reader;
mod waitset;

pub use condition::{Condition, GuardCondition, WaitSetId, Waker};
pub(crate) use condition::WakerRegistry;
pub use reader::{ReadCondition, StatusCondition};
pub use waitset::{ConditionId, WaitSet};
