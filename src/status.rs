//! Communication statuses reported by a data reader.

use crate::qos::QosPolicyId;
use crate::types::InstanceHandle;
use std::ops::BitOr;

/// Set of status kinds, used to restrict which changes wake a condition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StatusMask(u32);

impl StatusMask {
    pub const REQUESTED_INCOMPATIBLE_QOS: StatusMask = StatusMask(1 << 1);
    pub const SAMPLE_LOST: StatusMask = StatusMask(1 << 7);
    pub const SAMPLE_REJECTED: StatusMask = StatusMask(1 << 8);
    pub const DATA_AVAILABLE: StatusMask = StatusMask(1 << 10);
    pub const SUBSCRIPTION_MATCHED: StatusMask = StatusMask(1 << 14);

    pub const fn none() -> Self {
        StatusMask(0)
    }

    pub const fn all() -> Self {
        StatusMask(
            Self::REQUESTED_INCOMPATIBLE_QOS.0
                | Self::SAMPLE_LOST.0
                | Self::SAMPLE_REJECTED.0
                | Self::DATA_AVAILABLE.0
                | Self::SUBSCRIPTION_MATCHED.0,
        )
    }

    pub fn contains(&self, other: StatusMask) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn intersects(&self, other: StatusMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: StatusMask) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: StatusMask) {
        self.0 &= !other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StatusMask {
    type Output = StatusMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        StatusMask(self.0 | rhs.0)
    }
}

/// Requested QoS could not be matched against an offered QoS.
///
/// A notification, not an error: the reader keeps waiting for a compatible
/// writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestedIncompatibleQosStatus {
    /// Incompatible writers seen so far.
    pub total_count: u32,
    /// Change since the status was last read.
    pub total_count_change: u32,
    /// Policy that failed in the most recent incompatibility.
    pub last_policy_id: QosPolicyId,
    /// Per-policy failure counts.
    pub policies: Vec<(QosPolicyId, u32)>,
}

impl Default for RequestedIncompatibleQosStatus {
    fn default() -> Self {
        Self {
            total_count: 0,
            total_count_change: 0,
            last_policy_id: QosPolicyId::Invalid,
            policies: Vec::new(),
        }
    }
}

impl RequestedIncompatibleQosStatus {
    pub(crate) fn record(&mut self, failed: &[QosPolicyId]) {
        let Some(first) = failed.first() else {
            return;
        };
        self.total_count += 1;
        self.total_count_change += 1;
        self.last_policy_id = *first;
        for policy in failed {
            match self.policies.iter_mut().find(|(id, _)| id == policy) {
                Some((_, count)) => *count += 1,
                None => self.policies.push((*policy, 1)),
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionMatchedStatus {
    pub total_count: u32,
    pub total_count_change: u32,
    pub current_count: u32,
    pub current_count_change: i32,
    pub last_publication_handle: InstanceHandle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampleRejectedReason {
    #[default]
    NotRejected,
    SamplesLimit,
    InstancesLimit,
    SamplesPerInstanceLimit,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleRejectedStatus {
    pub total_count: u32,
    pub total_count_change: u32,
    pub last_reason: SampleRejectedReason,
    pub last_instance_handle: InstanceHandle,
}

/// Samples that arrived but could not be decoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SampleLostStatus {
    pub total_count: u32,
    pub total_count_change: u32,
}

/// All statuses of one reader plus the set of kinds changed since last read.
#[derive(Debug, Default)]
pub(crate) struct ReaderStatuses {
    pub requested_incompatible_qos: RequestedIncompatibleQosStatus,
    pub subscription_matched: SubscriptionMatchedStatus,
    pub sample_rejected: SampleRejectedStatus,
    pub sample_lost: SampleLostStatus,
    pub changes: StatusMask,
}

impl ReaderStatuses {
    pub fn take_requested_incompatible_qos(&mut self) -> RequestedIncompatibleQosStatus {
        let status = self.requested_incompatible_qos.clone();
        self.requested_incompatible_qos.total_count_change = 0;
        self.changes.remove(StatusMask::REQUESTED_INCOMPATIBLE_QOS);
        status
    }

    pub fn take_subscription_matched(&mut self) -> SubscriptionMatchedStatus {
        let status = self.subscription_matched.clone();
        self.subscription_matched.total_count_change = 0;
        self.subscription_matched.current_count_change = 0;
        self.changes.remove(StatusMask::SUBSCRIPTION_MATCHED);
        status
    }

    pub fn take_sample_rejected(&mut self) -> SampleRejectedStatus {
        let status = self.sample_rejected.clone();
        self.sample_rejected.total_count_change = 0;
        self.changes.remove(StatusMask::SAMPLE_REJECTED);
        status
    }

    pub fn take_sample_lost(&mut self) -> SampleLostStatus {
        let status = self.sample_lost.clone();
        self.sample_lost.total_count_change = 0;
        self.changes.remove(StatusMask::SAMPLE_LOST);
        status
    }
}
