//! Typed QoS policies and the per-entity QoS sets built from them.

use crate::error::{Result, SubscriberError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How long data outlives the writer that sent it. Ordered weakest first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Durability {
    #[default]
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

/// Delivery guarantee. Ordered weakest first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reliability {
    #[default]
    BestEffort,
    Reliable,
}

/// How many samples per instance are kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum History {
    KeepLast { depth: u32 },
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        History::KeepLast { depth: 1 }
    }
}

/// Buffer capacity bounds. `None` means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    pub max_samples: Option<u32>,
    pub max_instances: Option<u32>,
    pub max_samples_per_instance: Option<u32>,
}

/// Maximum expected interval between samples of an instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Deadline {
    /// `None` is an infinite period.
    pub period_ms: Option<u64>,
}

impl Deadline {
    pub fn period(&self) -> Option<Duration> {
        self.period_ms.map(Duration::from_millis)
    }
}

/// Identifier of a QoS policy, using the standard numeric ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QosPolicyId {
    Invalid,
    Durability,
    Deadline,
    Reliability,
    History,
    ResourceLimits,
}

impl QosPolicyId {
    pub fn id(&self) -> u32 {
        match self {
            QosPolicyId::Invalid => 0,
            QosPolicyId::Durability => 2,
            QosPolicyId::Deadline => 4,
            QosPolicyId::Reliability => 11,
            QosPolicyId::History => 13,
            QosPolicyId::ResourceLimits => 14,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QosPolicyId::Invalid => "INVALID",
            QosPolicyId::Durability => "DURABILITY",
            QosPolicyId::Deadline => "DEADLINE",
            QosPolicyId::Reliability => "RELIABILITY",
            QosPolicyId::History => "HISTORY",
            QosPolicyId::ResourceLimits => "RESOURCE_LIMITS",
        }
    }
}

impl fmt::Display for QosPolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainParticipantQos {
    pub entity_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopicQos {
    pub durability: Durability,
    pub reliability: Reliability,
    pub history: History,
    pub deadline: Deadline,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriberQos {
    /// Partitions this subscriber joins. Empty means the default partition.
    pub partition: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataReaderQos {
    pub durability: Durability,
    pub reliability: Reliability,
    pub history: History,
    pub resource_limits: ResourceLimits,
    pub deadline: Deadline,
}

impl DataReaderQos {
    /// Reject policy combinations no reader can honour.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.resource_limits;
        for (name, value) in [
            ("max_samples", limits.max_samples),
            ("max_instances", limits.max_instances),
            ("max_samples_per_instance", limits.max_samples_per_instance),
        ] {
            if value == Some(0) {
                return Err(SubscriberError::inconsistent(
                    QosPolicyId::ResourceLimits.name(),
                    format!("{} must be positive", name),
                ));
            }
        }

        if let (Some(total), Some(per_instance)) =
            (limits.max_samples, limits.max_samples_per_instance)
        {
            if total < per_instance {
                return Err(SubscriberError::inconsistent(
                    QosPolicyId::ResourceLimits.name(),
                    format!(
                        "max_samples ({}) is below max_samples_per_instance ({})",
                        total, per_instance
                    ),
                ));
            }
        }

        if let History::KeepLast { depth } = self.history {
            if depth == 0 {
                return Err(SubscriberError::inconsistent(
                    QosPolicyId::History.name(),
                    "KEEP_LAST depth must be positive",
                ));
            }
            if let Some(per_instance) = limits.max_samples_per_instance {
                if depth > per_instance {
                    return Err(SubscriberError::inconsistent(
                        QosPolicyId::History.name(),
                        format!(
                            "KEEP_LAST depth ({}) exceeds max_samples_per_instance ({})",
                            depth, per_instance
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// QoS offered by a remote writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataWriterQos {
    pub durability: Durability,
    pub reliability: Reliability,
    pub history: History,
    pub deadline: Deadline,
    pub partition: Vec<String>,
}

impl Default for DataWriterQos {
    fn default() -> Self {
        Self {
            durability: Durability::Volatile,
            reliability: Reliability::Reliable,
            history: History::default(),
            deadline: Deadline::default(),
            partition: Vec::new(),
        }
    }
}

/// Policies for which `offered` does not satisfy `requested`, in check order.
pub fn incompatible_policies(
    requested: &DataReaderQos,
    offered: &DataWriterQos,
) -> Vec<QosPolicyId> {
    let mut failed = Vec::new();

    if offered.durability < requested.durability {
        failed.push(QosPolicyId::Durability);
    }

    if offered.reliability < requested.reliability {
        failed.push(QosPolicyId::Reliability);
    }

    match (requested.deadline.period_ms, offered.deadline.period_ms) {
        (None, _) => {}
        (Some(_), None) => failed.push(QosPolicyId::Deadline),
        (Some(req), Some(off)) if off > req => failed.push(QosPolicyId::Deadline),
        _ => {}
    }

    failed
}

fn effective_partitions(partition: &[String]) -> Vec<String> {
    if partition.is_empty() {
        vec![String::new()]
    } else {
        partition.to_vec()
    }
}

/// True when the two partition lists share at least one name.
pub(crate) fn partitions_overlap(a: &[String], b: &[String]) -> bool {
    let a = effective_partitions(a);
    let b = effective_partitions(b);
    a.iter().any(|name| b.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weaker_durability_is_incompatible() {
        let requested = DataReaderQos {
            durability: Durability::TransientLocal,
            ..Default::default()
        };
        let offered = DataWriterQos::default();
        assert_eq!(
            incompatible_policies(&requested, &offered),
            vec![QosPolicyId::Durability]
        );
    }

    #[test]
    fn test_stronger_offer_is_compatible() {
        let requested = DataReaderQos {
            reliability: Reliability::Reliable,
            deadline: Deadline { period_ms: Some(100) },
            ..Default::default()
        };
        let offered = DataWriterQos {
            durability: Durability::Persistent,
            deadline: Deadline { period_ms: Some(50) },
            ..Default::default()
        };
        assert!(incompatible_policies(&requested, &offered).is_empty());
    }

    #[test]
    fn test_infinite_offered_deadline_fails_finite_request() {
        let requested = DataReaderQos {
            deadline: Deadline { period_ms: Some(10) },
            ..Default::default()
        };
        let offered = DataWriterQos {
            reliability: Reliability::BestEffort,
            ..Default::default()
        };
        assert_eq!(
            incompatible_policies(&requested, &offered),
            vec![QosPolicyId::Deadline]
        );
    }

    #[test]
    fn test_keep_last_depth_above_limit_is_inconsistent() {
        let qos = DataReaderQos {
            history: History::KeepLast { depth: 10 },
            resource_limits: ResourceLimits {
                max_samples_per_instance: Some(4),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            qos.validate(),
            Err(SubscriberError::InconsistentPolicy { .. })
        ));
    }

    #[test]
    fn test_zero_depth_is_inconsistent() {
        let qos = DataReaderQos {
            history: History::KeepLast { depth: 0 },
            ..Default::default()
        };
        assert!(qos.validate().is_err());
        assert!(DataReaderQos::default().validate().is_ok());
    }

    #[test]
    fn test_default_partition_matching() {
        assert!(partitions_overlap(&[], &[]));
        assert!(!partitions_overlap(&["a".into()], &[]));
        assert!(partitions_overlap(&["a".into(), "b".into()], &["b".into()]));
    }

    #[test]
    fn test_policy_id_display() {
        assert_eq!(QosPolicyId::Durability.to_string(), "DURABILITY (2)");
        assert_eq!(QosPolicyId::Reliability.id(), 11);
    }
}
