//! Error types for the subscriber.

use thiserror::Error;

/// Main error type for subscriber operations.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("QoS configuration error in {source_uri} ({profile}): {reason}")]
    Configuration {
        source_uri: String,
        profile: String,
        reason: String,
    },

    #[error("Invalid filter expression \"{expression}\": {reason}")]
    InvalidFilter { expression: String, reason: String },

    #[error("Failed to create {entity}: {reason}")]
    EntityCreation { entity: String, reason: String },

    #[error("Inconsistent {policy} policy: {reason}")]
    InconsistentPolicy { policy: String, reason: String },

    #[error("Runtime fault: {0}")]
    RuntimeFault(String),

    #[error("Precondition not met: {0}")]
    PreconditionNotMet(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),
}

impl SubscriberError {
    pub(crate) fn configuration(
        source_uri: impl Into<String>,
        profile: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SubscriberError::Configuration {
            source_uri: source_uri.into(),
            profile: profile.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_filter(expression: &str, reason: impl Into<String>) -> Self {
        SubscriberError::InvalidFilter {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn entity_creation(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        SubscriberError::EntityCreation {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn inconsistent(policy: &str, reason: impl Into<String>) -> Self {
        SubscriberError::InconsistentPolicy {
            policy: policy.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors raised before any entity exists.
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            SubscriberError::Configuration { .. }
                | SubscriberError::InvalidFilter { .. }
                | SubscriberError::EntityCreation { .. }
                | SubscriberError::InconsistentPolicy { .. }
        )
    }

    /// Process exit code reported for this error. Always non-zero.
    pub fn exit_code(&self) -> i32 {
        match self {
            SubscriberError::Configuration { .. } => 2,
            SubscriberError::InvalidFilter { .. } => 3,
            SubscriberError::EntityCreation { .. } | SubscriberError::InconsistentPolicy { .. } => 4,
            SubscriberError::RuntimeFault(_) | SubscriberError::Corruption(_) => 5,
            _ => 1,
        }
    }
}

impl From<serde_json::Error> for SubscriberError {
    fn from(e: serde_json::Error) -> Self {
        SubscriberError::Deserialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SubscriberError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SubscriberError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SubscriberError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SubscriberError::Deserialization(e.to_string())
    }
}

/// Result type for subscriber operations.
pub type Result<T> = std::result::Result<T, SubscriberError>;
