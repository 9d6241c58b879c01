//! The `Pose` subscriber application: resolve, build, loop, tear down.

use crate::domain::Domain;
use crate::drain::SampleView;
use crate::entities::EntityGraph;
use crate::error::{Result, SubscriberError};
use crate::event_loop::{
    is_fatal_fault, CancellationToken, EventLoop, LoopConfig, LoopOutcome, DEFAULT_WAIT_TIMEOUT,
};
use crate::filter::FilterExpression;
use crate::pose::{Pose, POSE_TOPIC_NAME, QOS_LIBRARY, QOS_PROFILE, QOS_PROFILES_URI};
use crate::qos::QosProvider;
use crate::types::DomainId;
use std::time::Duration;
use tracing::{error, info, warn};

/// Run parameters supplied by the command-line collaborator.
#[derive(Clone, Debug)]
pub struct SubscriberConfig {
    pub domain_id: DomainId,
    /// Samples to read before exiting. Zero runs until cancelled.
    pub sample_count: u64,
    pub qos_uri: String,
    /// `library::profile`.
    pub qos_profile: String,
    pub topic_name: String,
    pub filter: Option<FilterExpression>,
    pub wait_timeout: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            domain_id: DomainId(0),
            sample_count: 0,
            qos_uri: QOS_PROFILES_URI.to_string(),
            qos_profile: format!("{}::{}", QOS_LIBRARY, QOS_PROFILE),
            topic_name: POSE_TOPIC_NAME.to_string(),
            filter: Some(FilterExpression::new("position.x >= 0")),
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Subscribe to `Pose` samples on `domain` until `cancel` fires or the
/// configured count has been read.
///
/// Configuration and creation errors return before any entity exists. A
/// fault while running tears the entities down before it is returned.
pub fn run_subscriber_application(
    domain: &Domain,
    config: &SubscriberConfig,
    cancel: CancellationToken,
) -> Result<LoopOutcome> {
    if config.domain_id != domain.id() {
        return Err(SubscriberError::entity_creation(
            "participant",
            format!(
                "configured domain {} does not match domain {}",
                config.domain_id,
                domain.id()
            ),
        ));
    }

    let bundle = QosProvider::global().resolve(&config.qos_uri, &config.qos_profile)?;
    let mut graph = EntityGraph::<Pose>::create(
        domain,
        &bundle,
        &config.topic_name,
        config.filter.clone(),
    )?;
    graph.on_incompatible_qos(|status| {
        warn!(
            total_count = status.total_count,
            total_count_change = status.total_count_change,
            policy = %status.last_policy_id,
            "Incompatible QoS offered"
        );
    });

    let result = run_loop(&mut graph, config, cancel);
    match result {
        Ok(outcome) => {
            graph.teardown()?;
            info!(samples_read = outcome.samples_read, exit = ?outcome.exit, "Subscriber finished");
            Ok(outcome)
        }
        Err(e) => {
            if is_fatal_fault(&e) {
                error!(error = %e, "Subscriber stopped by runtime fault");
            }
            if let Err(teardown) = graph.teardown() {
                warn!(error = %teardown, "Teardown after failure did not complete");
            }
            Err(e)
        }
    }
}

fn run_loop(
    graph: &mut EntityGraph<Pose>,
    config: &SubscriberConfig,
    cancel: CancellationToken,
) -> Result<LoopOutcome> {
    let loop_config = LoopConfig {
        sample_count: config.sample_count,
        wait_timeout: config.wait_timeout,
    };
    let mut event_loop = EventLoop::for_graph(graph, loop_config, cancel, |view| {
        if let SampleView::Data { data, .. } = view {
            info!(pose = %data, "Received");
        }
        Ok(())
    })?;
    event_loop.run()
}

/// Process exit code for the result of a run: zero on success.
pub fn exit_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.exit_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_names_pose_profile() {
        let config = SubscriberConfig::default();
        assert_eq!(config.qos_profile, "MyQosLibrary::MyQosProfile");
        assert_eq!(config.topic_name, POSE_TOPIC_NAME);
        assert_eq!(config.wait_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&Ok(())), 0);
        let err: Result<()> = Err(SubscriberError::RuntimeFault("down".to_string()));
        assert_ne!(exit_code(&err), 0);
    }

    #[test]
    fn test_domain_mismatch_is_creation_error() {
        let domain = Domain::new(DomainId(1));
        let result = run_subscriber_application(
            &domain,
            &SubscriberConfig::default(),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(SubscriberError::EntityCreation { .. })));
    }
}
