//! Integration tests for the subscriber.

use domain_subscriber::{
    drain, exit_code, run_subscriber_application, CancellationToken, DataWriterQos, Domain,
    DomainId, Durability, EntityGraph, EventLoop, FilterExpression, LoopConfig, LoopExit, Pose,
    QosBundle, QosPolicyId, RequestedIncompatibleQosStatus, SampleView, SubscriberConfig,
    SubscriberError, POSE_TOPIC_NAME,
};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const PROFILES: &str = r#"{
    "qos_library": [{
        "name": "MyQosLibrary",
        "qos_profile": [{
            "name": "MyQosProfile",
            "participant_qos": { "entity_name": "pose-subscriber" },
            "datareader_qos": {
                "durability": "TRANSIENT_LOCAL",
                "reliability": "RELIABLE",
                "history": { "kind": "KEEP_LAST", "depth": 4 }
            }
        }]
    }]
}"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn write_profiles(dir: &TempDir) -> String {
    let path = dir.path().join("MY_QOS_PROFILES.json");
    fs::write(&path, PROFILES).unwrap();
    format!("file://{}", path.display())
}

fn test_config(dir: &TempDir, sample_count: u64) -> SubscriberConfig {
    SubscriberConfig {
        qos_uri: write_profiles(dir),
        sample_count,
        wait_timeout: Duration::from_millis(50),
        ..Default::default()
    }
}

fn durable_writer() -> DataWriterQos {
    DataWriterQos {
        durability: Durability::TransientLocal,
        ..Default::default()
    }
}

// --- Content Filter Scenarios ---

#[test]
fn test_filter_suppresses_negative_positions() {
    let domain = Domain::new(DomainId(0));
    let graph = EntityGraph::<Pose>::create(
        &domain,
        &QosBundle::default(),
        POSE_TOPIC_NAME,
        Some(FilterExpression::new("position.x >= 0")),
    )
    .unwrap();
    let writer = domain
        .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
        .unwrap();

    writer.write(&Pose::at("a", -1.0, 0.0, 0.0)).unwrap();
    writer.write(&Pose::at("b", 0.0, 0.0, 0.0)).unwrap();
    writer.write(&Pose::at("c", 5.0, 0.0, 0.0)).unwrap();

    // Filtered samples never reach the buffer
    assert_eq!(graph.reader().buffered(), 2);

    let drained = drain(graph.reader()).unwrap();
    assert_eq!(drained.count, 2);
    let xs: Vec<f64> = drained
        .loan
        .iter()
        .filter_map(|s| s.data())
        .map(|p| p.position.x)
        .collect();
    assert_eq!(xs, vec![0.0, 5.0]);
}

#[test]
fn test_application_reads_durable_history_through_filter() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let domain = Domain::new(DomainId(0));
    let writer = domain
        .announce_writer::<Pose>(POSE_TOPIC_NAME, durable_writer())
        .unwrap();
    writer.write(&Pose::at("a", -1.0, 0.0, 0.0)).unwrap();
    writer.write(&Pose::at("b", 0.0, 0.0, 0.0)).unwrap();
    writer.write(&Pose::at("c", 5.0, 0.0, 0.0)).unwrap();

    let start = Instant::now();
    let result =
        run_subscriber_application(&domain, &test_config(&dir, 2), CancellationToken::new());
    let outcome = result.unwrap();

    assert_eq!(outcome.exit, LoopExit::TargetReached);
    assert_eq!(outcome.samples_read, 2);
    assert!(start.elapsed() < Duration::from_secs(5));
    // Teardown removed the reader
    assert_eq!(writer.matched_readers(), 0);
}

// --- Loop Termination ---

#[test]
fn test_no_publisher_runs_until_cancelled() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let domain = Domain::new(DomainId(0));
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(250));
            cancel.cancel();
        })
    };

    let start = Instant::now();
    let outcome = run_subscriber_application(&domain, &test_config(&dir, 3), cancel).unwrap();
    canceller.join().unwrap();

    assert_eq!(outcome.exit, LoopExit::Cancelled);
    assert_eq!(outcome.samples_read, 0);
    assert!(outcome.iterations >= 1);
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_running_count_matches_drained_samples() {
    let domain = Domain::new(DomainId(0));
    let mut graph =
        EntityGraph::<Pose>::create(&domain, &QosBundle::default(), POSE_TOPIC_NAME, None)
            .unwrap();
    let writer = domain
        .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
        .unwrap();

    for id in ["a", "b", "c", "d", "e"] {
        writer.write(&Pose::at(id, 1.0, 0.0, 0.0)).unwrap();
    }
    writer.dispose(&Pose::at("a", 0.0, 0.0, 0.0)).unwrap();
    writer.dispose(&Pose::at("b", 0.0, 0.0, 0.0)).unwrap();

    let views = Arc::new(Mutex::new((0u64, 0u64)));
    let seen = Arc::clone(&views);
    let config = LoopConfig {
        sample_count: 5,
        wait_timeout: Duration::from_millis(50),
    };
    let outcome = {
        let mut event_loop =
            EventLoop::for_graph(&mut graph, config, CancellationToken::new(), move |view| {
                let mut counts = seen.lock();
                match view {
                    SampleView::Data { .. } => counts.0 += 1,
                    SampleView::StateChange { .. } => counts.1 += 1,
                }
                Ok(())
            })
            .unwrap();
        event_loop.run().unwrap()
    };

    let (data, state_changes) = *views.lock();
    assert_eq!(outcome.exit, LoopExit::TargetReached);
    assert_eq!(outcome.samples_read, data);
    assert_eq!(data, 5);
    assert_eq!(state_changes, 2);

    graph.teardown().unwrap();
}

// --- QoS Scenarios ---

#[test]
fn test_unknown_profile_aborts_before_entities_exist() {
    let dir = TempDir::new().unwrap();
    let domain = Domain::new(DomainId(0));
    let writer = domain
        .announce_writer::<Pose>(POSE_TOPIC_NAME, durable_writer())
        .unwrap();

    let config = SubscriberConfig {
        qos_profile: "MyQosLibrary::NoSuchProfile".to_string(),
        ..test_config(&dir, 1)
    };
    let result = run_subscriber_application(&domain, &config, CancellationToken::new());

    assert!(matches!(result, Err(SubscriberError::Configuration { .. })));
    assert_ne!(exit_code(&result), 0);
    assert_eq!(writer.matched_readers(), 0);
}

#[test]
fn test_weaker_offered_durability_is_a_notice() {
    let domain = Domain::new(DomainId(0));
    let mut bundle = QosBundle::default();
    bundle.reader.durability = Durability::TransientLocal;
    let mut graph =
        EntityGraph::<Pose>::create(&domain, &bundle, POSE_TOPIC_NAME, None).unwrap();

    let cancel = CancellationToken::new();
    let notices: Arc<Mutex<Vec<RequestedIncompatibleQosStatus>>> = Arc::default();
    {
        let notices = Arc::clone(&notices);
        let cancel = cancel.clone();
        graph.on_incompatible_qos(move |status| {
            notices.lock().push(status.clone());
            cancel.cancel();
        });
    }

    // Counterpart shows up after the reader, offering volatile durability
    let volatile = domain
        .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
        .unwrap();
    assert_eq!(volatile.matched_readers(), 0);

    let config = LoopConfig {
        sample_count: 1,
        wait_timeout: Duration::from_millis(50),
    };
    let outcome = {
        let mut event_loop =
            EventLoop::for_graph(&mut graph, config, cancel, |_| Ok(())).unwrap();
        event_loop.run().unwrap()
    };
    assert_eq!(outcome.exit, LoopExit::Cancelled);

    let notices = notices.lock();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].total_count, 1);
    assert_eq!(notices[0].total_count_change, 1);
    assert_eq!(notices[0].last_policy_id, QosPolicyId::Durability);

    // The reader stays usable for a compatible counterpart
    let durable = domain
        .announce_writer::<Pose>(POSE_TOPIC_NAME, durable_writer())
        .unwrap();
    durable.write(&Pose::at("a", 1.0, 1.0, 1.0)).unwrap();
    assert_eq!(drain(graph.reader()).unwrap().count, 1);

    graph.teardown().unwrap();
}

#[test]
fn test_partitions_must_overlap_to_match() {
    let domain = Domain::new(DomainId(0));
    let mut bundle = QosBundle::default();
    bundle.subscriber.partition = vec!["robots".to_string()];
    let graph = EntityGraph::<Pose>::create(&domain, &bundle, POSE_TOPIC_NAME, None).unwrap();

    let elsewhere = domain
        .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
        .unwrap();
    let same = domain
        .announce_writer::<Pose>(
            POSE_TOPIC_NAME,
            DataWriterQos {
                partition: vec!["robots".to_string()],
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(elsewhere.matched_readers(), 0);
    assert_eq!(same.matched_readers(), 1);
    assert_eq!(graph.reader().subscription_matched_status().current_count, 1);
}

// --- Instance Lifecycle ---

#[test]
fn test_writer_drop_reports_no_writers() {
    let domain = Domain::new(DomainId(0));
    let graph =
        EntityGraph::<Pose>::create(&domain, &QosBundle::default(), POSE_TOPIC_NAME, None)
            .unwrap();
    let writer = domain
        .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
        .unwrap();
    writer.write(&Pose::at("arm", 1.0, 0.0, 0.0)).unwrap();
    drop(drain(graph.reader()).unwrap());

    drop(writer);

    let drained = drain(graph.reader()).unwrap();
    assert_eq!(drained.count, 0);
    assert_eq!(drained.loan.len(), 1);
    let sample = drained.loan.iter().next().unwrap();
    assert!(!sample.is_valid());
    assert_eq!(
        sample.info().instance_state,
        domain_subscriber::InstanceState::NotAliveNoWriters
    );

    let matched = graph.reader().subscription_matched_status();
    assert_eq!(matched.total_count, 1);
    assert_eq!(matched.current_count, 0);
}

#[test]
fn test_keep_last_replaces_oldest_per_instance() {
    let domain = Domain::new(DomainId(0));
    let mut bundle = QosBundle::default();
    bundle.reader.history = domain_subscriber::History::KeepLast { depth: 2 };
    let graph = EntityGraph::<Pose>::create(&domain, &bundle, POSE_TOPIC_NAME, None).unwrap();
    let writer = domain
        .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
        .unwrap();

    for i in 0..5 {
        writer.write(&Pose::at("arm", i as f64, 0.0, 0.0)).unwrap();
    }
    writer.write(&Pose::at("leg", 9.0, 0.0, 0.0)).unwrap();

    let drained = drain(graph.reader()).unwrap();
    let xs: Vec<f64> = drained
        .loan
        .iter()
        .filter_map(|s| s.data())
        .map(|p| p.position.x)
        .collect();
    assert_eq!(xs, vec![3.0, 4.0, 9.0]);
}
