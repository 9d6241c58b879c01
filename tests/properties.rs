//! Property tests: resolution idempotence, filter determinism, loss-free drain.

use domain_subscriber::{
    drain, CompiledFilter, DataWriterQos, Domain, DomainId, EntityGraph, FilterExpression,
    History, Pose, QosBundle, QosProvider, POSE_TOPIC_NAME,
};
use proptest::prelude::*;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn durability_name() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["VOLATILE", "TRANSIENT_LOCAL", "TRANSIENT", "PERSISTENT"])
}

proptest! {
    #[test]
    fn prop_resolve_is_idempotent(depth in 1u32..64, durability in durability_name()) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("qos.json");
        let document = format!(
            r#"{{"qos_library":[{{"name":"Lib","qos_profile":[
                {{"name":"Base","datareader_qos":{{"durability":"{}"}}}},
                {{"name":"Derived","base_name":"Base",
                  "datareader_qos":{{"history":{{"kind":"KEEP_LAST","depth":{}}}}}}}
            ]}}]}}"#,
            durability, depth
        );
        fs::write(&path, document).unwrap();
        let uri = format!("file://{}", path.display());

        let provider = QosProvider::new();
        let first = provider.resolve(&uri, "Lib::Derived").unwrap();
        let second = provider.resolve(&uri, "Lib::Derived").unwrap();
        prop_assert!(Arc::ptr_eq(&first, &second));
        prop_assert_eq!(provider.cached_profiles(), 1);

        let fresh = QosProvider::new().resolve(&uri, "Lib::Derived").unwrap();
        prop_assert_eq!(&*first, &*fresh);
        prop_assert_eq!(first.reader.history, History::KeepLast { depth });
    }

    #[test]
    fn prop_threshold_filter_is_deterministic(
        threshold in -1000i32..1000,
        x in -2000.0f64..2000.0,
    ) {
        let filter = CompiledFilter::for_type::<Pose>(
            &FilterExpression::new(format!("position.x >= {}", threshold)),
        ).unwrap();
        let pose = Pose::at("arm", x, 0.0, 0.0);

        let once = filter.evaluate(&pose);
        prop_assert_eq!(once, filter.evaluate(&pose));
        prop_assert_eq!(once, x >= threshold as f64);
    }

    #[test]
    fn prop_drain_is_loss_free_and_duplicate_free(
        writes in prop::collection::vec((0usize..4, -100.0f64..100.0), 0..40),
    ) {
        let domain = Domain::new(DomainId(0));
        let mut bundle = QosBundle::default();
        bundle.reader.history = History::KeepAll;
        let graph = EntityGraph::<Pose>::create(&domain, &bundle, POSE_TOPIC_NAME, None).unwrap();
        let writer = domain
            .announce_writer::<Pose>(POSE_TOPIC_NAME, DataWriterQos::default())
            .unwrap();

        let ids = ["arm", "leg", "head", "tail"];
        for (id, x) in &writes {
            writer.write(&Pose::at(ids[*id], *x, 0.0, 0.0)).unwrap();
        }

        let drained = drain(graph.reader()).unwrap();
        prop_assert_eq!(drained.count, writes.len());
        let taken: Vec<(String, f64)> = drained
            .loan
            .iter()
            .filter_map(|s| s.data())
            .map(|p| (p.object_id.clone(), p.position.x))
            .collect();
        let expected: Vec<(String, f64)> = writes
            .iter()
            .map(|(id, x)| (ids[*id].to_string(), *x))
            .collect();
        prop_assert_eq!(taken, expected);
        drop(drained);

        prop_assert_eq!(drain(graph.reader()).unwrap().count, 0);
    }
}
