//! Property-based tests for determinism guarantees

use cairn::cas::ContentStore;
use cairn::graph::{DagNode, MetadataDag};
use cairn::hasher;
use cairn::telemetry::RecordingSink;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

/// Digest computation is a pure function of the input bytes.
#[test]
fn test_digest_determinism_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(any::<Vec<u8>>(), any::<Vec<u8>>()), |(a, b)| {
            let da = hasher::digest_bytes(&a);
            let db = hasher::digest_bytes(&b);

            if a == b {
                assert_eq!(da, db);
            }
            if a != b {
                // Collisions are treated as negligible, not guarded
                // against; in practice this always holds.
                prop_assume!(da != db);
            }

            Ok(())
        })
        .unwrap();
}

/// Storing the same payload any number of times leaves exactly one blob
/// and always returns the same digest.
#[test]
fn test_idempotent_store_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(any::<HashMap<String, i64>>(), 1usize..5),
            |(map, repeats)| {
                let dir = TempDir::new().unwrap();
                let store =
                    ContentStore::new(dir.path(), Arc::new(RecordingSink::new())).unwrap();

                let payload = json!(map);
                let first = store.store(&payload).unwrap();
                for _ in 0..repeats {
                    assert_eq!(store.store(&payload).unwrap(), first);
                }
                assert_eq!(store.list().unwrap(), vec![first]);
                assert_eq!(store.retrieve(&first).unwrap(), payload);

                Ok(())
            },
        )
        .unwrap();
}

/// Random DAG out of a fixed node set: edges only point from lower to
/// higher node index, so the graph is acyclic by construction.
fn arbitrary_dag() -> impl Strategy<Value = MetadataDag> {
    (2usize..12, any::<u64>()).prop_map(|(n, seed)| {
        let mut dag = MetadataDag::new();
        for i in 0..n {
            let digest = hasher::digest_bytes(format!("node-{}", i).as_bytes());
            let mut deps = Vec::new();
            for j in 0..i {
                // Pseudo-random subset of earlier nodes as deps.
                if (seed >> ((i * 7 + j) % 63)) & 1 == 1 {
                    deps.push(format!("n{}", j));
                }
            }
            dag.add_node(DagNode::completed(format!("n{}", i), digest, deps))
                .unwrap();
        }
        dag
    })
}

/// For every acyclic DAG, every dependency appears before its dependent
/// in the produced order, and the order is reproducible.
#[test]
fn test_topological_order_validity_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&arbitrary_dag(), |dag| {
            let topo = dag.topological_order();
            assert!(topo.is_acyclic());
            assert_eq!(topo.ordered.len(), dag.node_count());

            let position: HashMap<&str, usize> = topo
                .ordered
                .iter()
                .enumerate()
                .map(|(i, id)| (id.as_str(), i))
                .collect();

            for id in topo.ordered.iter() {
                let node = dag.node(id).unwrap();
                for dep in &node.deps {
                    assert!(
                        position[dep.as_str()] < position[id.as_str()],
                        "dep {} must precede {}",
                        dep,
                        id
                    );
                }
            }

            // Determinism: a second pass yields the identical order.
            assert_eq!(dag.topological_order().ordered, topo.ordered);

            Ok(())
        })
        .unwrap();
}

/// Consensus validation is stable under serialization round trips.
#[test]
fn test_consensus_survives_round_trip_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&arbitrary_dag(), |mut dag| {
            let valid = dag.validate_consensus("property-test");
            assert!(valid);

            let json = serde_json::to_string(&dag).unwrap();
            let mut back: MetadataDag = serde_json::from_str(&json).unwrap();
            assert!(back.validate_consensus("property-test"));
            assert_eq!(back.topological_order(), dag.topological_order());

            Ok(())
        })
        .unwrap();
}
