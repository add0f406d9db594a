//! End-to-end scenarios through the engine facade

use cairn::api::{BackupEngine, ProducedArtifact};
use cairn::error::{EngineError, GraphError, StoreError};
use cairn::graph::{DagEdge, EdgeKind, NodeMetadata};
use cairn::restore::{RegenerationPolicy, RestoreStrategy};
use cairn::telemetry::RecordingSink;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

/// The spec scenario: two chained artifacts, snapshot, delete the second
/// blob out from under the store, restore with validation.
#[test]
fn test_backup_then_partial_restore() {
    let dir = TempDir::new().unwrap();
    let engine = BackupEngine::open(dir.path()).unwrap();

    engine
        .ingest_artifact(ProducedArtifact::new("n1", json!({"a": 1})))
        .unwrap();
    let d2 = engine
        .ingest_artifact(
            ProducedArtifact::new("n2", json!({"b": 2})).with_deps(vec!["n1".into()]),
        )
        .unwrap();
    engine.add_edge(DagEdge::new("n1", "n2", EdgeKind::Dependency));

    let snapshot = engine.create_snapshot("spec scenario", vec![], false).unwrap();
    assert!(snapshot.dag.consensus_valid);

    // Delete n2's blob directly from the content store.
    assert!(engine.delete_payload(&d2).unwrap());

    let policy = RegenerationPolicy {
        validate_before_restore: true,
        ..RegenerationPolicy::default()
    };
    let report = engine.restore_snapshot(&snapshot.id, &policy).unwrap();

    assert_eq!(report.restored_nodes, vec!["n1"]);
    assert_eq!(report.recompute_nodes, vec!["n2"]);
}

#[test]
fn test_restore_unknown_snapshot() {
    let dir = TempDir::new().unwrap();
    let engine = BackupEngine::open(dir.path()).unwrap();

    let result = engine.restore_snapshot("snap-0-ffffffffffff", &RegenerationPolicy::default());
    assert!(matches!(
        result,
        Err(EngineError::Store(StoreError::SnapshotNotFound(_)))
    ));
}

#[test]
fn test_dangling_edge_refuses_strict_restore() {
    let dir = TempDir::new().unwrap();
    let engine = BackupEngine::open(dir.path()).unwrap();

    engine
        .ingest_artifact(ProducedArtifact::new("n1", json!({"a": 1})))
        .unwrap();
    engine.add_edge(DagEdge::new("n1", "missing", EdgeKind::ControlFlow));

    let snapshot = engine.create_snapshot("broken", vec![], false).unwrap();
    assert!(!snapshot.dag.consensus_valid);

    let policy = RegenerationPolicy::default();
    assert!(matches!(
        engine.restore_snapshot(&snapshot.id, &policy),
        Err(EngineError::Graph(GraphError::Inconsistent(_)))
    ));

    let report = engine
        .restore_snapshot_best_effort(&snapshot.id, &policy)
        .unwrap();
    assert_eq!(report.restored_nodes, vec!["n1"]);
}

#[test]
fn test_incremental_restore_against_baseline() {
    let dir = TempDir::new().unwrap();
    let engine = BackupEngine::open(dir.path()).unwrap();

    engine
        .ingest_artifact(ProducedArtifact::new("base", json!({"v": 1})))
        .unwrap();
    let baseline = engine.create_snapshot("baseline", vec![], false).unwrap();

    // Second generation of the graph in a fresh engine over the same
    // store: base unchanged, extra added.
    let engine = BackupEngine::open(dir.path()).unwrap();
    engine
        .ingest_artifact(ProducedArtifact::new("base", json!({"v": 1})))
        .unwrap();
    engine
        .ingest_artifact(
            ProducedArtifact::new("extra", json!({"v": 2})).with_deps(vec!["base".into()]),
        )
        .unwrap();
    let second = engine.create_snapshot("second", vec![], false).unwrap();

    let policy = RegenerationPolicy {
        strategy: RestoreStrategy::Incremental {
            baseline: baseline.id,
        },
        ..RegenerationPolicy::default()
    };
    let report = engine.restore_snapshot(&second.id, &policy).unwrap();
    assert_eq!(report.restored_nodes, vec!["base", "extra"]);
    assert!(report.recompute_nodes.is_empty());
}

#[test]
fn test_node_metadata_round_trips_through_snapshot() {
    let dir = TempDir::new().unwrap();
    let engine = BackupEngine::open(dir.path()).unwrap();

    let metadata = NodeMetadata {
        agent_role: Some("synthesizer".into()),
        capability: Some("codegen".into()),
        computation_time_ms: Some(1200),
        memory_usage_bytes: Some(64 * 1024 * 1024),
        validation_result: Some(true),
        design_intent: Some("emit module".into()),
        user_requirement: Some("REQ-17".into()),
        ..NodeMetadata::default()
    };
    engine
        .ingest_artifact(
            ProducedArtifact::new("n1", json!({"code": "fn main() {}"}))
                .with_agent("agent-3")
                .with_trace("trace-9")
                .with_metadata(metadata),
        )
        .unwrap();

    let id = engine.create_snapshot("meta", vec![], false).unwrap().id;

    // Reopen from disk; everything must survive the JSON round trip.
    let engine = BackupEngine::open(dir.path()).unwrap();
    let snapshot = engine.get_snapshot(&id).unwrap();
    let node = snapshot.dag.node("n1").unwrap();
    assert_eq!(node.agent_id.as_deref(), Some("agent-3"));
    assert_eq!(node.trace_id.as_deref(), Some("trace-9"));
    assert_eq!(node.metadata.agent_role.as_deref(), Some("synthesizer"));
    assert_eq!(node.metadata.computation_time_ms, Some(1200));
    assert_eq!(node.metadata.output_digests.len(), 1);
}

#[test]
fn test_full_event_stream() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::new());
    let engine = BackupEngine::open_with_sink(dir.path(), sink.clone()).unwrap();

    let digest = engine
        .ingest_artifact(ProducedArtifact::new("n1", json!(1)))
        .unwrap();
    engine.retrieve_payload(&digest).unwrap();
    let snapshot = engine.create_snapshot("evt", vec![], false).unwrap();
    engine
        .restore_snapshot(&snapshot.id, &RegenerationPolicy::default())
        .unwrap();
    engine.delete_snapshot(&snapshot.id).unwrap();

    assert_eq!(
        sink.event_types(),
        vec![
            "cas.content.stored",
            "cas.content.retrieved",
            "dag.snapshot.created",
            "dag.snapshot.restored",
            "dag.snapshot.deleted",
        ]
    );
}
