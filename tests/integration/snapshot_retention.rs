//! Integration tests for snapshot persistence and retention

use cairn::api::{BackupEngine, ProducedArtifact};
use cairn::restore::RegenerationPolicy;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn engine_with_snapshots(dir: &TempDir, count: usize, immutable: bool) -> BackupEngine {
    let engine = BackupEngine::open(dir.path()).unwrap();
    for i in 0..count {
        engine
            .ingest_artifact(ProducedArtifact::new(format!("n{}", i), json!({"i": i})))
            .unwrap();
        engine
            .create_snapshot(format!("s{}", i), vec![], immutable)
            .unwrap();
    }
    engine
}

#[test]
fn test_index_is_single_source_of_truth_across_restarts() {
    let dir = TempDir::new().unwrap();
    let ids: Vec<String> = engine_with_snapshots(&dir, 3, false)
        .list_snapshots()
        .iter()
        .map(|s| s.id.clone())
        .collect();

    let reopened = BackupEngine::open(dir.path()).unwrap();
    let reloaded: Vec<String> = reopened
        .list_snapshots()
        .iter()
        .map(|s| s.id.clone())
        .collect();
    assert_eq!(reloaded, ids);
}

#[test]
fn test_no_temp_index_left_behind() {
    let dir = TempDir::new().unwrap();
    engine_with_snapshots(&dir, 3, false);

    // Atomic write must rename the temp file away every time.
    let metadata_dir = dir.path().join("metadata");
    let names: Vec<String> = fs::read_dir(&metadata_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["snapshots.json"]);
}

#[test]
fn test_immutable_snapshot_outlives_everything() {
    let dir = TempDir::new().unwrap();
    let engine = BackupEngine::open(dir.path()).unwrap();

    engine
        .ingest_artifact(ProducedArtifact::new("keep", json!({"k": true})))
        .unwrap();
    let forever = engine.create_snapshot("forever", vec![], true).unwrap();

    // Direct delete refused.
    assert!(!engine.delete_snapshot(&forever.id).unwrap());

    // GC with the tightest possible policy still refuses.
    let policy = RegenerationPolicy {
        max_snapshots: 0,
        ttl_days: Some(0),
        ..RegenerationPolicy::default()
    };
    let deleted = engine.garbage_collect(&policy).unwrap();
    assert!(deleted.is_empty());
    assert!(engine.get_snapshot(&forever.id).is_some());

    // And the snapshot is still restorable.
    let report = engine
        .restore_snapshot(&forever.id, &RegenerationPolicy::default())
        .unwrap();
    assert_eq!(report.restored_nodes, vec!["keep"]);
}

#[test]
fn test_retention_bound_exact_survivor_count() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with_snapshots(&dir, 7, false);

    let policy = RegenerationPolicy {
        max_snapshots: 4,
        ..RegenerationPolicy::default()
    };
    let deleted = engine.garbage_collect(&policy).unwrap();
    assert_eq!(deleted.len(), 3);
    assert_eq!(engine.list_snapshots().len(), 4);

    // Survivors are the newest four, still in creation order.
    let descriptions: Vec<String> = engine
        .list_snapshots()
        .iter()
        .map(|s| s.description.clone())
        .collect();
    assert_eq!(descriptions, vec!["s3", "s4", "s5", "s6"]);
}

#[test]
fn test_gc_deletions_persist_across_restart() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with_snapshots(&dir, 5, false);

    let policy = RegenerationPolicy {
        max_snapshots: 2,
        ..RegenerationPolicy::default()
    };
    engine.garbage_collect(&policy).unwrap();

    let reopened = BackupEngine::open(dir.path()).unwrap();
    assert_eq!(reopened.list_snapshots().len(), 2);
}

#[test]
fn test_live_digests_prevent_dangling_deletes() {
    let dir = TempDir::new().unwrap();
    let engine = BackupEngine::open(dir.path()).unwrap();

    let pinned = engine
        .ingest_artifact(ProducedArtifact::new("pinned", json!({"p": 1})))
        .unwrap();
    engine.create_snapshot("pin", vec![], true).unwrap();
    let orphan = engine.store_payload(&json!({"orphan": 1})).unwrap();

    let live = engine.live_digests();
    assert!(live.contains(&pinned));
    assert!(!live.contains(&orphan));
    assert_eq!(engine.orphaned_digests().unwrap(), vec![orphan]);
}
