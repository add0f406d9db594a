//! Integration tests for the content store lifecycle

use cairn::cas::ContentStore;
use cairn::error::StoreError;
use cairn::telemetry::RecordingSink;
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn store(dir: &TempDir) -> ContentStore {
    ContentStore::new(dir.path(), Arc::new(RecordingSink::new())).unwrap()
}

#[test]
fn test_round_trip_preserves_payload_exactly() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let payload = json!({
        "nested": {"list": [1, 2, {"deep": true}]},
        "unicode": "héllo ∆",
        "null": null,
    });
    let digest = store.store(&payload).unwrap();
    assert_eq!(store.retrieve(&digest).unwrap(), payload);
}

#[test]
fn test_digest_stable_across_store_instances() {
    let dir1 = TempDir::new().unwrap();
    let dir2 = TempDir::new().unwrap();

    let payload = json!({"a": 1, "b": [true, false]});
    let d1 = store(&dir1).store(&payload).unwrap();
    let d2 = store(&dir2).store(&payload).unwrap();
    assert_eq!(d1, d2);
}

#[test]
fn test_blob_layout_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let digest = store.store(&json!({"a": 1})).unwrap();
    let blob_path = dir
        .path()
        .join("blobs")
        .join(format!("{}.json", digest));
    assert!(blob_path.exists());

    // Blob file holds payload plus metadata.
    let raw: serde_json::Value =
        serde_json::from_slice(&fs::read(&blob_path).unwrap()).unwrap();
    assert_eq!(raw["payload"], json!({"a": 1}));
    assert!(raw["metadata"]["stored_at"].is_string());
    assert!(raw["metadata"]["size"].as_u64().unwrap() > 0);
}

#[test]
fn test_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let payload = json!({"persisted": true});

    let digest = store(&dir).store(&payload).unwrap();

    let reopened = store(&dir);
    assert!(reopened.exists(&digest));
    assert_eq!(reopened.retrieve(&digest).unwrap(), payload);
}

#[test]
fn test_half_written_blob_is_absent() {
    // A crash mid-write leaves only a temp file, which the store must
    // treat as absent and skip during enumeration.
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let digest = store.store(&json!({"a": 1})).unwrap();
    let stray = dir.path().join("blobs").join("deadbeef.json.tmp");
    fs::write(&stray, b"{ partial").unwrap();

    assert_eq!(store.list().unwrap(), vec![digest]);
}

#[test]
fn test_unparseable_blob_is_corrupt_error() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);

    let digest = store.store(&json!({"a": 1})).unwrap();
    let path = dir.path().join("blobs").join(format!("{}.json", digest));
    fs::write(&path, b"not json at all").unwrap();

    let result = store.retrieve(&digest);
    assert!(matches!(result, Err(StoreError::Corrupt { .. })));
}
