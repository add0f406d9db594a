//! Snapshot manager: freezes DAG states into named, immutable-by-default
//! backup records and persists the snapshot index.
//!
//! The index file at `{root}/metadata/snapshots.json` is the single source
//! of truth across process restarts. It is always written atomically
//! (temp file + rename); a crash mid-write must never corrupt the whole
//! index. This is a correctness requirement, not an optimization.

use crate::error::StoreError;
use crate::graph::{DagEdge, DagNode, MetadataDag};
use crate::hasher;
use crate::telemetry::{event_type, BackupEvent, EventSink};
use crate::types::{Digest, SnapshotId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Current serialization version for snapshot records.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A point-in-time capture of a DAG plus the digests it references.
///
/// Never mutated after creation. When `immutable` is true the snapshot is
/// exempt from deletion and garbage collection, forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub id: SnapshotId,
    pub timestamp: DateTime<Utc>,
    pub dag: MetadataDag,
    pub referenced_digests: Vec<Digest>,
    pub version: u32,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub immutable: bool,
}

/// Manages the snapshot index for one store root.
pub struct SnapshotManager {
    root: PathBuf,
    snapshots: Vec<BackupSnapshot>,
    sink: Arc<dyn EventSink>,
}

impl SnapshotManager {
    /// Open the snapshot index at `root`, loading any persisted snapshots.
    ///
    /// A missing index file means an empty store; an unparseable index is
    /// a hard `Corrupt` failure, never silently reset.
    pub fn open<P: AsRef<Path>>(root: P, sink: Arc<dyn EventSink>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("metadata"))?;

        let index_path = Self::index_path(&root);
        let snapshots = if index_path.exists() {
            let bytes = fs::read(&index_path)?;
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                path: index_path.clone(),
                reason: format!("snapshot index does not parse: {}", e),
            })?
        } else {
            Vec::new()
        };

        Ok(Self {
            root,
            snapshots,
            sink,
        })
    }

    fn index_path(root: &Path) -> PathBuf {
        root.join("metadata").join("snapshots.json")
    }

    /// Freeze the given nodes and edges into a new snapshot.
    ///
    /// Builds the DAG, recomputes consensus, stamps the result, collects
    /// completed nodes' digests, and persists the index before returning.
    /// An inconsistent DAG is still snapshottable so that backup history
    /// is never lost; the restore engine decides what to do with it.
    pub fn create_snapshot(
        &mut self,
        nodes: Vec<DagNode>,
        edges: Vec<DagEdge>,
        description: impl Into<String>,
        tags: Vec<String>,
        immutable: bool,
    ) -> Result<BackupSnapshot, StoreError> {
        let mut dag = MetadataDag::from_parts(nodes, edges).map_err(|e| StoreError::Corrupt {
            path: Self::index_path(&self.root),
            reason: format!("snapshot input graph invalid: {}", e),
        })?;

        let consensus_valid = dag.validate_consensus("snapshot-manager");
        if !consensus_valid {
            tracing::warn!(
                violations = ?dag.consensus_violations(),
                "creating snapshot of inconsistent graph"
            );
        }

        let referenced_digests = dag.completed_digests();
        let timestamp = Utc::now();
        let id = self.unique_id(timestamp);
        let description = description.into();

        let snapshot = BackupSnapshot {
            id: id.clone(),
            timestamp,
            dag,
            referenced_digests,
            version: SNAPSHOT_VERSION,
            description,
            tags,
            immutable,
        };

        self.snapshots.push(snapshot.clone());
        self.persist()?;

        self.sink.emit(BackupEvent::now(
            event_type::SNAPSHOT_CREATED,
            "snapshot",
            json!({
                "id": id,
                "nodes": snapshot.dag.node_count(),
                "digests": snapshot.referenced_digests.len(),
                "consensus_valid": consensus_valid,
                "immutable": immutable,
            }),
        ));

        Ok(snapshot)
    }

    /// All snapshots, in creation order.
    pub fn list(&self) -> &[BackupSnapshot] {
        &self.snapshots
    }

    pub fn get(&self, id: &str) -> Option<&BackupSnapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }

    /// Delete a snapshot. Returns `false` (not an error) when the
    /// snapshot is absent or immutable.
    pub fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        let Some(pos) = self.snapshots.iter().position(|s| s.id == id) else {
            return Ok(false);
        };
        if self.snapshots[pos].immutable {
            tracing::warn!(id = %id, "refusing to delete immutable snapshot");
            return Ok(false);
        }

        self.snapshots.remove(pos);
        self.persist()?;

        self.sink.emit(BackupEvent::now(
            event_type::SNAPSHOT_DELETED,
            "snapshot",
            json!({ "id": id }),
        ));

        Ok(true)
    }

    /// Union of digests referenced by any live snapshot. Callers layering
    /// blob garbage collection on top must treat these as pinned.
    pub fn live_digests(&self) -> Vec<Digest> {
        let mut digests: Vec<Digest> = self
            .snapshots
            .iter()
            .flat_map(|s| s.referenced_digests.iter().copied())
            .collect();
        digests.sort();
        digests.dedup();
        digests
    }

    /// Write the full index atomically.
    fn persist(&self) -> Result<(), StoreError> {
        let index_path = Self::index_path(&self.root);
        let serialized = serde_json::to_vec_pretty(&self.snapshots)?;

        let temp_path = index_path.with_extension("json.tmp");
        fs::write(&temp_path, &serialized)?;
        if let Err(e) = fs::rename(&temp_path, &index_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }

    /// Unique snapshot id: millisecond timestamp plus a short hash over
    /// nanosecond time and current index size. Uniqueness is the only
    /// hard requirement; the loop guards against same-millisecond runs.
    fn unique_id(&self, timestamp: DateTime<Utc>) -> SnapshotId {
        let mut salt: u64 = self.snapshots.len() as u64;
        loop {
            let seed = format!(
                "{}:{}:{}",
                timestamp.timestamp_nanos_opt().unwrap_or_default(),
                Utc::now().timestamp_nanos_opt().unwrap_or_default(),
                salt
            );
            let suffix = hasher::digest_bytes(seed.as_bytes()).to_hex();
            let id = format!("snap-{}-{}", timestamp.timestamp_millis(), &suffix[..12]);
            if self.get(&id).is_none() {
                return id;
            }
            salt += 1;
        }
    }
}
