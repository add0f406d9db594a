//! Restore engine: replays a snapshot against the content store.
//!
//! The engine walks a snapshot's DAG in dependency order and classifies
//! each node as restored (its content still resolves in the CAS) or
//! recompute (it does not). It never recomputes anything itself;
//! recomputation is delegated to the owning agent, and this engine's
//! contract ends at producing the classification lists.

use crate::cas::ContentStore;
use crate::error::{EngineError, GraphError, StoreError};
use crate::graph::NodeStatus;
use crate::snapshot::{BackupSnapshot, SnapshotManager};
use crate::telemetry::{event_type, BackupEvent, EventSink};
use crate::types::{Digest, NodeId, SnapshotId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// How a restore walk selects and treats nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum RestoreStrategy {
    /// Restore or validate every node in the snapshot.
    Full,
    /// Diff against a baseline snapshot: nodes whose `(id, digest)` pair
    /// is unchanged from the baseline are classified restored without
    /// re-checking the CAS; new or changed nodes take the normal path.
    Incremental { baseline: SnapshotId },
    /// Restrict the walk to a caller-supplied subset of node ids, still
    /// visited in dependency order relative to that subset.
    Selective { nodes: Vec<NodeId> },
}

/// Regeneration policy: pure configuration consumed by the restore engine
/// and the retention evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationPolicy {
    #[serde(flatten)]
    pub strategy: RestoreStrategy,
    /// Re-validate each node's content (retrieve + checksum) instead of a
    /// plain existence check.
    pub validate_before_restore: bool,
    /// Keep superseded snapshots. When false, garbage collection keeps
    /// only the newest mutable snapshot and ignores the count and age
    /// bounds; immutable snapshots still survive.
    pub preserve_history: bool,
    /// Newest snapshots retained unconditionally by garbage collection.
    pub max_snapshots: usize,
    /// Snapshots younger than this many days survive garbage collection
    /// even beyond `max_snapshots`. `None` disables the age rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<i64>,
}

impl Default for RegenerationPolicy {
    fn default() -> Self {
        RegenerationPolicy {
            strategy: RestoreStrategy::Full,
            validate_before_restore: false,
            preserve_history: true,
            max_snapshots: 10,
            ttl_days: None,
        }
    }
}

/// Outcome of a restore walk.
///
/// `recompute_nodes` is the downstream contract: the embedding agent layer
/// is responsible for recomputing those nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored_nodes: Vec<NodeId>,
    pub recompute_nodes: Vec<NodeId>,
}

/// Walks snapshots against the content store.
pub struct RestoreEngine<'a> {
    cas: &'a ContentStore,
    snapshots: &'a SnapshotManager,
    sink: Arc<dyn EventSink>,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(
        cas: &'a ContentStore,
        snapshots: &'a SnapshotManager,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            cas,
            snapshots,
            sink,
        }
    }

    /// Restore a snapshot under the given policy.
    ///
    /// Refuses snapshots whose recomputed consensus is invalid; callers
    /// that accept partial integrity must opt in explicitly via
    /// [`RestoreEngine::restore_snapshot_best_effort`]. A cycle in the
    /// snapshot's DAG is a hard `CycleDetected` failure, never skipped.
    pub fn restore_snapshot(
        &self,
        id: &str,
        policy: &RegenerationPolicy,
    ) -> Result<RestoreReport, EngineError> {
        self.run(id, policy, false)
    }

    /// Best-effort restore: proceeds even when the snapshot's DAG fails
    /// consensus validation. Nodes touched by violations still end up in
    /// the recompute list via the normal per-node checks.
    pub fn restore_snapshot_best_effort(
        &self,
        id: &str,
        policy: &RegenerationPolicy,
    ) -> Result<RestoreReport, EngineError> {
        self.run(id, policy, true)
    }

    fn run(
        &self,
        id: &str,
        policy: &RegenerationPolicy,
        best_effort: bool,
    ) -> Result<RestoreReport, EngineError> {
        let snapshot = self
            .snapshots
            .get(id)
            .ok_or_else(|| StoreError::SnapshotNotFound(id.to_string()))?;

        // consensus_valid is derived state; recompute rather than trust
        // what was stamped at creation time.
        let violations = snapshot.dag.consensus_violations();
        if !violations.is_empty() {
            if !best_effort {
                return Err(GraphError::Inconsistent(violations).into());
            }
            tracing::warn!(
                id = %id,
                violations = violations.len(),
                "best-effort restore of inconsistent snapshot"
            );
        }

        let topo = snapshot.dag.topological_order();
        if !topo.is_acyclic() {
            return Err(GraphError::CycleDetected(topo.cyclic).into());
        }

        let walk: Vec<&NodeId> = match &policy.strategy {
            RestoreStrategy::Full | RestoreStrategy::Incremental { .. } => {
                topo.ordered.iter().collect()
            }
            RestoreStrategy::Selective { nodes } => {
                let subset: HashSet<&str> = nodes.iter().map(|n| n.as_str()).collect();
                topo.ordered
                    .iter()
                    .filter(|n| subset.contains(n.as_str()))
                    .collect()
            }
        };

        let unchanged = match &policy.strategy {
            RestoreStrategy::Incremental { baseline } => {
                Some(self.unchanged_since(snapshot, baseline)?)
            }
            _ => None,
        };

        let mut report = RestoreReport::default();
        for node_id in walk {
            if let Some(unchanged) = &unchanged {
                if unchanged.contains(node_id.as_str()) {
                    report.restored_nodes.push(node_id.clone());
                    continue;
                }
            }

            // A tampered snapshot can order an id whose node record is
            // gone; consensus flags it, and under best-effort the
            // artifact is simply lost.
            let Some(node) = snapshot.dag.node(node_id) else {
                report.recompute_nodes.push(node_id.clone());
                continue;
            };
            let restorable = match (node.status, node.digest) {
                (NodeStatus::Completed, Some(digest)) => {
                    self.content_restorable(&digest, policy.validate_before_restore)?
                }
                // Pending/computing/failed nodes have nothing to restore.
                _ => false,
            };

            if restorable {
                report.restored_nodes.push(node_id.clone());
            } else {
                report.recompute_nodes.push(node_id.clone());
            }
        }

        self.sink.emit(BackupEvent::now(
            event_type::SNAPSHOT_RESTORED,
            "restore",
            json!({
                "id": id,
                "restored": report.restored_nodes.len(),
                "recompute": report.recompute_nodes.len(),
                "best_effort": best_effort,
            }),
        ));

        Ok(report)
    }

    /// Check whether a digest's content is restorable.
    ///
    /// With validation on, the blob is retrieved and checksummed; any
    /// failure (missing, corrupt, mismatched) classifies the node for
    /// recompute. I/O errors other than corruption still propagate.
    fn content_restorable(&self, digest: &Digest, validate: bool) -> Result<bool, EngineError> {
        if !validate {
            return Ok(self.cas.exists(digest));
        }
        match self.cas.retrieve_blob(digest) {
            Ok(_) => Ok(true),
            Err(StoreError::ContentNotFound(_))
            | Err(StoreError::DigestMismatch { .. })
            | Err(StoreError::Corrupt { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Node ids whose `(id, digest)` pair matches the baseline snapshot.
    fn unchanged_since(
        &self,
        snapshot: &BackupSnapshot,
        baseline_id: &str,
    ) -> Result<HashSet<NodeId>, EngineError> {
        let baseline = self
            .snapshots
            .get(baseline_id)
            .ok_or_else(|| StoreError::SnapshotNotFound(baseline_id.to_string()))?;

        let baseline_digests: HashMap<&str, Digest> = baseline
            .dag
            .nodes_ordered()
            .filter(|n| n.status == NodeStatus::Completed)
            .filter_map(|n| n.digest.map(|d| (n.id.as_str(), d)))
            .collect();

        Ok(snapshot
            .dag
            .nodes_ordered()
            .filter(|n| n.status == NodeStatus::Completed)
            .filter(|n| {
                n.digest
                    .map(|d| baseline_digests.get(n.id.as_str()) == Some(&d))
                    .unwrap_or(false)
            })
            .map(|n| n.id.clone())
            .collect())
    }
}
