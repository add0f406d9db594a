//! Backup engine facade.
//!
//! Owns the content store, the working metadata DAG, and the snapshot
//! index for one store root, and exposes the write/snapshot/restore/GC
//! surface that the agent layer calls.
//!
//! Concurrency model: one logical writer per store root. Within the
//! process the working DAG lives behind a mutex; snapshot creation takes
//! that same lock for the duration of the copy so it always observes a
//! consistent, non-torn graph state. CAS writes need no lock: distinct
//! digests touch distinct files, and same-digest writes are idempotent.

use crate::cas::ContentStore;
use crate::error::EngineError;
use crate::graph::{DagEdge, DagNode, MetadataDag, NodeMetadata, NodeStatus};
use crate::restore::{RegenerationPolicy, RestoreEngine, RestoreReport};
use crate::retention;
use crate::snapshot::{BackupSnapshot, SnapshotManager};
use crate::telemetry::{EventSink, LogSink};
use crate::types::{Digest, NodeId, SnapshotId};
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// A computed artifact handed to the engine by a producer agent.
///
/// The engine never initiates computation; this is the push interface the
/// agent layer uses after its own `handleEvent` work completes.
#[derive(Debug, Clone)]
pub struct ProducedArtifact {
    pub node_id: NodeId,
    pub payload: Value,
    pub deps: Vec<NodeId>,
    pub agent_id: Option<String>,
    pub trace_id: Option<String>,
    pub metadata: NodeMetadata,
}

impl ProducedArtifact {
    pub fn new(node_id: impl Into<NodeId>, payload: Value) -> Self {
        Self {
            node_id: node_id.into(),
            payload,
            deps: Vec::new(),
            agent_id: None,
            trace_id: None,
            metadata: NodeMetadata::default(),
        }
    }

    pub fn with_deps(mut self, deps: Vec<NodeId>) -> Self {
        self.deps = deps;
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The backup engine for one store root.
pub struct BackupEngine {
    cas: ContentStore,
    graph: Mutex<MetadataDag>,
    snapshots: Mutex<SnapshotManager>,
    sink: Arc<dyn EventSink>,
}

impl BackupEngine {
    /// Open an engine at `root` with the default tracing event sink.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, EngineError> {
        Self::open_with_sink(root, Arc::new(LogSink))
    }

    /// Open an engine at `root` with a caller-supplied event sink.
    pub fn open_with_sink<P: AsRef<Path>>(
        root: P,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, EngineError> {
        let root = root.as_ref();
        let cas = ContentStore::new(root, sink.clone())?;
        let snapshots = SnapshotManager::open(root, sink.clone())?;
        Ok(Self {
            cas,
            graph: Mutex::new(MetadataDag::new()),
            snapshots: Mutex::new(snapshots),
            sink,
        })
    }

    pub fn cas(&self) -> &ContentStore {
        &self.cas
    }

    /// Store a payload without touching the graph. Idempotent.
    pub fn store_payload(&self, payload: &Value) -> Result<Digest, EngineError> {
        Ok(self.cas.store(payload)?)
    }

    /// Ingest a produced artifact: store its payload and record a
    /// completed node referencing the resulting digest.
    pub fn ingest_artifact(&self, artifact: ProducedArtifact) -> Result<Digest, EngineError> {
        let digest = self.cas.store(&artifact.payload)?;

        let mut metadata = artifact.metadata;
        if !metadata.output_digests.contains(&digest) {
            metadata.output_digests.push(digest);
        }

        let mut node = DagNode::completed(artifact.node_id, digest, artifact.deps)
            .with_metadata(metadata);
        node.agent_id = artifact.agent_id;
        node.trace_id = artifact.trace_id;

        self.graph.lock().add_node(node)?;
        Ok(digest)
    }

    /// Record a node awaiting computation.
    pub fn add_pending_node(&self, node: DagNode) -> Result<(), EngineError> {
        Ok(self.graph.lock().add_node(node)?)
    }

    /// Record a relation between two nodes.
    pub fn add_edge(&self, edge: DagEdge) {
        self.graph.lock().add_edge(edge);
    }

    /// Advance a node through its lifecycle.
    pub fn set_node_status(&self, id: &str, status: NodeStatus) -> Result<(), EngineError> {
        Ok(self.graph.lock().set_status(id, status)?)
    }

    /// Mark a computing node completed with its artifact digest.
    pub fn complete_node(&self, id: &str, digest: Digest) -> Result<(), EngineError> {
        Ok(self.graph.lock().complete_node(id, digest)?)
    }

    /// Mark a computing node failed.
    pub fn fail_node(&self, id: &str) -> Result<(), EngineError> {
        Ok(self.graph.lock().fail_node(id)?)
    }

    /// Revalidate the working graph's consensus.
    pub fn validate_graph(&self) -> bool {
        self.graph.lock().validate_consensus("backup-engine")
    }

    /// Freeze the current working graph into a snapshot.
    ///
    /// The graph lock is held across the copy so the snapshot observes a
    /// consistent state; the snapshot index write happens after the copy,
    /// outside graph mutation but under the snapshot lock.
    pub fn create_snapshot(
        &self,
        description: impl Into<String>,
        tags: Vec<String>,
        immutable: bool,
    ) -> Result<BackupSnapshot, EngineError> {
        let (nodes, edges) = {
            let graph = self.graph.lock();
            let nodes: Vec<DagNode> = graph.nodes_ordered().cloned().collect();
            let edges: Vec<DagEdge> = graph.edges().to_vec();
            (nodes, edges)
        };

        Ok(self
            .snapshots
            .lock()
            .create_snapshot(nodes, edges, description, tags, immutable)?)
    }

    pub fn list_snapshots(&self) -> Vec<BackupSnapshot> {
        self.snapshots.lock().list().to_vec()
    }

    pub fn get_snapshot(&self, id: &str) -> Option<BackupSnapshot> {
        self.snapshots.lock().get(id).cloned()
    }

    /// Delete a snapshot; `false` when absent or immutable.
    pub fn delete_snapshot(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.snapshots.lock().delete(id)?)
    }

    /// Restore a snapshot, refusing inconsistent ones.
    pub fn restore_snapshot(
        &self,
        id: &str,
        policy: &RegenerationPolicy,
    ) -> Result<RestoreReport, EngineError> {
        let snapshots = self.snapshots.lock();
        RestoreEngine::new(&self.cas, &snapshots, self.sink.clone()).restore_snapshot(id, policy)
    }

    /// Restore a snapshot even if its DAG fails consensus validation.
    pub fn restore_snapshot_best_effort(
        &self,
        id: &str,
        policy: &RegenerationPolicy,
    ) -> Result<RestoreReport, EngineError> {
        let snapshots = self.snapshots.lock();
        RestoreEngine::new(&self.cas, &snapshots, self.sink.clone())
            .restore_snapshot_best_effort(id, policy)
    }

    /// Apply the retention policy, deleting expired mutable snapshots.
    pub fn garbage_collect(
        &self,
        policy: &RegenerationPolicy,
    ) -> Result<Vec<SnapshotId>, EngineError> {
        Ok(retention::garbage_collect(&mut self.snapshots.lock(), policy)?)
    }

    /// Digests pinned by live snapshots or by completed nodes in the
    /// working graph. Deleting any other blob cannot dangle a reference.
    pub fn live_digests(&self) -> Vec<Digest> {
        let mut digests = self.snapshots.lock().live_digests();
        digests.extend(self.graph.lock().completed_digests());
        digests.sort();
        digests.dedup();
        digests
    }

    /// Blobs present in the store but referenced by nothing. Candidates
    /// for caller-driven blob deletion.
    pub fn orphaned_digests(&self) -> Result<Vec<Digest>, EngineError> {
        let live = self.live_digests();
        Ok(self
            .cas
            .list()?
            .into_iter()
            .filter(|d| live.binary_search(d).is_err())
            .collect())
    }

    /// Checksum every stored blob; returns the corrupt digests.
    pub fn verify_store(&self) -> Result<Vec<Digest>, EngineError> {
        Ok(self.cas.verify()?)
    }
}

impl BackupEngine {
    /// Retrieve a payload by digest.
    pub fn retrieve_payload(&self, digest: &Digest) -> Result<Value, EngineError> {
        Ok(self.cas.retrieve(digest)?)
    }

    /// Whether a digest has stored content.
    pub fn payload_exists(&self, digest: &Digest) -> bool {
        self.cas.exists(digest)
    }

    /// Delete a blob; `false` when absent. The caller owns the check that
    /// no live snapshot still references the digest (see
    /// [`BackupEngine::live_digests`]).
    pub fn delete_payload(&self, digest: &Digest) -> Result<bool, EngineError> {
        Ok(self.cas.delete(digest)?)
    }
}
