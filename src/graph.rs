//! Metadata DAG: computed artifacts and the relations between them.
//!
//! Nodes record which agent produced an artifact and where its content
//! lives (a CAS digest); edges record dependency, data-flow, and
//! control-flow relations. Structural mutation is cheap and unvalidated;
//! consensus validation is a separate full recomputation pass, because
//! large graphs are built incrementally and should not pay O(edges) per
//! insert.
//!
//! Graphs round-trip through JSON across process runs, so edge-endpoint
//! existence is a standing invariant re-checked by validation, not just a
//! creation-time check.

use crate::error::GraphError;
use crate::types::{Digest, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

/// Current serialization version for persisted DAGs.
pub const DAG_VERSION: u32 = 1;

/// Node lifecycle: `Pending -> Computing -> {Completed | Failed}`.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Computing,
    Completed,
    Failed,
}

impl NodeStatus {
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Pending, NodeStatus::Computing)
                | (NodeStatus::Computing, NodeStatus::Completed)
                | (NodeStatus::Computing, NodeStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed)
    }
}

/// Relation kind carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    #[serde(rename = "dependency")]
    Dependency,
    #[serde(rename = "data-flow")]
    DataFlow,
    #[serde(rename = "control-flow")]
    ControlFlow,
}

/// Producer-supplied metadata attached to a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_digests: Vec<Digest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_digests: Vec<Digest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub computation_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_usage_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_result: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design_intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_requirement: Option<String>,
}

/// A computed artifact in the DAG.
///
/// `digest` is only meaningful once `status` is `Completed`; a failed node
/// has no recoverable digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagNode {
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<NodeId>,
    #[serde(default)]
    pub metadata: NodeMetadata,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl DagNode {
    /// A node awaiting computation.
    pub fn pending(id: impl Into<NodeId>, deps: Vec<NodeId>) -> Self {
        DagNode {
            id: id.into(),
            digest: None,
            deps,
            metadata: NodeMetadata::default(),
            status: NodeStatus::Pending,
            agent_id: None,
            trace_id: None,
        }
    }

    /// A node whose artifact is already computed and stored.
    pub fn completed(id: impl Into<NodeId>, digest: Digest, deps: Vec<NodeId>) -> Self {
        DagNode {
            id: id.into(),
            digest: Some(digest),
            deps,
            metadata: NodeMetadata::default(),
            status: NodeStatus::Completed,
            agent_id: None,
            trace_id: None,
        }
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

/// A relation between two nodes. Both endpoints must reference existing
/// node ids; consensus validation enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl DagEdge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>, kind: EdgeKind) -> Self {
        DagEdge {
            from: from.into(),
            to: to.into(),
            kind,
            metadata: HashMap::new(),
        }
    }
}

/// A structural invariant violated by the current graph state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusViolation {
    /// An edge endpoint references a node id not present in the graph.
    MissingEndpoint {
        from: NodeId,
        to: NodeId,
        missing: NodeId,
    },
    /// A completed node carries no digest.
    CompletedWithoutDigest { node: NodeId },
    /// A node's declared dependency references a node id not present.
    MissingDependency { node: NodeId, missing: NodeId },
    /// The insertion order index and the node set disagree on this id.
    /// Ordering passes are driven by the index, so a desynchronized
    /// (typically hand-edited) persisted graph would otherwise hide
    /// nodes from them silently.
    OrderIndexMismatch { node: NodeId },
}

impl fmt::Display for ConsensusViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusViolation::MissingEndpoint { from, to, missing } => {
                write!(f, "edge {} -> {} references missing node {}", from, to, missing)
            }
            ConsensusViolation::CompletedWithoutDigest { node } => {
                write!(f, "completed node {} has no digest", node)
            }
            ConsensusViolation::MissingDependency { node, missing } => {
                write!(f, "node {} depends on missing node {}", node, missing)
            }
            ConsensusViolation::OrderIndexMismatch { node } => {
                write!(f, "insertion order and node set disagree on node {}", node)
            }
        }
    }
}

/// Result of a topological ordering pass.
///
/// `ordered` lists node ids in dependency order; `cyclic` lists the nodes
/// that could not be ordered because they sit on a cycle. A non-empty
/// `cyclic` set is a data integrity failure for the affected subgraph and
/// must never be silently skipped by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopoOrder {
    pub ordered: Vec<NodeId>,
    pub cyclic: Vec<NodeId>,
}

impl TopoOrder {
    pub fn is_acyclic(&self) -> bool {
        self.cyclic.is_empty()
    }
}

/// The metadata DAG: nodes, edges, and derived consensus state.
///
/// `consensus_valid` is derived, never trusted as stored: it must be
/// recomputed via [`MetadataDag::validate_consensus`] whenever nodes or
/// edges change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataDag {
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    nodes: HashMap<NodeId, DagNode>,
    /// Node ids in insertion order. Drives the deterministic tie-break in
    /// topological ordering, so it is persisted with the graph.
    insertion: Vec<NodeId>,
    edges: Vec<DagEdge>,
    pub consensus_valid: bool,
    #[serde(default)]
    pub validated_by: Vec<String>,
}

impl Default for MetadataDag {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataDag {
    pub fn new() -> Self {
        MetadataDag {
            timestamp: Utc::now(),
            version: DAG_VERSION,
            nodes: HashMap::new(),
            insertion: Vec::new(),
            edges: Vec::new(),
            consensus_valid: false,
            validated_by: Vec::new(),
        }
    }

    /// Build a DAG from node and edge lists, preserving the given node
    /// order as insertion order.
    pub fn from_parts(nodes: Vec<DagNode>, edges: Vec<DagEdge>) -> Result<Self, GraphError> {
        let mut dag = MetadataDag::new();
        for node in nodes {
            dag.add_node(node)?;
        }
        for edge in edges {
            dag.add_edge(edge);
        }
        Ok(dag)
    }

    /// Insert a node. Structural only: no consensus validation happens
    /// here. Nodes are append-only; re-adding an existing id is an error.
    pub fn add_node(&mut self, node: DagNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.insertion.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        self.consensus_valid = false;
        Ok(())
    }

    /// Insert an edge. Endpoint existence is deliberately not checked
    /// here; `validate_consensus` covers it.
    pub fn add_edge(&mut self, edge: DagEdge) {
        self.edges.push(edge);
        self.consensus_valid = false;
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[DagEdge] {
        &self.edges
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.insertion
    }

    /// Nodes in insertion order.
    pub fn nodes_ordered(&self) -> impl Iterator<Item = &DagNode> {
        self.insertion.iter().filter_map(move |id| self.nodes.get(id))
    }

    /// Advance a node's status through the lifecycle state machine.
    /// Illegal transitions (including any move out of a terminal state)
    /// are rejected.
    pub fn set_status(&mut self, id: &str, next: NodeStatus) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        if !node.status.can_transition_to(next) {
            return Err(GraphError::InvalidTransition {
                node: id.to_string(),
                from: node.status,
                to: next,
            });
        }
        node.status = next;
        self.consensus_valid = false;
        Ok(())
    }

    /// Mark a computing node completed, recording its artifact digest.
    pub fn complete_node(&mut self, id: &str, digest: Digest) -> Result<(), GraphError> {
        self.set_status(id, NodeStatus::Completed)?;
        // set_status verified existence.
        let node = self.nodes.get_mut(id).expect("node present after set_status");
        node.digest = Some(digest);
        Ok(())
    }

    /// Mark a computing node failed. Any previously-set digest is cleared;
    /// a failed node has no recoverable digest.
    pub fn fail_node(&mut self, id: &str) -> Result<(), GraphError> {
        self.set_status(id, NodeStatus::Failed)?;
        let node = self.nodes.get_mut(id).expect("node present after set_status");
        node.digest = None;
        Ok(())
    }

    /// Collect every structural violation in the current graph state.
    pub fn consensus_violations(&self) -> Vec<ConsensusViolation> {
        let mut violations = Vec::new();

        // The insertion order index and the node set must describe the
        // same ids; `add_node` keeps them in lockstep, but a persisted
        // graph can arrive desynchronized.
        let indexed: HashSet<&str> = self.insertion.iter().map(|id| id.as_str()).collect();
        let mut unindexed: Vec<&NodeId> = self
            .nodes
            .keys()
            .filter(|id| !indexed.contains(id.as_str()))
            .collect();
        unindexed.sort();
        for id in unindexed {
            violations.push(ConsensusViolation::OrderIndexMismatch { node: id.clone() });
        }
        for id in &self.insertion {
            if !self.nodes.contains_key(id) {
                violations.push(ConsensusViolation::OrderIndexMismatch { node: id.clone() });
            }
        }

        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) {
                violations.push(ConsensusViolation::MissingEndpoint {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    missing: edge.from.clone(),
                });
            }
            if !self.nodes.contains_key(&edge.to) {
                violations.push(ConsensusViolation::MissingEndpoint {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    missing: edge.to.clone(),
                });
            }
        }

        for id in &self.insertion {
            let Some(node) = self.nodes.get(id) else { continue };
            if node.status == NodeStatus::Completed && node.digest.is_none() {
                violations.push(ConsensusViolation::CompletedWithoutDigest {
                    node: id.clone(),
                });
            }
            for dep in &node.deps {
                if !self.nodes.contains_key(dep) {
                    violations.push(ConsensusViolation::MissingDependency {
                        node: id.clone(),
                        missing: dep.clone(),
                    });
                }
            }
        }

        violations
    }

    /// Recompute consensus from scratch and stamp the result.
    ///
    /// Returns `false` (not an error) on any violation; callers wanting
    /// diagnostics read [`MetadataDag::consensus_violations`].
    pub fn validate_consensus(&mut self, validator: &str) -> bool {
        self.consensus_valid = self.consensus_violations().is_empty();
        if !self.validated_by.iter().any(|v| v == validator) {
            self.validated_by.push(validator.to_string());
        }
        self.consensus_valid
    }

    /// Kahn's algorithm with a deterministic tie-break.
    ///
    /// Among multiple zero-in-degree nodes, the one inserted earliest is
    /// emitted first. Restore correctness and test reproducibility depend
    /// on this order being fixed when the DAG is not a total order.
    ///
    /// Ordering constraints come from both declared `deps` and edges of
    /// every kind (duplicates collapse). Edge endpoints that reference
    /// missing nodes contribute no constraint; consensus validation is
    /// responsible for flagging them.
    pub fn topological_order(&self) -> TopoOrder {
        let index_of: HashMap<&str, usize> = self
            .insertion
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        // predecessor -> successor pairs, deduplicated
        let mut constraints: HashSet<(usize, usize)> = HashSet::new();
        for node in self.nodes.values() {
            let Some(&succ) = index_of.get(node.id.as_str()) else { continue };
            for dep in &node.deps {
                if let Some(&pred) = index_of.get(dep.as_str()) {
                    constraints.insert((pred, succ));
                }
            }
        }
        for edge in &self.edges {
            if let (Some(&pred), Some(&succ)) =
                (index_of.get(edge.from.as_str()), index_of.get(edge.to.as_str()))
            {
                constraints.insert((pred, succ));
            }
        }

        let n = self.insertion.len();
        let mut in_degree = vec![0usize; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(pred, succ) in &constraints {
            in_degree[succ] += 1;
            successors[pred].push(succ);
        }

        // Min-heap on insertion index keeps the tie-break stable.
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();

        let mut ordered = Vec::with_capacity(n);
        let mut emitted = vec![false; n];
        while let Some(Reverse(i)) = ready.pop() {
            emitted[i] = true;
            ordered.push(self.insertion[i].clone());
            for &succ in &successors[i] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.push(Reverse(succ));
                }
            }
        }

        let cyclic = (0..n)
            .filter(|&i| !emitted[i])
            .map(|i| self.insertion[i].clone())
            .collect();

        TopoOrder { ordered, cyclic }
    }

    /// Digests of all completed nodes, in insertion order, deduplicated.
    pub fn completed_digests(&self) -> Vec<Digest> {
        let mut seen = HashSet::new();
        self.nodes_ordered()
            .filter(|n| n.status == NodeStatus::Completed)
            .filter_map(|n| n.digest)
            .filter(|d| seen.insert(*d))
            .collect()
    }
}
