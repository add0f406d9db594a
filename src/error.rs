//! Error types for the backup engine.
//!
//! Expected, recoverable outcomes (missing blob on a restore walk, delete of
//! an absent digest, delete of an immutable snapshot) are returned as values
//! on the loop-facing APIs. The variants here are the hard failures: they
//! indicate a corrupted store or a programming error upstream and must
//! propagate to the caller. Retry policy belongs to the caller, never to
//! this crate.

use crate::graph::ConsensusViolation;
use crate::types::{Digest, NodeId, SnapshotId};
use std::path::PathBuf;
use thiserror::Error;

/// Content store and snapshot index errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Content not found: {0}")]
    ContentNotFound(Digest),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    #[error("Corrupt store data at {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Digest mismatch for {expected}: payload hashes to {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata DAG errors.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph consensus violated: {}", format_violations(.0))]
    Inconsistent(Vec<ConsensusViolation>),

    #[error("Cycle detected involving nodes: {0:?}")]
    CycleDetected(Vec<NodeId>),

    #[error("Node not found in graph: {0}")]
    NodeNotFound(NodeId),

    #[error("Invalid status transition for node {node}: {from:?} -> {to:?}")]
    InvalidTransition {
        node: NodeId,
        from: crate::graph::NodeStatus,
        to: crate::graph::NodeStatus,
    },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),
}

fn format_violations(violations: &[ConsensusViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Top-level engine errors surfaced by the facade.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}
