//! Observability events emitted by the backup engine.
//!
//! Events are handed to an [`EventSink`] supplied by the embedding
//! application; the engine itself never interprets them. The default sink
//! forwards to `tracing`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod event_type {
    pub const CONTENT_STORED: &str = "cas.content.stored";
    pub const CONTENT_RETRIEVED: &str = "cas.content.retrieved";
    pub const CONTENT_DELETED: &str = "cas.content.deleted";
    pub const SNAPSHOT_CREATED: &str = "dag.snapshot.created";
    pub const SNAPSHOT_RESTORED: &str = "dag.snapshot.restored";
    pub const SNAPSHOT_DELETED: &str = "dag.snapshot.deleted";
}

/// A single observability event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
    pub source_component: String,
}

impl BackupEvent {
    pub fn now(event_type: &str, source_component: &str, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            payload,
            source_component: source_component.to_string(),
        }
    }
}

/// Consumer of backup events. Implementations must be cheap; emission sits
/// on store/retrieve paths.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BackupEvent);
}

/// Default sink: forwards events to `tracing` at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: BackupEvent) {
        tracing::info!(
            target: "cairn::telemetry",
            event_type = %event.event_type,
            source = %event.source_component,
            payload = %event.payload,
            "backup event"
        );
    }
}

/// Sink that records events in memory. Used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<BackupEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<BackupEvent> {
        self.events.lock().clone()
    }

    /// Event types recorded so far, in emission order.
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.event_type.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: BackupEvent) {
        self.events.lock().push(event);
    }
}
