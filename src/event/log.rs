//! EventLog - append-only audit trail of engine activity
//!
//! - Event: envelope with id + timestamp + kind
//! - EventKind: job-level, chunk-level and incremental-update variants
//! - EventLog: thread-safe, append-only log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Single event in the engine log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since log creation (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All engine event types
///
/// Uses Arc<str> for graph and node ids to enable zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // JOB LEVEL
    // ═══════════════════════════════════════════
    JobQueued {
        job_id: Uuid,
        /// None for stateless calculations
        graph_id: Option<Arc<str>>,
        node_count: usize,
    },
    JobPartitioned {
        job_id: Uuid,
        chunks: usize,
        cross_edges: usize,
    },
    JobMerged {
        job_id: Uuid,
        /// Nodes whose chunk-local layer was raised by a cross-chunk edge
        shifted: usize,
        max_layer: u32,
    },
    JobCommitted {
        job_id: Uuid,
        graph_id: Arc<str>,
        node_count: usize,
        version: u64,
        duration_ms: u64,
    },
    JobFailed {
        job_id: Uuid,
        error: String,
    },

    // ═══════════════════════════════════════════
    // CHUNK LEVEL
    // ═══════════════════════════════════════════
    ChunkDispatched {
        job_id: Uuid,
        chunk: usize,
        worker: Arc<str>,
        attempt: u32,
        node_count: usize,
    },
    ChunkFailed {
        job_id: Uuid,
        chunk: usize,
        worker: Arc<str>,
        attempt: u32,
        error: String,
    },
    ChunkCompleted {
        job_id: Uuid,
        chunk: usize,
        worker: Arc<str>,
        duration_ms: u64,
    },

    // ═══════════════════════════════════════════
    // INCREMENTAL UPDATES
    // ═══════════════════════════════════════════
    EdgeApplied {
        graph_id: Arc<str>,
        source_id: Arc<str>,
        target_id: Arc<str>,
        shifted: usize,
        updated: usize,
    },
    EdgeRejected {
        graph_id: Arc<str>,
        source_id: Arc<str>,
        target_id: Arc<str>,
        error: String,
    },
    /// Cached writer state dropped because the store moved on
    StateReloaded {
        graph_id: Arc<str>,
        version: u64,
        hydrated: usize,
    },

    // ═══════════════════════════════════════════
    // PLACEMENT
    // ═══════════════════════════════════════════
    PinConflictResolved {
        node_id: Arc<str>,
        holder: Arc<str>,
        requested: u32,
        assigned: u32,
    },
    LayerRenumbered {
        layer: u32,
        size: usize,
    },
}

impl EventKind {
    /// Extract job_id if event belongs to a bulk job
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::JobQueued { job_id, .. }
            | Self::JobPartitioned { job_id, .. }
            | Self::JobMerged { job_id, .. }
            | Self::JobCommitted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::ChunkDispatched { job_id, .. }
            | Self::ChunkFailed { job_id, .. }
            | Self::ChunkCompleted { job_id, .. } => Some(*job_id),
            Self::EdgeApplied { .. }
            | Self::EdgeRejected { .. }
            | Self::StateReloaded { .. }
            | Self::PinConflictResolved { .. }
            | Self::LayerRenumbered { .. } => None,
        }
    }

    /// Check if this is a terminal job event
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::JobCommitted { .. } | Self::JobFailed { .. })
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event (thread-safe, returns event ID)
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned - use `with_events` for zero-copy access)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback
    ///
    /// Holds read lock for duration of callback - keep it short.
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    /// Events belonging to one bulk job
    pub fn filter_job(&self, job_id: Uuid) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.job_id() == Some(job_id))
                .cloned()
                .collect()
        })
    }

    /// Count events matching a predicate (no allocation)
    pub fn count_where(&self, predicate: impl Fn(&EventKind) -> bool) -> usize {
        self.with_events(|events| events.iter().filter(|e| predicate(&e.kind)).count())
    }

    /// Serialize to JSON for debugging
    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}
