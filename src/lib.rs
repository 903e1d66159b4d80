//! Strata - incremental DAG layering and layout engine
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  model/     Request/response types (BlockInput, NodeLayout)  │
//! │  graph/     Dense-index DAG (LayoutGraph)                    │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        LAYOUT ENGINE                         │
//! │  layout/    Layers, orders, pins, sublevels, coordinates     │
//! │             (sync, CPU-bound, no I/O)                        │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          RUNTIME                             │
//! │  runtime/   LayoutService, coordinator, writers, leases      │
//! │  store/     GraphStore trait + in-memory store               │
//! │  event/     Audit trail (EventLog, EventKind)                │
//! │  resilience/ Retry with backoff for chunk dispatch           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`model`] | Serde types for layout requests and responses |
//! | [`graph`] | Adjacency, reachability, Kahn order, components |
//! | [`layout`] | TopologyMaintainer, OrderAssigner, pin and collision resolvers |
//! | [`runtime`] | Bulk relayout jobs, per-graph FIFO writers, service facade |
//! | [`store`] | Versioned node/edge/layout storage |
//! | [`event`] | Event log for jobs, chunks and edge inserts |
//! | [`resilience`] | Bounded exponential backoff |
//! | [`config`] | `~/.config/strata/config.toml` + `STRATA_*` overrides |
//! | [`error`] | Error types with codes and fix suggestions |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod graph;
pub mod model;

// ═══════════════════════════════════════════════════════════════
// LAYOUT ENGINE
// ═══════════════════════════════════════════════════════════════
pub mod layout;

// ═══════════════════════════════════════════════════════════════
// RUNTIME - Scheduling, storage, events
// ═══════════════════════════════════════════════════════════════
pub mod event;
pub mod resilience;
pub mod runtime;
pub mod store;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING - Error handling, configuration
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

pub use config::{EngineSettings, PartitionKind, StrataConfig};
pub use error::{FixSuggestion, Result, StrataError};
pub use event::{Event, EventEmitter, EventKind, EventLog, NoopEmitter};
pub use graph::LayoutGraph;
pub use layout::{
    compute_layout, CollisionResolver, GraphState, OrderAssigner, PinConstraintResolver,
    PreparedGraph, TopologyMaintainer,
};
pub use model::{
    BlockInput, BlockLayout, LayoutOptions, LayoutRequest, LayoutResponse, LayoutStatistics,
    LinkInput, NodeId, NodeLayout, PinConflict,
};
pub use runtime::{
    ChunkWorker, DistributedCoordinator, JobHandle, JobState, LayoutService, LeaseManager,
    PartitionStrategy, TaskHandle, WorkerPool,
};
pub use store::{GraphSnapshot, GraphStore, InMemoryGraphStore};
