//! Layout engine
//!
//! - `topology`: longest-path layers, incremental cascade, median optimization
//! - `order`: fractional in-layer order with renumbering
//! - `pin`: exclusive levels for pinned nodes
//! - `collision`: density-based sublevel splitting
//! - `pipeline`: chunk / merge / finalize stages
//! - `state`: cached per-graph state for incremental edge inserts

pub mod collision;
pub mod order;
pub mod pin;
pub mod pipeline;
pub mod state;
pub mod topology;

pub use collision::{CollisionReport, CollisionResolver, SublevelMember, SublevelSlot};
pub use order::{OrderAssigner, Placement, Slot, ORDER_EPSILON, ORDER_SPACING};
pub use pin::{PinConstraintResolver, PinResolution, PinnedNode};
pub use pipeline::{
    compute_layout, failure_response, finalize, layer_chunk, merge_chunks, place_nodes,
    ChunkEntry, ChunkLayout, ComputedLayout, MergeOutcome, NodeSpec, PlacedNodes, PreparedGraph,
};
pub use state::{merge_updates, EdgeReport, GraphState, Hydration, ShiftReport};
pub use topology::{EdgeInsertion, LayerShift, TopologyMaintainer};
