//! Graph store - persistent node/edge storage the engine reads and writes
//!
//! The annotation layer owns node and edge existence; the engine only
//! writes layout properties. Every mutation bumps the graph version, which
//! writers use to detect stale cached state.
//!
//! - `GraphStore`: async trait for any backing store
//! - `InMemoryGraphStore`: DashMap + parking_lot implementation

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{BlockInput, NodeId, NodeLayout};

pub use memory::InMemoryGraphStore;

/// A node as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub id: NodeId,
    pub is_pinned: bool,
    pub pinned_level: Option<u32>,
    /// Engine-written properties; None until first laid out
    pub layout: Option<NodeLayout>,
}

/// Consistent view of one graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub graph_id: Option<NodeId>,
    pub version: u64,
    /// Nodes in insertion order
    pub nodes: Vec<StoredNode>,
    /// Edges in insertion order
    pub edges: Vec<(NodeId, NodeId)>,
}

impl GraphSnapshot {
    /// Nodes that have never been laid out
    pub fn unplaced(&self) -> usize {
        self.nodes.iter().filter(|n| n.layout.is_none()).count()
    }
}

/// One atomic engine write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutBatch {
    /// Edges to insert alongside the layout (existing edges are skipped)
    pub edges: Vec<(NodeId, NodeId)>,
    /// Layout properties to set
    pub layouts: Vec<(NodeId, NodeLayout)>,
    /// Clear the layout of every node not listed in `layouts`
    pub replace_all: bool,
    /// Reject the batch if the graph moved past this version
    pub expected_version: Option<u64>,
}

impl LayoutBatch {
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.layouts.is_empty() && !self.replace_all
    }
}

/// Backing store for graphs
///
/// `write_layout` is all-or-nothing: either every node and edge in the
/// batch is written and the version bumps once, or nothing changes.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn create_graph(&self, graph_id: &str) -> Result<()>;

    /// Insert a node or update its pin attributes (layout is preserved)
    async fn upsert_node(&self, graph_id: &str, node: BlockInput) -> Result<()>;

    /// Remove a node and its incident edges
    async fn remove_node(&self, graph_id: &str, node_id: &str) -> Result<()>;

    /// Returns false if the edge already existed
    async fn insert_edge(&self, graph_id: &str, source: &str, target: &str) -> Result<bool>;

    /// Returns false if the edge did not exist
    async fn remove_edge(&self, graph_id: &str, source: &str, target: &str) -> Result<bool>;

    async fn load_graph(&self, graph_id: &str) -> Result<GraphSnapshot>;

    async fn node_count(&self, graph_id: &str) -> Result<usize>;

    async fn version(&self, graph_id: &str) -> Result<u64>;

    /// Apply a batch atomically; returns the new version
    async fn write_layout(&self, graph_id: &str, batch: LayoutBatch) -> Result<u64>;

    /// Drop every layout property; returns the new version
    async fn clear_layout(&self, graph_id: &str) -> Result<u64>;
}
