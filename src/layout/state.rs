//! GraphState - cached layout of one stored graph for incremental updates
//!
//! Hydrated from a store snapshot; keeps the graph, layering and orders in
//! memory so an edge insert only touches the affected descendants. Levels,
//! sublevels and coordinates are re-derived after each change and only the
//! nodes whose persisted properties differ are reported.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::event::{EventEmitter, NoopEmitter};
use crate::graph::LayoutGraph;
use crate::layout::order::{OrderAssigner, Placement};
use crate::layout::pipeline::{place_nodes, NodeSpec};
use crate::layout::topology::TopologyMaintainer;
use crate::model::{LayoutOptions, NodeId, NodeLayout};
use crate::store::GraphSnapshot;

/// A node's layer change caused by an edge insert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftReport {
    pub id: NodeId,
    pub from: u32,
    pub to: u32,
}

/// Outcome of one accepted edge insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeReport {
    pub graph_id: NodeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    /// False when the edge already existed
    pub inserted: bool,
    pub shifted: Vec<ShiftReport>,
    /// Nodes whose persisted layout changed
    pub updates: Vec<(NodeId, NodeLayout)>,
    pub renumbered_layers: Vec<u32>,
}

/// Freshly hydrated state plus layout writes it still owes the store
#[derive(Debug)]
pub struct Hydration {
    pub state: GraphState,
    pub pending: Vec<(NodeId, NodeLayout)>,
    /// Nodes that had no stored layout
    pub placed: usize,
}

#[derive(Debug, Clone)]
pub struct GraphState {
    graph_id: NodeId,
    version: u64,
    graph: LayoutGraph,
    specs: Vec<NodeSpec>,
    topology: TopologyMaintainer,
    orders: OrderAssigner,
    options: LayoutOptions,
    /// What the store currently holds, per node
    persisted: Vec<Option<NodeLayout>>,
}

impl GraphState {
    /// Rebuild state from a snapshot
    ///
    /// Stored layer/order are reused. Nodes without a layout start at
    /// layer 0 (tail) and their edges are replayed through the incremental
    /// insert. A graph with no layout at all, or an inconsistent stored
    /// layering, gets a fresh longest-path layering.
    pub fn from_snapshot(
        snapshot: &GraphSnapshot,
        options: LayoutOptions,
        emitter: &dyn EventEmitter,
    ) -> Result<Hydration> {
        let mut graph = LayoutGraph::with_capacity(snapshot.nodes.len(), snapshot.edges.len());
        let mut specs = Vec::with_capacity(snapshot.nodes.len());
        let mut persisted = Vec::with_capacity(snapshot.nodes.len());
        for node in &snapshot.nodes {
            graph.add_node(&node.id)?;
            specs.push(NodeSpec {
                is_pinned: node.is_pinned,
                pinned_level: if node.is_pinned { node.pinned_level } else { None },
            });
            persisted.push(node.layout);
        }

        let placed_count = persisted.iter().filter(|l| l.is_some()).count();
        let unplaced = persisted.len() - placed_count;

        let (topology, orders) = if placed_count == 0 {
            for (s, t) in &snapshot.edges {
                graph.add_edge_by_id(s, t)?;
            }
            fresh_layering(&graph)?
        } else {
            match hydrate_stored(&mut graph, snapshot, &persisted)? {
                Some(parts) => parts,
                None => {
                    tracing::warn!(
                        graph = ?snapshot.graph_id,
                        "stored layering violates edges; recomputing"
                    );
                    fresh_layering(&graph)?
                }
            }
        };

        let mut state = Self {
            graph_id: snapshot
                .graph_id
                .clone()
                .unwrap_or_else(|| Arc::from("")),
            version: snapshot.version,
            graph,
            specs,
            topology,
            orders,
            options,
            persisted,
        };
        state.orders.drain_renumbered(emitter);
        let pending = state.refresh(emitter)?;

        Ok(Hydration {
            state,
            pending,
            placed: unplaced,
        })
    }

    /// OnEdgeInserted: reject cycles, cascade layers, move orders, re-place
    ///
    /// On `CycleDetected` the state is untouched.
    pub fn apply_edge(
        &mut self,
        source: &str,
        target: &str,
        emitter: &dyn EventEmitter,
    ) -> Result<EdgeReport> {
        let insertion = self
            .topology
            .on_edge_inserted(&mut self.graph, source, target)?;

        let mut shifted = Vec::with_capacity(insertion.shifts.len());
        for shift in &insertion.shifts {
            let id = Arc::clone(self.graph.id(shift.node));
            self.orders.move_to(shift.node, &id, shift.to);
            shifted.push(ShiftReport {
                id,
                from: shift.from,
                to: shift.to,
            });
        }
        let renumbered_layers = self.orders.drain_renumbered(emitter);
        let updates = self.refresh(&NoopEmitter)?;

        Ok(EdgeReport {
            graph_id: Arc::clone(&self.graph_id),
            source_id: Arc::clone(self.graph.id(self.graph.require(source)?)),
            target_id: Arc::clone(self.graph.id(self.graph.require(target)?)),
            inserted: insertion.inserted,
            shifted,
            updates,
            renumbered_layers,
        })
    }

    /// Re-derive placement; returns nodes whose layout changed
    ///
    /// Runs over every node, not just the shifted ones: a sublevel split in
    /// one level moves the y of every level below it.
    fn refresh(&mut self, emitter: &dyn EventEmitter) -> Result<Vec<(NodeId, NodeLayout)>> {
        let placed = place_nodes(
            &self.graph,
            &self.specs,
            &self.topology,
            &self.orders,
            &self.options,
            emitter,
        )?;

        let mut changed = Vec::new();
        for (node, layout) in placed.layouts.into_iter().enumerate() {
            if self.persisted[node] != Some(layout) {
                self.persisted[node] = Some(layout);
                changed.push((Arc::clone(self.graph.id(node)), layout));
            }
        }
        Ok(changed)
    }

    pub fn graph_id(&self) -> &NodeId {
        &self.graph_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Record the store version after a successful commit
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    pub fn graph(&self) -> &LayoutGraph {
        &self.graph
    }

    pub fn layer_of(&self, id: &str) -> Option<u32> {
        self.graph.index_of(id).map(|i| self.topology.layer(i))
    }

    pub fn layout_of(&self, id: &str) -> Option<NodeLayout> {
        self.graph.index_of(id).and_then(|i| self.persisted[i])
    }

    /// Every edge points to a strictly higher layer
    pub fn is_consistent(&self) -> bool {
        self.topology.violations(&self.graph) == 0
    }
}

/// Longest-path layering and seq-ordered positions
fn fresh_layering(graph: &LayoutGraph) -> Result<(TopologyMaintainer, OrderAssigner)> {
    let topology = TopologyMaintainer::assign_initial(graph)?;
    let orders = OrderAssigner::build(graph.ids(), topology.layers());
    Ok((topology, orders))
}

/// Reuse stored layer/order; `None` if the stored layering is inconsistent
///
/// Adds every snapshot edge to `graph`.
fn hydrate_stored(
    graph: &mut LayoutGraph,
    snapshot: &GraphSnapshot,
    persisted: &[Option<NodeLayout>],
) -> Result<Option<(TopologyMaintainer, OrderAssigner)>> {
    let mut topology = TopologyMaintainer::default();
    let mut orders = OrderAssigner::new();
    for (node, layout) in persisted.iter().enumerate() {
        let id = Arc::clone(graph.id(node));
        match layout {
            Some(l) => {
                topology.push_node(l.layer);
                orders.insert_at(node, &id, l.layer, l.order);
            }
            None => topology.push_node(0),
        }
    }
    // Unplaced nodes join layer 0 after the stored ones
    for (node, layout) in persisted.iter().enumerate() {
        if layout.is_none() {
            let id = Arc::clone(graph.id(node));
            orders.assign(node, &id, 0, Placement::Tail);
        }
    }

    let mut replay: Vec<(NodeId, NodeId)> = Vec::new();
    for (s, t) in &snapshot.edges {
        let si = graph.require(s)?;
        let ti = graph.require(t)?;
        if persisted[si].is_some() && persisted[ti].is_some() {
            graph.add_edge(si, ti)?;
        } else {
            replay.push((Arc::clone(s), Arc::clone(t)));
        }
    }
    if topology.violations(graph) > 0 {
        for (s, t) in &replay {
            graph.add_edge_by_id(s, t)?;
        }
        return Ok(None);
    }

    for (s, t) in replay {
        let insertion = topology
            .on_edge_inserted(graph, &s, &t)
            .map_err(|e| match e {
                StrataError::CycleDetected { cycle, .. } => StrataError::StoreError {
                    reason: format!("stored graph is cyclic: {}", cycle),
                },
                other => other,
            })?;
        for shift in insertion.shifts {
            let id = Arc::clone(graph.id(shift.node));
            orders.move_to(shift.node, &id, shift.to);
        }
    }
    Ok(Some((topology, orders)))
}

/// Merge layout writes, later entries winning, first-seen order kept
pub fn merge_updates(
    first: Vec<(NodeId, NodeLayout)>,
    second: Vec<(NodeId, NodeLayout)>,
) -> Vec<(NodeId, NodeLayout)> {
    let mut slots: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut merged: Vec<(NodeId, NodeLayout)> = Vec::with_capacity(first.len() + second.len());
    for (id, layout) in first.into_iter().chain(second) {
        match slots.get(&id) {
            Some(&i) => merged[i].1 = layout,
            None => {
                slots.insert(Arc::clone(&id), merged.len());
                merged.push((id, layout));
            }
        }
    }
    merged
}
