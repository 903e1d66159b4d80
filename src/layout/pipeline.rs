//! Layout pipeline - the stages shared by every entry point
//!
//! ```text
//! PreparedGraph ──► layer_chunk (per chunk) ──► merge_chunks ──► finalize
//!                                                                  │
//!        optimize ─► order by seq ─► pins ─► collisions ─► coordinates
//! ```
//!
//! The synchronous path runs the same stages over a single chunk.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::event::EventEmitter;
use crate::graph::LayoutGraph;
use crate::layout::collision::{CollisionReport, CollisionResolver, SublevelMember, SublevelSlot};
use crate::layout::order::OrderAssigner;
use crate::layout::pin::{PinConstraintResolver, PinResolution, PinnedNode};
use crate::layout::topology::TopologyMaintainer;
use crate::model::{
    BlockLayout, LayoutOptions, LayoutRequest, LayoutResponse, LayoutStatistics, NodeId,
    NodeLayout, PinConflict,
};
use crate::store::GraphSnapshot;

// ═══════════════════════════════════════════════════════════════
// Input
// ═══════════════════════════════════════════════════════════════

/// Pin attributes of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub is_pinned: bool,
    pub pinned_level: Option<u32>,
}

/// Validated graph plus per-node pin attributes (indexed by seq)
#[derive(Debug, Clone, Default)]
pub struct PreparedGraph {
    pub graph: LayoutGraph,
    pub specs: Vec<NodeSpec>,
}

impl PreparedGraph {
    /// Validate a request: unique non-empty ids, known endpoints, no self-loops
    ///
    /// Duplicate links collapse to one. Cycles are detected later.
    pub fn from_request(request: &LayoutRequest) -> Result<Self> {
        let mut graph = LayoutGraph::with_capacity(request.nodes.len(), request.edges.len());
        let mut specs = Vec::with_capacity(request.nodes.len());

        for block in &request.nodes {
            if block.id.trim().is_empty() {
                return Err(StrataError::ValidationError {
                    reason: "block id must not be empty".to_string(),
                });
            }
            graph.add_node(&block.id)?;
            specs.push(NodeSpec {
                is_pinned: block.is_pinned,
                pinned_level: if block.is_pinned { block.level } else { None },
            });
        }

        for link in &request.edges {
            let source = known_endpoint(&graph, &link.source_id, link)?;
            let target = known_endpoint(&graph, &link.target_id, link)?;
            graph.add_edge(source, target)?;
        }

        Ok(Self { graph, specs })
    }

    /// Build from a stored graph; node order is insertion order
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Result<Self> {
        let mut graph = LayoutGraph::with_capacity(snapshot.nodes.len(), snapshot.edges.len());
        let mut specs = Vec::with_capacity(snapshot.nodes.len());
        for node in &snapshot.nodes {
            graph.add_node(&node.id)?;
            specs.push(NodeSpec {
                is_pinned: node.is_pinned,
                pinned_level: if node.is_pinned { node.pinned_level } else { None },
            });
        }
        for (source, target) in &snapshot.edges {
            graph.add_edge_by_id(source, target)?;
        }
        Ok(Self { graph, specs })
    }

    /// Pinned nodes in input order
    pub fn pinned_nodes(&self) -> Vec<PinnedNode> {
        pinned_nodes(&self.graph, &self.specs)
    }

    pub fn pinned_count(&self) -> usize {
        self.specs.iter().filter(|s| s.is_pinned).count()
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Statistics known before any layout work (used for failures too)
    pub fn input_statistics(&self) -> LayoutStatistics {
        let pinned = self.pinned_count();
        LayoutStatistics {
            total_blocks: self.graph.len(),
            total_links: self.graph.edge_count(),
            isolated_blocks: self.graph.isolated_count(),
            pinned_blocks: pinned,
            unpinned_blocks: self.graph.len() - pinned,
            ..Default::default()
        }
    }
}

fn known_endpoint(
    graph: &LayoutGraph,
    id: &str,
    link: &crate::model::LinkInput,
) -> Result<usize> {
    graph
        .index_of(id)
        .ok_or_else(|| StrataError::ValidationError {
            reason: format!(
                "link {} -> {} references unknown block '{}'",
                link.source_id, link.target_id, id
            ),
        })
}

pub(crate) fn pinned_nodes(graph: &LayoutGraph, specs: &[NodeSpec]) -> Vec<PinnedNode> {
    specs
        .iter()
        .enumerate()
        .filter(|(_, spec)| spec.is_pinned)
        .map(|(node, spec)| PinnedNode {
            node,
            id: Arc::clone(graph.id(node)),
            level: spec.pinned_level,
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════
// Chunk stage
// ═══════════════════════════════════════════════════════════════

/// Layer and chunk-local order of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub id: NodeId,
    pub layer: u32,
    pub order: f64,
}

/// Output of laying out one chunk in isolation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkLayout {
    pub entries: Vec<ChunkEntry>,
}

/// Longest-path layering of a chunk; `nodes` in seq order
///
/// Edges with an endpoint outside the chunk are ignored.
pub fn layer_chunk(nodes: &[NodeId], edges: &[(NodeId, NodeId)]) -> Result<ChunkLayout> {
    let mut graph = LayoutGraph::with_capacity(nodes.len(), edges.len());
    for id in nodes {
        graph.add_node(id)?;
    }
    for (source, target) in edges {
        if let (Some(s), Some(t)) = (graph.index_of(source), graph.index_of(target)) {
            graph.add_edge(s, t)?;
        }
    }

    let topology = TopologyMaintainer::assign_initial(&graph)?;
    let orders = OrderAssigner::build(graph.ids(), topology.layers());

    let entries = (0..graph.len())
        .map(|node| ChunkEntry {
            id: Arc::clone(graph.id(node)),
            layer: topology.layer(node),
            order: orders.order(node).unwrap_or_default(),
        })
        .collect();
    Ok(ChunkLayout { entries })
}

// ═══════════════════════════════════════════════════════════════
// Merge stage
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub topology: TopologyMaintainer,
    /// Nodes whose chunk-local layer was raised by cross-chunk edges
    pub shifted: usize,
}

/// Union chunk layers, then reconcile cross-chunk edges
///
/// Cross edges are applied in (source id, target id) order through the
/// incremental cascade, which yields the global longest-path layering
/// whatever the partition was. `graph` must be acyclic and already hold
/// every edge.
pub fn merge_chunks(
    graph: &LayoutGraph,
    chunks: Vec<ChunkLayout>,
    cross_edges: &[(usize, usize)],
) -> Result<MergeOutcome> {
    let mut layers: Vec<Option<u32>> = vec![None; graph.len()];
    for chunk in chunks {
        for entry in chunk.entries {
            let node = graph.require(&entry.id)?;
            if layers[node].replace(entry.layer).is_some() {
                return Err(StrataError::ValidationError {
                    reason: format!("node '{}' appears in more than one chunk", entry.id),
                });
            }
        }
    }

    let layers: Vec<u32> = layers
        .into_iter()
        .enumerate()
        .map(|(node, layer)| {
            layer.ok_or_else(|| StrataError::ValidationError {
                reason: format!("no chunk produced a layer for '{}'", graph.id(node)),
            })
        })
        .collect::<Result<_>>()?;

    let mut sorted: Vec<(usize, usize)> = cross_edges.to_vec();
    sorted.sort_by(|a, b| {
        graph
            .id(a.0)
            .cmp(graph.id(b.0))
            .then_with(|| graph.id(a.1).cmp(graph.id(b.1)))
    });

    let mut topology = TopologyMaintainer::from_layers(layers);
    let mut shifted: FxHashSet<usize> = FxHashSet::default();
    for (u, v) in sorted {
        for shift in topology.cascade(graph, u, v) {
            shifted.insert(shift.node);
        }
    }

    Ok(MergeOutcome {
        topology,
        shifted: shifted.len(),
    })
}

// ═══════════════════════════════════════════════════════════════
// Placement stage
// ═══════════════════════════════════════════════════════════════

/// Levels, sublevels and coordinates for every node
#[derive(Debug, Clone)]
pub struct PlacedNodes {
    pub layouts: Vec<NodeLayout>,
    pub pins: PinResolution,
    pub collisions: CollisionReport,
}

/// Pins ─► levels ─► collisions ─► coordinates
pub fn place_nodes(
    graph: &LayoutGraph,
    specs: &[NodeSpec],
    topology: &TopologyMaintainer,
    orders: &OrderAssigner,
    options: &LayoutOptions,
    emitter: &dyn EventEmitter,
) -> Result<PlacedNodes> {
    let pins = PinConstraintResolver::new(options.strict_pins)
        .resolve(&pinned_nodes(graph, specs), emitter)?;

    let members: Vec<SublevelMember> = (0..graph.len())
        .map(|node| SublevelMember {
            node,
            id: Arc::clone(graph.id(node)),
            level: pins.level(node, topology.layer(node)),
            order: orders.order(node).unwrap_or_default(),
        })
        .collect();

    let collisions = CollisionResolver::new(options.blocks_per_sublevel).resolve(&members);
    let extra_rows = collisions.extra_rows_before();

    let layouts = members
        .iter()
        .map(|m| {
            let slot = collisions.slot(m.node).unwrap_or(SublevelSlot {
                sublevel_id: 0,
                row: 0,
            });
            let rows_above = extra_rows.get(&m.level).copied().unwrap_or(0) + slot.row;
            NodeLayout {
                layer: topology.layer(m.node),
                order: m.order,
                level: m.level,
                sublevel_id: slot.sublevel_id,
                x: m.order * options.horizontal_spacing,
                y: m.level as f64 * options.layer_spacing
                    + rows_above as f64 * options.sublevel_spacing,
            }
        })
        .collect();

    Ok(PlacedNodes {
        layouts,
        pins,
        collisions,
    })
}

// ═══════════════════════════════════════════════════════════════
// Full computation
// ═══════════════════════════════════════════════════════════════

/// A finished layout, node-aligned with the prepared graph
#[derive(Debug, Clone)]
pub struct ComputedLayout {
    pub ids: Vec<NodeId>,
    pub layouts: Vec<NodeLayout>,
    pub pin_conflicts: Vec<PinConflict>,
    pub statistics: LayoutStatistics,
}

impl ComputedLayout {
    /// (id, layout) pairs in input order
    pub fn entries(&self) -> impl Iterator<Item = (&NodeId, &NodeLayout)> {
        self.ids.iter().zip(&self.layouts)
    }

    pub fn into_response(self, processing_time_ms: u64) -> LayoutResponse {
        let blocks = self
            .ids
            .iter()
            .zip(&self.layouts)
            .map(|(id, l)| BlockLayout {
                id: id.to_string(),
                x: l.x,
                y: l.y,
                layer: l.layer,
                level: l.level,
                sublevel_id: l.sublevel_id,
                order: l.order,
            })
            .collect();
        LayoutResponse {
            blocks,
            statistics: LayoutStatistics {
                processing_time_ms,
                ..self.statistics
            },
            pin_conflicts: self.pin_conflicts,
            success: true,
            error_message: None,
        }
    }
}

/// Optimize, order by seq, then place
///
/// `topology` is the (merged) longest-path layering of `prepared.graph`.
pub fn finalize(
    prepared: &PreparedGraph,
    mut topology: TopologyMaintainer,
    options: &LayoutOptions,
    emitter: &dyn EventEmitter,
) -> Result<ComputedLayout> {
    let graph = &prepared.graph;
    if options.optimize_layout {
        let order = graph.topological_order()?;
        topology.optimize_two_pass(graph, &order);
    }

    // Reconciling chunk-local orders: one slot per node, by global seq
    let orders = OrderAssigner::build(graph.ids(), topology.layers());
    let placement = place_nodes(graph, &prepared.specs, &topology, &orders, options, emitter)?;

    let total_width = placement
        .layouts
        .iter()
        .map(|l| l.x + options.horizontal_spacing)
        .fold(0.0, f64::max);
    let total_height = placement
        .layouts
        .iter()
        .map(|l| l.y + options.layer_spacing)
        .fold(0.0, f64::max);

    let statistics = LayoutStatistics {
        total_levels: placement.collisions.total_levels(),
        total_sublevels: placement.collisions.total_sublevels(),
        max_layer: topology.max_layer(),
        is_acyclic: true,
        total_width,
        total_height,
        ..prepared.input_statistics()
    };

    Ok(ComputedLayout {
        ids: graph.ids().to_vec(),
        layouts: placement.layouts,
        pin_conflicts: placement.pins.conflicts().to_vec(),
        statistics,
    })
}

/// Single-chunk layout of a prepared graph
pub fn compute_layout(
    prepared: &PreparedGraph,
    options: &LayoutOptions,
    emitter: &dyn EventEmitter,
) -> Result<ComputedLayout> {
    let chunk = layer_chunk(prepared.graph.ids(), &all_edges(&prepared.graph))?;
    let merged = merge_chunks(&prepared.graph, vec![chunk], &[])?;
    finalize(prepared, merged.topology, options, emitter)
}

/// Failure response carrying input statistics
pub fn failure_response(
    error: &StrataError,
    prepared: Option<&PreparedGraph>,
    processing_time_ms: u64,
) -> LayoutResponse {
    let mut statistics = prepared
        .map(PreparedGraph::input_statistics)
        .unwrap_or_default();
    statistics.is_acyclic = !matches!(error, StrataError::CycleDetected { .. });
    statistics.processing_time_ms = processing_time_ms;
    LayoutResponse::failure(error.to_string(), statistics)
}

pub(crate) fn all_edges(graph: &LayoutGraph) -> Vec<(NodeId, NodeId)> {
    graph
        .edges()
        .map(|(s, t)| (Arc::clone(graph.id(s)), Arc::clone(graph.id(t))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NoopEmitter;
    use crate::model::{BlockInput, LinkInput};
    use pretty_assertions::assert_eq;

    fn request(nodes: &[&str], edges: &[(&str, &str)]) -> LayoutRequest {
        LayoutRequest {
            nodes: nodes.iter().map(|n| BlockInput::new(*n)).collect(),
            edges: edges.iter().map(|(s, t)| LinkInput::new(*s, *t)).collect(),
            options: None,
        }
    }

    #[test]
    fn unknown_endpoint_is_validation_error() {
        let err = PreparedGraph::from_request(&request(&["a"], &[("a", "b")])).unwrap_err();
        assert_eq!(err.code(), "STRATA-002");
    }

    #[test]
    fn unpinned_level_is_dropped() {
        let mut req = request(&["a"], &[]);
        req.nodes[0].level = Some(5);
        let prepared = PreparedGraph::from_request(&req).unwrap();
        assert_eq!(prepared.specs[0].pinned_level, None);
    }

    #[test]
    fn chunk_ignores_foreign_edges() {
        let nodes: Vec<NodeId> = vec![Arc::from("a"), Arc::from("b")];
        let edges = vec![
            (Arc::from("a"), Arc::from("b")),
            (Arc::from("x"), Arc::from("a")),
        ];
        let chunk = layer_chunk(&nodes, &edges).unwrap();
        assert_eq!(chunk.entries[0].layer, 0);
        assert_eq!(chunk.entries[1].layer, 1);
    }

    #[test]
    fn merge_reconciles_cross_edges() {
        let prepared =
            PreparedGraph::from_request(&request(&["a", "b", "c", "d"], &[("a", "b"), ("b", "c"), ("c", "d")]))
                .unwrap();
        let g = &prepared.graph;
        let left = layer_chunk(&[Arc::from("a"), Arc::from("b")], &all_edges(g)).unwrap();
        let right = layer_chunk(&[Arc::from("c"), Arc::from("d")], &all_edges(g)).unwrap();
        let merged = merge_chunks(g, vec![left, right], &[(1, 2)]).unwrap();
        assert_eq!(merged.topology.layers(), &[0, 1, 2, 3]);
        assert_eq!(merged.shifted, 2);
    }

    #[test]
    fn merge_rejects_missing_nodes() {
        let prepared = PreparedGraph::from_request(&request(&["a", "b"], &[])).unwrap();
        let partial = layer_chunk(&[Arc::from("a")], &[]).unwrap();
        let err = merge_chunks(&prepared.graph, vec![partial], &[]).unwrap_err();
        assert_eq!(err.code(), "STRATA-002");
    }

    #[test]
    fn coordinates_without_pins_or_collisions() {
        let prepared =
            PreparedGraph::from_request(&request(&["a", "b", "c"], &[("a", "b"), ("a", "c")])).unwrap();
        let options = LayoutOptions {
            optimize_layout: false,
            ..Default::default()
        };
        let layout = compute_layout(&prepared, &options, &NoopEmitter).unwrap();
        let ys: Vec<f64> = layout.layouts.iter().map(|l| l.y).collect();
        assert_eq!(ys, vec![0.0, 130.0, 130.0]);
        let xs: Vec<f64> = layout.layouts.iter().map(|l| l.x).collect();
        assert_eq!(xs, vec![0.0, 0.0, 240.0]);
        assert_eq!(layout.statistics.total_levels, 2);
        assert_eq!(layout.statistics.total_width, 480.0);
    }

    #[test]
    fn failure_response_marks_cycles() {
        let err = StrataError::CycleDetected {
            source_id: "b".into(),
            target_id: "a".into(),
            cycle: "a -> b -> a".into(),
        };
        let response = failure_response(&err, None, 3);
        assert!(!response.success);
        assert!(!response.statistics.is_acyclic);
        assert_eq!(response.statistics.processing_time_ms, 3);
    }
}
