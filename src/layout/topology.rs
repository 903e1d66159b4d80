//! TopologyMaintainer - longest-path layering, kept consistent under edge inserts
//!
//! Layer rule: `layer(v) = max(layer(u) + 1)` over predecessors, sources at 0.
//!
//! - `assign_initial`: full longest-path layering over a topological order
//! - `on_edge_inserted`: reject the edge if it closes a cycle, otherwise push
//!   the target and its descendants down just far enough (iterative worklist)
//! - `optimize_two_pass`: median-based compaction that keeps every edge
//!   pointing to a strictly higher layer

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::graph::LayoutGraph;

/// A node moved to a new layer by a cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerShift {
    pub node: usize,
    pub from: u32,
    pub to: u32,
}

/// What an accepted edge insert did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeInsertion {
    /// False when the edge already existed
    pub inserted: bool,
    /// Net layer change per node, in first-touched order
    pub shifts: Vec<LayerShift>,
}

/// Layer assignment for every node of a graph (indexed by node seq)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyMaintainer {
    layers: Vec<u32>,
}

impl TopologyMaintainer {
    /// Wrap an existing assignment (e.g. loaded from the store)
    pub fn from_layers(layers: Vec<u32>) -> Self {
        Self { layers }
    }

    /// Longest-path layering over a precomputed topological order
    pub fn from_order(graph: &LayoutGraph, order: &[usize]) -> Self {
        let mut layers = vec![0u32; graph.len()];
        for &node in order {
            let layer = graph
                .predecessors(node)
                .iter()
                .map(|&p| layers[p] + 1)
                .max()
                .unwrap_or(0);
            layers[node] = layer;
        }
        Self { layers }
    }

    /// Longest-path layering; fails with `CycleDetected` on cyclic input
    pub fn assign_initial(graph: &LayoutGraph) -> Result<Self> {
        let order = graph.topological_order()?;
        Ok(Self::from_order(graph, &order))
    }

    #[inline]
    pub fn layer(&self, node: usize) -> u32 {
        self.layers[node]
    }

    pub fn layers(&self) -> &[u32] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<u32> {
        self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn max_layer(&self) -> u32 {
        self.layers.iter().copied().max().unwrap_or(0)
    }

    /// Register a node appended to the graph
    pub fn push_node(&mut self, layer: u32) {
        self.layers.push(layer);
    }

    pub(crate) fn set_layer(&mut self, node: usize, layer: u32) {
        self.layers[node] = layer;
    }

    /// Number of edges with `layer(target) <= layer(source)`
    pub fn violations(&self, graph: &LayoutGraph) -> usize {
        graph
            .edges()
            .filter(|&(s, t)| self.layers[t] <= self.layers[s])
            .count()
    }

    /// Insert `source -> target` and restore the layer rule
    ///
    /// The cycle check walks forward from `target`; on a hit nothing is
    /// mutated. A duplicate edge is accepted as a no-op.
    pub fn on_edge_inserted(
        &mut self,
        graph: &mut LayoutGraph,
        source: &str,
        target: &str,
    ) -> Result<EdgeInsertion> {
        let u = graph.require(source)?;
        let v = graph.require(target)?;

        if graph.contains_edge(u, v) {
            return Ok(EdgeInsertion::default());
        }
        if u != v {
            if let Some(path) = graph.find_path(v, u) {
                return Err(graph.describe_cycle(&path));
            }
        }
        // Self-loops surface here as CycleDetected
        graph.add_edge(u, v)?;

        Ok(EdgeInsertion {
            inserted: true,
            shifts: self.cascade(graph, u, v),
        })
    }

    /// Restore the layer rule across an edge already present in `graph`
    ///
    /// Only raises layers: every node ends at `max(current, pred + 1)`.
    pub(crate) fn cascade(&mut self, graph: &LayoutGraph, u: usize, v: usize) -> Vec<LayerShift> {
        if self.layers[v] > self.layers[u] {
            return Vec::new();
        }

        // node -> original layer, plus first-touched order
        let mut original: FxHashMap<usize, u32> = FxHashMap::default();
        let mut touched: Vec<usize> = Vec::new();
        let mut queue = VecDeque::new();

        original.insert(v, self.layers[v]);
        touched.push(v);
        self.layers[v] = self.layers[u] + 1;
        queue.push_back(v);

        while let Some(x) = queue.pop_front() {
            let next = self.layers[x] + 1;
            for &w in graph.successors(x) {
                if self.layers[w] < next {
                    if let std::collections::hash_map::Entry::Vacant(slot) = original.entry(w) {
                        slot.insert(self.layers[w]);
                        touched.push(w);
                    }
                    self.layers[w] = next;
                    queue.push_back(w);
                }
            }
        }

        touched
            .into_iter()
            .map(|node| LayerShift {
                node,
                from: original[&node],
                to: self.layers[node],
            })
            .collect()
    }

    /// Two-pass median optimization
    ///
    /// Forward pass pulls each node with predecessors toward
    /// `median(pred layers) + 1`, the backward pass pulls each node with
    /// successors toward `median(succ layers) - 1`. Both stay inside the
    /// window `[max(pred) + 1, min(succ) - 1]`, so edges keep pointing down.
    pub fn optimize_two_pass(&mut self, graph: &LayoutGraph, order: &[usize]) {
        for &node in order {
            let preds = graph.predecessors(node);
            if preds.is_empty() {
                continue;
            }
            let pred_layers: Vec<u32> = preds.iter().map(|&p| self.layers[p]).collect();
            let min_layer = pred_layers.iter().copied().max().unwrap_or(0) as i64 + 1;
            let max_layer = graph
                .successors(node)
                .iter()
                .map(|&s| self.layers[s] as i64 - 1)
                .min();

            if max_layer.is_some_and(|max| min_layer > max) {
                continue;
            }
            let mut optimal = min_layer.max(round_half_even(median(&pred_layers) + 1.0));
            if let Some(max) = max_layer {
                optimal = optimal.min(max);
            }
            self.layers[node] = optimal.max(0) as u32;
        }

        for &node in order.iter().rev() {
            let succs = graph.successors(node);
            if succs.is_empty() {
                continue;
            }
            let succ_layers: Vec<u32> = succs.iter().map(|&s| self.layers[s]).collect();
            let max_layer = succ_layers.iter().copied().min().unwrap_or(0) as i64 - 1;
            let min_layer = graph
                .predecessors(node)
                .iter()
                .map(|&p| self.layers[p] as i64 + 1)
                .max()
                .unwrap_or(0);

            if min_layer > max_layer {
                continue;
            }
            let optimal = max_layer
                .min(round_half_even(median(&succ_layers) - 1.0))
                .max(min_layer);
            self.layers[node] = optimal.max(0) as u32;
        }
    }
}

/// Median of a non-empty slice (mean of the middle pair for even lengths)
fn median(values: &[u32]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0
    } else {
        sorted[mid] as f64
    }
}

#[inline]
fn round_half_even(value: f64) -> i64 {
    value.round_ties_even() as i64
}
