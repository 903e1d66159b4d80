//! LayoutGraph - dense-index DAG used by every layout stage
//!
//! Performance notes:
//! - Nodes get a dense index in insertion order; that index doubles as
//!   the node's `seq` (input position) for deterministic tie-breaking
//! - Arc<str> ids for zero-cost cloning into results and events
//! - FxHashMap for id lookup, SmallVec for short adjacency lists
//!
//! DAG validation:
//! - Kahn's algorithm (iterative, no recursion depth limit)
//! - Cycle witness recovered from the nodes Kahn could not release

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::{Result, StrataError};
use crate::model::NodeId;

/// Stack-allocated adjacency: most blocks have 0-4 links per direction
pub type AdjVec = SmallVec<[usize; 4]>;

/// Directed graph over dense node indices
#[derive(Debug, Clone, Default)]
pub struct LayoutGraph {
    ids: Vec<NodeId>,
    index: FxHashMap<NodeId, usize>,
    successors: Vec<AdjVec>,
    predecessors: Vec<AdjVec>,
    edge_set: FxHashSet<(usize, usize)>,
}

impl LayoutGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            ids: Vec::with_capacity(nodes),
            index: FxHashMap::with_capacity_and_hasher(nodes, Default::default()),
            successors: Vec::with_capacity(nodes),
            predecessors: Vec::with_capacity(nodes),
            edge_set: FxHashSet::with_capacity_and_hasher(edges, Default::default()),
        }
    }

    /// Add a node; its index is its seq
    pub fn add_node(&mut self, id: &str) -> Result<usize> {
        if self.index.contains_key(id) {
            return Err(StrataError::DuplicateNode {
                node_id: id.to_string(),
            });
        }
        let idx = self.ids.len();
        let id: NodeId = Arc::from(id);
        self.ids.push(Arc::clone(&id));
        self.index.insert(id, idx);
        self.successors.push(AdjVec::new());
        self.predecessors.push(AdjVec::new());
        Ok(idx)
    }

    /// Add an edge between existing nodes
    ///
    /// Returns `false` when the edge was already present. Self-loops are
    /// rejected as cycles. Acyclicity is otherwise the caller's concern.
    pub fn add_edge(&mut self, source: usize, target: usize) -> Result<bool> {
        if source == target {
            let id = self.ids[source].to_string();
            return Err(StrataError::CycleDetected {
                source_id: id.clone(),
                target_id: id.clone(),
                cycle: format!("{} -> {}", id, id),
            });
        }
        if !self.edge_set.insert((source, target)) {
            return Ok(false);
        }
        self.successors[source].push(target);
        self.predecessors[target].push(source);
        Ok(true)
    }

    /// Add an edge by node id
    pub fn add_edge_by_id(&mut self, source: &str, target: &str) -> Result<bool> {
        let s = self.require(source)?;
        let t = self.require(target)?;
        self.add_edge(s, t)
    }

    /// Index of a node id
    #[inline]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Index of a node id or `NodeNotFound`
    pub fn require(&self, id: &str) -> Result<usize> {
        self.index_of(id).ok_or_else(|| StrataError::NodeNotFound {
            node_id: id.to_string(),
        })
    }

    #[inline]
    pub fn id(&self, idx: usize) -> &NodeId {
        &self.ids[idx]
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    #[inline]
    pub fn successors(&self, idx: usize) -> &[usize] {
        &self.successors[idx]
    }

    #[inline]
    pub fn predecessors(&self, idx: usize) -> &[usize] {
        &self.predecessors[idx]
    }

    #[inline]
    pub fn contains_edge(&self, source: usize, target: usize) -> bool {
        self.edge_set.contains(&(source, target))
    }

    /// All edges, grouped by source in insertion order
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.successors
            .iter()
            .enumerate()
            .flat_map(|(s, succ)| succ.iter().map(move |&t| (s, t)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_set.len()
    }

    /// Nodes with no incident edges
    pub fn isolated_count(&self) -> usize {
        (0..self.len())
            .filter(|&i| self.successors[i].is_empty() && self.predecessors[i].is_empty())
            .count()
    }

    /// Check if there's a path from `from` to `to` (BFS)
    pub fn has_path(&self, from: usize, to: usize) -> bool {
        self.find_path(from, to).is_some()
    }

    /// Shortest forward path from `from` to `to`, both ends included
    pub fn find_path(&self, from: usize, to: usize) -> Option<Vec<usize>> {
        if from == to {
            return Some(vec![from]);
        }

        let mut parent: FxHashMap<usize, usize> = FxHashMap::default();
        let mut queue = VecDeque::new();
        parent.insert(from, from);
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            for &next in self.successors(current) {
                if parent.contains_key(&next) {
                    continue;
                }
                parent.insert(next, current);
                if next == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while cursor != from {
                        cursor = parent[&cursor];
                        path.push(cursor);
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Topological order (Kahn); among ready nodes the smallest seq goes first
    ///
    /// On a cycle, returns `CycleDetected` naming one offending cycle.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let n = self.len();
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(|p| p.len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &succ in self.successors(node) {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.push(Reverse(succ));
                }
            }
        }

        if order.len() == n {
            return Ok(order);
        }
        Err(self.cycle_error(&in_degree))
    }

    /// Returns whether the graph is acyclic
    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_ok()
    }

    /// Walk backwards through unreleased nodes until one repeats
    fn cycle_error(&self, in_degree: &[usize]) -> StrataError {
        let stuck = |i: usize| in_degree[i] > 0;
        let Some(start) = (0..self.len()).find(|&i| stuck(i)) else {
            return StrataError::ValidationError {
                reason: "cycle reported without unreleased nodes".to_string(),
            };
        };

        let mut seen: FxHashMap<usize, usize> = FxHashMap::default();
        let mut walk = Vec::new();
        let mut cursor = start;
        while !seen.contains_key(&cursor) {
            seen.insert(cursor, walk.len());
            walk.push(cursor);
            // Every unreleased node keeps at least one unreleased predecessor
            match self.predecessors(cursor).iter().copied().find(|&p| stuck(p)) {
                Some(p) => cursor = p,
                None => break,
            }
        }

        let from = seen.get(&cursor).copied().unwrap_or(0);
        let mut cycle: Vec<usize> = walk[from..].to_vec();
        cycle.reverse();
        self.describe_cycle(&cycle)
    }

    /// Build a `CycleDetected` error from a node cycle `[a, b, ..., z]` (z -> a closes it)
    pub(crate) fn describe_cycle(&self, cycle: &[usize]) -> StrataError {
        let names: Vec<&str> = cycle.iter().map(|&i| self.ids[i].as_ref()).collect();
        let first = names.first().copied().unwrap_or_default();
        let last = names.last().copied().unwrap_or_default();
        StrataError::CycleDetected {
            source_id: last.to_string(),
            target_id: first.to_string(),
            cycle: format!("{} -> {}", names.join(" -> "), first),
        }
    }

    /// Weakly connected components, each sorted by seq, ordered by smallest seq
    pub fn weak_components(&self) -> Vec<Vec<usize>> {
        let n = self.len();
        let mut seen = vec![false; n];
        let mut components = Vec::new();

        for root in 0..n {
            if seen[root] {
                continue;
            }
            seen[root] = true;
            let mut members = vec![root];
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                for &next in self.successors(node).iter().chain(self.predecessors(node)) {
                    if !seen[next] {
                        seen[next] = true;
                        members.push(next);
                        stack.push(next);
                    }
                }
            }
            members.sort_unstable();
            components.push(members);
        }
        components
    }

    /// Induced subgraph over `members` (kept in the given order)
    ///
    /// Returns the subgraph and the mapping from local to global index.
    pub fn subgraph(&self, members: &[usize]) -> (LayoutGraph, Vec<usize>) {
        let mut local: FxHashMap<usize, usize> =
            FxHashMap::with_capacity_and_hasher(members.len(), Default::default());
        let mut sub = LayoutGraph::with_capacity(members.len(), members.len());
        for &global in members {
            let idx = sub.ids.len();
            let id = Arc::clone(&self.ids[global]);
            sub.ids.push(Arc::clone(&id));
            sub.index.insert(id, idx);
            sub.successors.push(AdjVec::new());
            sub.predecessors.push(AdjVec::new());
            local.insert(global, idx);
        }
        for &global in members {
            let s = local[&global];
            for succ in self.successors(global) {
                if let Some(&t) = local.get(succ) {
                    sub.edge_set.insert((s, t));
                    sub.successors[s].push(t);
                    sub.predecessors[t].push(s);
                }
            }
        }
        (sub, members.to_vec())
    }
}
