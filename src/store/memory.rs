//! InMemoryGraphStore - DashMap of graphs, each behind a parking_lot RwLock
//!
//! Graph lookup is lock-free; mutations of one graph serialize on its lock.
//! Batches are validated in full before anything is written.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Result, StrataError};
use crate::model::{BlockInput, NodeId};
use crate::store::{GraphSnapshot, GraphStore, LayoutBatch, StoredNode};

#[derive(Debug, Default)]
struct StoredGraph {
    nodes: Vec<StoredNode>,
    index: FxHashMap<NodeId, usize>,
    edges: Vec<(NodeId, NodeId)>,
    edge_set: FxHashSet<(NodeId, NodeId)>,
    version: u64,
}

impl StoredGraph {
    fn require(&self, node_id: &str) -> Result<usize> {
        self.index
            .get(node_id)
            .copied()
            .ok_or_else(|| StrataError::NodeNotFound {
                node_id: node_id.to_string(),
            })
    }

    fn reindex(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (Arc::clone(&n.id), i))
            .collect();
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

/// Thread-safe in-memory graph store
#[derive(Clone, Default)]
pub struct InMemoryGraphStore {
    graphs: Arc<DashMap<Arc<str>, Arc<RwLock<StoredGraph>>>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn graph(&self, graph_id: &str) -> Result<Arc<RwLock<StoredGraph>>> {
        self.graphs
            .get(graph_id)
            .map(|g| Arc::clone(g.value()))
            .ok_or_else(|| StrataError::GraphNotFound {
                graph_id: graph_id.to_string(),
            })
    }

    /// Number of graphs held
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

impl std::fmt::Debug for InMemoryGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryGraphStore")
            .field("graphs", &self.graphs.len())
            .finish()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn create_graph(&self, graph_id: &str) -> Result<()> {
        self.graphs
            .entry(Arc::from(graph_id))
            .or_insert_with(|| Arc::new(RwLock::new(StoredGraph::default())));
        Ok(())
    }

    async fn upsert_node(&self, graph_id: &str, node: BlockInput) -> Result<()> {
        let graph = self.graph(graph_id)?;
        let mut g = graph.write();
        let pinned_level = if node.is_pinned { node.level } else { None };
        match g.index.get(node.id.as_str()).copied() {
            Some(i) => {
                g.nodes[i].is_pinned = node.is_pinned;
                g.nodes[i].pinned_level = pinned_level;
            }
            None => {
                let id: NodeId = Arc::from(node.id.as_str());
                let i = g.nodes.len();
                g.nodes.push(StoredNode {
                    id: Arc::clone(&id),
                    is_pinned: node.is_pinned,
                    pinned_level,
                    layout: None,
                });
                g.index.insert(id, i);
            }
        }
        g.bump();
        Ok(())
    }

    async fn remove_node(&self, graph_id: &str, node_id: &str) -> Result<()> {
        let graph = self.graph(graph_id)?;
        let mut g = graph.write();
        let i = g.require(node_id)?;
        g.nodes.remove(i);
        g.edges
            .retain(|(s, t)| s.as_ref() != node_id && t.as_ref() != node_id);
        g.edge_set
            .retain(|(s, t)| s.as_ref() != node_id && t.as_ref() != node_id);
        g.reindex();
        g.bump();
        Ok(())
    }

    async fn insert_edge(&self, graph_id: &str, source: &str, target: &str) -> Result<bool> {
        let graph = self.graph(graph_id)?;
        let mut g = graph.write();
        let s = Arc::clone(&g.nodes[g.require(source)?].id);
        let t = Arc::clone(&g.nodes[g.require(target)?].id);
        if !g.edge_set.insert((Arc::clone(&s), Arc::clone(&t))) {
            return Ok(false);
        }
        g.edges.push((s, t));
        g.bump();
        Ok(true)
    }

    async fn remove_edge(&self, graph_id: &str, source: &str, target: &str) -> Result<bool> {
        let graph = self.graph(graph_id)?;
        let mut g = graph.write();
        let key: (NodeId, NodeId) = (Arc::from(source), Arc::from(target));
        if !g.edge_set.remove(&key) {
            return Ok(false);
        }
        g.edges
            .retain(|(s, t)| !(s.as_ref() == source && t.as_ref() == target));
        g.bump();
        Ok(true)
    }

    async fn load_graph(&self, graph_id: &str) -> Result<GraphSnapshot> {
        let graph = self.graph(graph_id)?;
        let g = graph.read();
        Ok(GraphSnapshot {
            graph_id: Some(Arc::from(graph_id)),
            version: g.version,
            nodes: g.nodes.clone(),
            edges: g.edges.clone(),
        })
    }

    async fn node_count(&self, graph_id: &str) -> Result<usize> {
        Ok(self.graph(graph_id)?.read().nodes.len())
    }

    async fn version(&self, graph_id: &str) -> Result<u64> {
        Ok(self.graph(graph_id)?.read().version)
    }

    async fn write_layout(&self, graph_id: &str, batch: LayoutBatch) -> Result<u64> {
        let graph = self.graph(graph_id)?;
        let mut g = graph.write();

        if let Some(expected) = batch.expected_version {
            if g.version != expected {
                return Err(StrataError::StoreError {
                    reason: format!(
                        "graph '{}' changed during layout (expected version {}, found {})",
                        graph_id, expected, g.version
                    ),
                });
            }
        }

        // Validate everything before the first write
        let layout_slots: Vec<usize> = batch
            .layouts
            .iter()
            .map(|(id, _)| g.require(id))
            .collect::<Result<_>>()?;
        let mut new_edges = Vec::new();
        for (s, t) in &batch.edges {
            let s = Arc::clone(&g.nodes[g.require(s)?].id);
            let t = Arc::clone(&g.nodes[g.require(t)?].id);
            if !g.edge_set.contains(&(Arc::clone(&s), Arc::clone(&t))) {
                new_edges.push((s, t));
            }
        }

        if batch.replace_all {
            for node in &mut g.nodes {
                node.layout = None;
            }
        }
        for (slot, (_, layout)) in layout_slots.into_iter().zip(batch.layouts) {
            g.nodes[slot].layout = Some(layout);
        }
        for edge in new_edges {
            if g.edge_set.insert(edge.clone()) {
                g.edges.push(edge);
            }
        }
        Ok(g.bump())
    }

    async fn clear_layout(&self, graph_id: &str) -> Result<u64> {
        let graph = self.graph(graph_id)?;
        let mut g = graph.write();
        for node in &mut g.nodes {
            node.layout = None;
        }
        Ok(g.bump())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeLayout;

    fn layout(layer: u32) -> NodeLayout {
        NodeLayout {
            layer,
            order: 0.0,
            level: layer,
            sublevel_id: layer,
            x: 0.0,
            y: layer as f64 * 130.0,
        }
    }

    async fn seeded() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        store.create_graph("g").await.unwrap();
        store.upsert_node("g", BlockInput::new("a")).await.unwrap();
        store.upsert_node("g", BlockInput::new("b")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn missing_graph_is_reported() {
        let store = InMemoryGraphStore::new();
        let err = store.load_graph("nope").await.unwrap_err();
        assert_eq!(err.code(), "STRATA-003");
    }

    #[tokio::test]
    async fn every_mutation_bumps_version() {
        let store = seeded().await;
        let v0 = store.version("g").await.unwrap();
        assert!(store.insert_edge("g", "a", "b").await.unwrap());
        let v1 = store.version("g").await.unwrap();
        assert!(v1 > v0);
        // Duplicate edge: no change
        assert!(!store.insert_edge("g", "a", "b").await.unwrap());
        assert_eq!(store.version("g").await.unwrap(), v1);
    }

    #[tokio::test]
    async fn batch_with_unknown_node_writes_nothing() {
        let store = seeded().await;
        let before = store.load_graph("g").await.unwrap();

        let batch = LayoutBatch {
            layouts: vec![(Arc::from("a"), layout(0)), (Arc::from("ghost"), layout(1))],
            ..Default::default()
        };
        let err = store.write_layout("g", batch).await.unwrap_err();
        assert_eq!(err.code(), "STRATA-004");
        assert_eq!(store.load_graph("g").await.unwrap(), before);
    }

    #[tokio::test]
    async fn stale_batch_is_rejected() {
        let store = seeded().await;
        let version = store.version("g").await.unwrap();
        store.upsert_node("g", BlockInput::new("c")).await.unwrap();

        let batch = LayoutBatch {
            layouts: vec![(Arc::from("a"), layout(0))],
            expected_version: Some(version),
            ..Default::default()
        };
        let err = store.write_layout("g", batch).await.unwrap_err();
        assert_eq!(err.code(), "STRATA-050");
    }

    #[tokio::test]
    async fn replace_all_clears_unlisted_nodes() {
        let store = seeded().await;
        store
            .write_layout(
                "g",
                LayoutBatch {
                    layouts: vec![(Arc::from("a"), layout(0)), (Arc::from("b"), layout(1))],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .write_layout(
                "g",
                LayoutBatch {
                    layouts: vec![(Arc::from("b"), layout(0))],
                    replace_all: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let snapshot = store.load_graph("g").await.unwrap();
        assert!(snapshot.nodes[0].layout.is_none());
        assert_eq!(snapshot.nodes[1].layout.map(|l| l.layer), Some(0));
        assert_eq!(snapshot.unplaced(), 1);
    }

    #[tokio::test]
    async fn batch_edges_and_layouts_land_together() {
        let store = seeded().await;
        let batch = LayoutBatch {
            edges: vec![(Arc::from("a"), Arc::from("b"))],
            layouts: vec![(Arc::from("b"), layout(1))],
            ..Default::default()
        };
        let version = store.write_layout("g", batch).await.unwrap();
        let snapshot = store.load_graph("g").await.unwrap();
        assert_eq!(snapshot.version, version);
        assert_eq!(snapshot.edges.len(), 1);
        assert_eq!(snapshot.nodes[1].layout.map(|l| l.layer), Some(1));
    }

    #[tokio::test]
    async fn remove_node_drops_incident_edges() {
        let store = seeded().await;
        store.insert_edge("g", "a", "b").await.unwrap();
        store.remove_node("g", "a").await.unwrap();
        let snapshot = store.load_graph("g").await.unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        assert!(snapshot.edges.is_empty());
        // Index rebuilt: b still addressable
        assert!(store.upsert_node("g", BlockInput::pinned("b", Some(0))).await.is_ok());
        assert_eq!(store.node_count("g").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_layout() {
        let store = seeded().await;
        store
            .write_layout(
                "g",
                LayoutBatch {
                    layouts: vec![(Arc::from("a"), layout(0))],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .upsert_node("g", BlockInput::pinned("a", Some(2)))
            .await
            .unwrap();
        let snapshot = store.load_graph("g").await.unwrap();
        assert!(snapshot.nodes[0].is_pinned);
        assert!(snapshot.nodes[0].layout.is_some());
    }
}
