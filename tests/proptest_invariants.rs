//! Property-Based Testing for the layout engine
//!
//! Random DAGs through the full pipeline, the chunk/merge path and the
//! incremental cascade.
//! Coverage targets:
//! - Strict layering (layout/topology.rs)
//! - In-layer orders (layout/order.rs)
//! - Pin exclusivity (layout/pin.rs)
//! - Sublevel bounds (layout/collision.rs)
//! - Partition independence (runtime/coordinator.rs + layout/pipeline.rs)

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use strata::event::NoopEmitter;
use strata::graph::LayoutGraph;
use strata::layout::{compute_layout, layer_chunk, merge_chunks, PreparedGraph, TopologyMaintainer};
use strata::model::{BlockInput, LayoutOptions, LayoutRequest, LinkInput, NodeId};
use strata::runtime::PartitionStrategy;

// =============================================================================
// Generators
// =============================================================================

prop_compose! {
    /// Random DAG: edges only go from lower to higher index
    fn arb_dag(max_nodes: usize)(n in 1..max_nodes)(
        n in Just(n),
        pairs in prop::collection::vec((0..n, 0..n), 0..n * 2),
        pins in prop::collection::vec(prop::option::of(prop::option::of(0u32..6)), n),
    ) -> LayoutRequest {
        let nodes = (0..n)
            .map(|i| match pins[i] {
                Some(level) if i % 3 == 0 => BlockInput::pinned(format!("n{:03}", i), level),
                _ => BlockInput::new(format!("n{:03}", i)),
            })
            .collect();
        let edges = pairs
            .into_iter()
            .filter(|(a, b)| a != b)
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|(a, b)| LinkInput::new(format!("n{:03}", a), format!("n{:03}", b)))
            .collect();
        LayoutRequest { nodes, edges, options: None }
    }
}

fn options(threshold: usize) -> LayoutOptions {
    LayoutOptions {
        blocks_per_sublevel: threshold,
        ..LayoutOptions::default()
    }
}

// =============================================================================
// Full pipeline
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn edges_always_point_to_higher_layers(request in arb_dag(40)) {
        let prepared = PreparedGraph::from_request(&request).unwrap();
        let layout = compute_layout(&prepared, &options(10), &NoopEmitter).unwrap();
        for (s, t) in prepared.graph.edges() {
            prop_assert!(layout.layouts[s].layer < layout.layouts[t].layer);
        }
    }

    #[test]
    fn orders_follow_seq_within_each_layer(request in arb_dag(40)) {
        let prepared = PreparedGraph::from_request(&request).unwrap();
        let layout = compute_layout(&prepared, &options(10), &NoopEmitter).unwrap();

        let mut by_layer: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for l in &layout.layouts {
            by_layer.entry(l.layer).or_default().push(l.order);
        }
        for orders in by_layer.values() {
            prop_assert!(orders.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn pinned_and_unpinned_levels_never_mix(request in arb_dag(30)) {
        let prepared = PreparedGraph::from_request(&request).unwrap();
        let layout = compute_layout(&prepared, &options(10), &NoopEmitter).unwrap();

        let mut pinned = BTreeSet::new();
        let mut unpinned = BTreeSet::new();
        for (node, l) in layout.layouts.iter().enumerate() {
            if prepared.specs[node].is_pinned {
                prop_assert!(pinned.insert(l.level), "pinned levels are exclusive");
            } else {
                unpinned.insert(l.level);
            }
        }
        prop_assert!(pinned.is_disjoint(&unpinned));
    }

    #[test]
    fn sublevels_respect_threshold(request in arb_dag(60), threshold in 1usize..8) {
        let prepared = PreparedGraph::from_request(&request).unwrap();
        let layout = compute_layout(&prepared, &options(threshold), &NoopEmitter).unwrap();

        let mut sizes: BTreeMap<u32, usize> = BTreeMap::new();
        for l in &layout.layouts {
            *sizes.entry(l.sublevel_id).or_default() += 1;
        }
        prop_assert!(sizes.values().all(|&count| count <= threshold));
        prop_assert_eq!(sizes.values().sum::<usize>(), prepared.len());
    }

    #[test]
    fn layout_is_deterministic(request in arb_dag(40)) {
        let prepared = PreparedGraph::from_request(&request).unwrap();
        let first = compute_layout(&prepared, &options(4), &NoopEmitter).unwrap();
        let second = compute_layout(&prepared, &options(4), &NoopEmitter).unwrap();
        prop_assert_eq!(first.layouts, second.layouts);
    }
}

// =============================================================================
// Chunking and incremental cascade
// =============================================================================

fn chunked_layers(graph: &LayoutGraph, strategy: PartitionStrategy) -> Vec<u32> {
    let partition = strategy.partition(graph);
    let owner = partition.assignment(graph.len());
    let chunks = partition
        .chunks
        .iter()
        .enumerate()
        .map(|(index, members)| {
            let nodes: Vec<NodeId> = members.iter().map(|&m| graph.id(m).clone()).collect();
            let edges: Vec<(NodeId, NodeId)> = graph
                .edges()
                .filter(|&(s, t)| owner[s] == index && owner[t] == index)
                .map(|(s, t)| (graph.id(s).clone(), graph.id(t).clone()))
                .collect();
            layer_chunk(&nodes, &edges).unwrap()
        })
        .collect();
    merge_chunks(graph, chunks, &partition.cross_edges)
        .unwrap()
        .topology
        .into_layers()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn merged_layers_ignore_partitioning(request in arb_dag(50), size in 1usize..12) {
        let prepared = PreparedGraph::from_request(&request).unwrap();
        let graph = &prepared.graph;
        let expected = TopologyMaintainer::assign_initial(graph).unwrap().into_layers();

        prop_assert_eq!(
            chunked_layers(graph, PartitionStrategy::Batch { size }),
            expected.clone()
        );
        prop_assert_eq!(
            chunked_layers(graph, PartitionStrategy::Components { max_chunk_nodes: size }),
            expected
        );
    }

    #[test]
    fn incremental_inserts_keep_strict_layering(
        n in 2usize..30,
        inserts in prop::collection::vec((0usize..30, 0usize..30), 1..60),
    ) {
        let mut graph = LayoutGraph::new();
        for i in 0..n {
            graph.add_node(&format!("n{}", i)).unwrap();
        }
        let mut topology = TopologyMaintainer::assign_initial(&graph).unwrap();

        for (a, b) in inserts {
            let (a, b) = (a % n, b % n);
            let source = graph.id(a).clone();
            let target = graph.id(b).clone();
            // Cycle-closing edges are rejected and leave the graph alone
            let before = graph.edge_count();
            if topology.on_edge_inserted(&mut graph, &source, &target).is_err() {
                prop_assert_eq!(graph.edge_count(), before);
            }
            prop_assert_eq!(topology.violations(&graph), 0);
        }

        let fresh = TopologyMaintainer::assign_initial(&graph).unwrap();
        prop_assert_eq!(topology.layers(), fresh.layers());
    }
}
