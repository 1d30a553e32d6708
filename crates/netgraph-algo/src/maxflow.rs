//! Iterative max-flow with residual recomputation, min-cut extraction,
//! and per-edge sensitivity.
//!
//! Max flow is computed by repeatedly running SPF against the current
//! residual, placing as much volume as the resulting DAG admits, and
//! accumulating per-cost tiers until no augmenting tier remains. With
//! `shortest_path = true` only the first (minimum-cost) tier is placed,
//! IP/IGP semantics. With `require_capacity = false` path selection is
//! cost-only, so saturated edges still attract the (single) tier.

use std::collections::{BTreeMap, VecDeque};

use netgraph_core::{CoreGraph, EdgeId, EdgeRef, NetGraphResult, NodeId};

use crate::flow::{FlowGraph, FlowIndex, FlowPlacement};
use crate::spf::{spf, EdgeSelection, EdgeTieBreak, SpfOptions, MIN_CAP, MIN_FLOW};

/// Guards against pathological tier loops.
const MAX_TIERS: usize = 10_000;

/// Parameters of a max-flow computation.
#[derive(Debug, Clone, Copy)]
pub struct MaxFlowOptions {
    pub placement: FlowPlacement,
    /// Restrict flow to minimum-cost paths (single tier).
    pub shortest_path: bool,
    /// Capacity-aware path selection; `false` is cost-only IGP semantics.
    pub require_capacity: bool,
}

impl Default for MaxFlowOptions {
    fn default() -> Self {
        Self {
            placement: FlowPlacement::Proportional,
            shortest_path: false,
            require_capacity: true,
        }
    }
}

/// Result of a max-flow computation, retaining the saturated flow state
/// for min-cut and sensitivity follow-ups.
#[derive(Debug)]
pub struct MaxFlowComputation<'g> {
    pub total: f64,
    /// Placed volume per path cost tier.
    pub cost_distribution: BTreeMap<i64, f64>,
    pub flow_graph: FlowGraph<'g>,
}

fn tier_selection(opts: &MaxFlowOptions) -> EdgeSelection {
    EdgeSelection {
        multi_edge: true,
        require_capacity: opts.require_capacity,
        tie_break: if opts.require_capacity {
            EdgeTieBreak::PreferHigherResidual
        } else {
            EdgeTieBreak::Deterministic
        },
    }
}

/// Compute maximum flow from `src` to `dst` under the given masks.
pub fn max_flow<'g>(
    graph: &'g CoreGraph,
    src: NodeId,
    dst: NodeId,
    opts: &MaxFlowOptions,
    node_mask: &[bool],
    edge_mask: &[bool],
) -> NetGraphResult<MaxFlowComputation<'g>> {
    let mut flow_graph = FlowGraph::with_edge_mask(graph, edge_mask);
    let mut total = 0.0;
    let mut cost_distribution: BTreeMap<i64, f64> = BTreeMap::new();
    let selection = tier_selection(opts);

    let mut counter = 0u64;
    for _ in 0..MAX_TIERS {
        let residual = flow_graph.residual_view().to_vec();
        let (_, dag) = spf(
            graph,
            src,
            selection,
            SpfOptions {
                node_mask: Some(node_mask),
                edge_mask: Some(edge_mask),
                residual: Some(&residual),
                dst: None,
                multipath: true,
            },
        );
        let cost = match dag.dist(dst) {
            Some(cost) => cost,
            None => break,
        };

        let index = FlowIndex::new(src, dst, 0, counter);
        counter += 1;
        let placed = flow_graph.place(index, src, dst, &dag, f64::INFINITY, opts.placement)?;
        if placed <= MIN_FLOW {
            break;
        }
        total += placed;
        *cost_distribution.entry(cost).or_insert(0.0) += placed;

        if opts.shortest_path {
            break;
        }
    }

    Ok(MaxFlowComputation {
        total,
        cost_distribution,
        flow_graph,
    })
}

/// Extract the min-cut of a saturated max-flow placement.
///
/// Standard residual-graph reachability from `src` (forward arcs with
/// residual, backward arcs with flow); the cut is the set of included,
/// saturated edges leaving the reachable side. Augmentation edges never
/// appear. Sorted by `(link_id, direction)`.
pub fn min_cut(
    graph: &CoreGraph,
    flow_graph: &FlowGraph<'_>,
    src: NodeId,
    node_mask: &[bool],
    edge_mask: &[bool],
) -> Vec<EdgeRef> {
    let residual = flow_graph.residual_view();
    let capacities = graph.capacities();

    // Backward adjacency: per node, incoming edges. Built on demand from
    // the forward CSR by scanning each node's out-edges once.
    let mut incoming: Vec<Vec<EdgeId>> = vec![Vec::new(); graph.num_nodes()];
    for node in 0..graph.num_nodes() {
        for &edge in graph.out_edges(node) {
            incoming[graph.edge_dst(edge)].push(edge);
        }
    }

    let mut reachable = vec![false; graph.num_nodes()];
    if !node_mask[src] {
        return Vec::new();
    }
    reachable[src] = true;
    let mut queue = VecDeque::new();
    queue.push_back(src);
    while let Some(u) = queue.pop_front() {
        for &edge in graph.out_edges(u) {
            let v = graph.edge_dst(edge);
            if reachable[v] || !node_mask[v] || !edge_mask[edge] {
                continue;
            }
            if residual[edge] > MIN_CAP {
                reachable[v] = true;
                queue.push_back(v);
            }
        }
        for &edge in &incoming[u] {
            let v = graph.edge_src(edge);
            if reachable[v] || !node_mask[v] || !edge_mask[edge] {
                continue;
            }
            // Flow on v->u allows backward traversal u->v.
            if capacities[edge] - residual[edge] > MIN_FLOW {
                reachable[v] = true;
                queue.push_back(v);
            }
        }
    }

    let mut cut: Vec<EdgeRef> = Vec::new();
    for edge in 0..graph.num_edges() {
        if !edge_mask[edge] {
            continue;
        }
        let u = graph.edge_src(edge);
        let v = graph.edge_dst(edge);
        if reachable[u] && !reachable[v] && node_mask[u] && residual[edge] <= MIN_CAP {
            if let Some(edge_ref) = graph.edge_ref(edge) {
                cut.push(edge_ref);
            }
        }
    }
    cut.sort();
    cut.dedup();
    cut
}

/// Per-edge sensitivity of the max flow: for every saturated edge that
/// carries flow, the reduction in total flow when that directed edge is
/// excluded. Augmentation edges are never candidates.
pub fn sensitivity(
    graph: &CoreGraph,
    src: NodeId,
    dst: NodeId,
    opts: &MaxFlowOptions,
    node_mask: &[bool],
    edge_mask: &[bool],
) -> NetGraphResult<Vec<(EdgeRef, f64)>> {
    let baseline = max_flow(graph, src, dst, opts, node_mask, edge_mask)?;
    let residual = baseline.flow_graph.residual_view();
    let capacities = graph.capacities();

    let mut candidates: Vec<EdgeId> = Vec::new();
    for edge in 0..graph.num_edges() {
        if !edge_mask[edge] {
            continue;
        }
        if graph.edge_ref(edge).is_none() {
            continue;
        }
        let flow = capacities[edge] - residual[edge];
        if flow > MIN_FLOW && residual[edge] <= MIN_CAP {
            candidates.push(edge);
        }
    }

    let mut scratch_mask = edge_mask.to_vec();
    let mut results = Vec::with_capacity(candidates.len());
    for edge in candidates {
        scratch_mask[edge] = false;
        let degraded = max_flow(graph, src, dst, opts, node_mask, &scratch_mask)?;
        scratch_mask[edge] = true;
        let delta = baseline.total - degraded.total;
        if let Some(edge_ref) = graph.edge_ref(edge) {
            results.push((edge_ref, delta));
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgraph_core::{Direction, Link, Network, Node};

    fn full_masks(graph: &CoreGraph) -> (Vec<bool>, Vec<bool>) {
        (vec![true; graph.num_nodes()], vec![true; graph.num_edges()])
    }

    fn diamond() -> CoreGraph {
        let mut network = Network::new();
        for name in ["A", "B", "C", "D"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("A", "B").with_id("ab").with_capacity(60.0).with_cost(1));
        network.add_link(Link::new("A", "C").with_id("ac").with_capacity(60.0).with_cost(1));
        network.add_link(Link::new("B", "D").with_id("bd").with_capacity(60.0).with_cost(1));
        network.add_link(Link::new("C", "D").with_id("cd").with_capacity(60.0).with_cost(1));
        CoreGraph::from_network(&network, &[]).unwrap()
    }

    fn two_tier() -> CoreGraph {
        // A -> B -> C (cost 1) plus a costlier A -> C direct link.
        let mut network = Network::new();
        for name in ["A", "B", "C"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("A", "B").with_id("ab").with_capacity(10.0).with_cost(1));
        network.add_link(Link::new("B", "C").with_id("bc").with_capacity(10.0).with_cost(1));
        network.add_link(Link::new("A", "C").with_id("ac").with_capacity(5.0).with_cost(10));
        CoreGraph::from_network(&network, &[]).unwrap()
    }

    #[test]
    fn test_max_flow_diamond() {
        let graph = diamond();
        let (node_mask, edge_mask) = full_masks(&graph);
        let a = graph.node_id("A").unwrap();
        let d = graph.node_id("D").unwrap();
        let result =
            max_flow(&graph, a, d, &MaxFlowOptions::default(), &node_mask, &edge_mask).unwrap();
        assert!((result.total - 120.0).abs() < 1e-9);
        assert_eq!(result.cost_distribution.len(), 1);
        assert!((result.cost_distribution[&2] - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_flow_uses_costlier_tier() {
        let graph = two_tier();
        let (node_mask, edge_mask) = full_masks(&graph);
        let a = graph.node_id("A").unwrap();
        let c = graph.node_id("C").unwrap();
        let result =
            max_flow(&graph, a, c, &MaxFlowOptions::default(), &node_mask, &edge_mask).unwrap();
        assert!((result.total - 15.0).abs() < 1e-9);
        assert!((result.cost_distribution[&2] - 10.0).abs() < 1e-9);
        assert!((result.cost_distribution[&10] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_shortest_path_stops_after_first_tier() {
        let graph = two_tier();
        let (node_mask, edge_mask) = full_masks(&graph);
        let a = graph.node_id("A").unwrap();
        let c = graph.node_id("C").unwrap();
        let opts = MaxFlowOptions {
            shortest_path: true,
            ..Default::default()
        };
        let result = max_flow(&graph, a, c, &opts, &node_mask, &edge_mask).unwrap();
        assert!((result.total - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_cut_on_line() {
        let mut network = Network::new();
        for name in ["A", "B", "C"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("A", "B").with_id("ab").with_capacity(10.0).with_cost(1));
        network.add_link(Link::new("B", "C").with_id("bc").with_capacity(20.0).with_cost(1));
        let graph = CoreGraph::from_network(&network, &[]).unwrap();
        let (node_mask, edge_mask) = full_masks(&graph);
        let a = graph.node_id("A").unwrap();
        let c = graph.node_id("C").unwrap();
        let result =
            max_flow(&graph, a, c, &MaxFlowOptions::default(), &node_mask, &edge_mask).unwrap();
        assert!((result.total - 10.0).abs() < 1e-9);
        let cut = min_cut(&graph, &result.flow_graph, a, &node_mask, &edge_mask);
        assert_eq!(cut, vec![EdgeRef::new("ab", Direction::Fwd)]);
    }

    #[test]
    fn test_sensitivity_line_reports_both_edges() {
        let mut network = Network::new();
        for name in ["A", "B", "C"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("A", "B").with_id("ab").with_capacity(10.0).with_cost(1));
        network.add_link(Link::new("B", "C").with_id("bc").with_capacity(10.0).with_cost(1));
        let graph = CoreGraph::from_network(&network, &[]).unwrap();
        let (node_mask, edge_mask) = full_masks(&graph);
        let a = graph.node_id("A").unwrap();
        let c = graph.node_id("C").unwrap();
        let scores = sensitivity(
            &graph,
            a,
            c,
            &MaxFlowOptions::default(),
            &node_mask,
            &edge_mask,
        )
        .unwrap();
        assert_eq!(scores.len(), 2);
        for (edge_ref, delta) in scores {
            assert_eq!(edge_ref.direction, Direction::Fwd);
            assert!((delta - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_max_flow_unreachable_is_zero() {
        let mut network = Network::new();
        network.add_node(Node::new("A"));
        network.add_node(Node::new("Z"));
        let graph = CoreGraph::from_network(&network, &[]).unwrap();
        let (node_mask, edge_mask) = full_masks(&graph);
        let a = graph.node_id("A").unwrap();
        let z = graph.node_id("Z").unwrap();
        let result =
            max_flow(&graph, a, z, &MaxFlowOptions::default(), &node_mask, &edge_mask).unwrap();
        assert_eq!(result.total, 0.0);
        assert!(result.cost_distribution.is_empty());
    }
}
