//! Single-source shortest-path DAGs.
//!
//! [`spf`] runs Dijkstra over the substrate's integer costs and records,
//! for every reached node, the set of predecessor edges lying on some
//! minimum-cost path, the [`PredDag`]. Edge eligibility and tie-breaking
//! are controlled by [`EdgeSelection`]:
//!
//! - `multi_edge`: consider all parallel min-cost edges vs a single
//!   deterministic pick per neighbour;
//! - `require_capacity`: treat edges with exhausted residual as absent
//!   (capacity-aware TE selection) or keep them as candidates (true IP/IGP
//!   cost-only semantics);
//! - `tie_break`: positional (lowest edge index) or highest residual then
//!   index.
//!
//! The `multipath` flag decides whether equal-cost predecessors through
//! different upstream nodes are recorded at all; with `multipath = false`
//! and `multi_edge = false` the DAG degenerates to a single path.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use netgraph_core::{CoreGraph, EdgeId, NodeId};

/// Residual below this threshold counts as exhausted.
pub const MIN_CAP: f64 = 1e-12;

/// Minimum meaningful flow amount.
pub const MIN_FLOW: f64 = 1e-9;

/// Tie-breaking among equal-cost parallel edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeTieBreak {
    /// Lowest edge index wins.
    Deterministic,
    /// Highest residual wins, then lowest edge index.
    PreferHigherResidual,
}

/// Edge eligibility and tie-breaking descriptor for SPF/KSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeSelection {
    pub multi_edge: bool,
    pub require_capacity: bool,
    pub tie_break: EdgeTieBreak,
}

impl EdgeSelection {
    /// All parallel min-cost edges, cost-only (IGP metric view).
    pub fn all_min_cost() -> Self {
        Self {
            multi_edge: true,
            require_capacity: false,
            tie_break: EdgeTieBreak::Deterministic,
        }
    }

    /// One deterministic edge per neighbour, cost-only.
    pub fn single_min_cost() -> Self {
        Self {
            multi_edge: false,
            require_capacity: false,
            tie_break: EdgeTieBreak::Deterministic,
        }
    }

    /// All parallel min-cost edges with residual capacity (TE view).
    pub fn all_min_cost_with_cap_remaining() -> Self {
        Self {
            multi_edge: true,
            require_capacity: true,
            tie_break: EdgeTieBreak::PreferHigherResidual,
        }
    }

    /// One residual-preferring edge per neighbour (LSP tunnel view).
    pub fn single_min_cost_with_cap_remaining() -> Self {
        Self {
            multi_edge: false,
            require_capacity: true,
            tie_break: EdgeTieBreak::PreferHigherResidual,
        }
    }
}

/// Optional inputs to [`spf`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SpfOptions<'a> {
    pub node_mask: Option<&'a [bool]>,
    pub edge_mask: Option<&'a [bool]>,
    /// Residual capacities consulted by `require_capacity` and residual
    /// tie-breaking; edge capacities are used when absent.
    pub residual: Option<&'a [f64]>,
    /// Early termination target.
    pub dst: Option<NodeId>,
    /// Record equal-cost predecessors through different upstream nodes.
    pub multipath: bool,
}

/// Predecessor DAG of an SPF run: per node, the in-edges on min-cost
/// paths from the source, plus the distance array.
#[derive(Debug, Clone)]
pub struct PredDag {
    dist: Vec<i64>,
    pred: Vec<Vec<EdgeId>>,
}

/// Unreachable sentinel in the integer distance domain.
const UNREACHED: i64 = i64::MAX;

impl PredDag {
    pub fn num_nodes(&self) -> usize {
        self.dist.len()
    }

    /// Distance to `node` in cost units; `None` when unreachable.
    pub fn dist(&self, node: NodeId) -> Option<i64> {
        match self.dist[node] {
            UNREACHED => None,
            d => Some(d),
        }
    }

    /// Predecessor edges of `node` on min-cost paths.
    pub fn pred_edges(&self, node: NodeId) -> &[EdgeId] {
        &self.pred[node]
    }

    /// Edges of the sub-DAG lying on paths from the source to `dst`,
    /// discovered by walking predecessor chains backward from `dst`.
    pub fn edges_to(&self, graph: &CoreGraph, dst: NodeId) -> Vec<EdgeId> {
        let mut visited = vec![false; self.dist.len()];
        let mut stack = vec![dst];
        visited[dst] = true;
        let mut edges = Vec::new();
        while let Some(node) = stack.pop() {
            for &edge in &self.pred[node] {
                edges.push(edge);
                let up = graph.edge_src(edge);
                if !visited[up] {
                    visited[up] = true;
                    stack.push(up);
                }
            }
        }
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    /// Enumerate concrete paths from `src` to `dst` as sequences of
    /// `(node, edges-to-next)` elements; the final element carries no
    /// edges. With `split_parallel_edges` each parallel edge combination
    /// becomes a distinct path; otherwise parallel edges at a hop share
    /// one element. Results are deduplicated and sorted by a stable key.
    pub fn resolve_to_paths(
        &self,
        graph: &CoreGraph,
        src: NodeId,
        dst: NodeId,
        split_parallel_edges: bool,
    ) -> Vec<Vec<(NodeId, Vec<EdgeId>)>> {
        if self.dist[dst] == UNREACHED || src == dst {
            return Vec::new();
        }

        // Group predecessor edges by upstream node.
        let group = |node: NodeId| -> Vec<(NodeId, Vec<EdgeId>)> {
            let mut groups: Vec<(NodeId, Vec<EdgeId>)> = Vec::new();
            for &edge in &self.pred[node] {
                let up = graph.edge_src(edge);
                match groups.iter_mut().find(|(u, _)| *u == up) {
                    Some((_, edges)) => edges.push(edge),
                    None => groups.push((up, vec![edge])),
                }
            }
            for (_, edges) in groups.iter_mut() {
                edges.sort_unstable();
            }
            groups.sort_by_key(|(u, _)| *u);
            groups
        };

        // Depth-first over reversed hops; on-stack guard defends against
        // zero-cost pred cycles.
        let mut paths: Vec<Vec<(NodeId, Vec<EdgeId>)>> = Vec::new();
        let mut suffix: Vec<(NodeId, Vec<EdgeId>)> = vec![(dst, Vec::new())];
        let mut on_stack = vec![false; self.dist.len()];
        on_stack[dst] = true;

        fn walk(
            node: NodeId,
            src: NodeId,
            split: bool,
            group: &dyn Fn(NodeId) -> Vec<(NodeId, Vec<EdgeId>)>,
            suffix: &mut Vec<(NodeId, Vec<EdgeId>)>,
            on_stack: &mut Vec<bool>,
            paths: &mut Vec<Vec<(NodeId, Vec<EdgeId>)>>,
        ) {
            if node == src {
                let mut path: Vec<(NodeId, Vec<EdgeId>)> = suffix.clone();
                path.reverse();
                paths.push(path);
                return;
            }
            for (up, edges) in group(node) {
                if on_stack[up] {
                    continue;
                }
                on_stack[up] = true;
                if split {
                    for &edge in &edges {
                        suffix.push((up, vec![edge]));
                        walk(up, src, split, group, suffix, on_stack, paths);
                        suffix.pop();
                    }
                } else {
                    suffix.push((up, edges));
                    walk(up, src, split, group, suffix, on_stack, paths);
                    suffix.pop();
                }
                on_stack[up] = false;
            }
        }

        walk(
            dst,
            src,
            split_parallel_edges,
            &group,
            &mut suffix,
            &mut on_stack,
            &mut paths,
        );

        paths.sort();
        paths.dedup();
        paths
    }
}

/// Run single-source shortest-path search, producing the distance array
/// (infinity for unreachable nodes) and the predecessor DAG.
pub fn spf(
    graph: &CoreGraph,
    src: NodeId,
    selection: EdgeSelection,
    opts: SpfOptions<'_>,
) -> (Vec<f64>, PredDag) {
    let n = graph.num_nodes();
    let mut dist = vec![UNREACHED; n];
    let mut pred: Vec<Vec<EdgeId>> = vec![Vec::new(); n];

    let node_ok = |node: NodeId| opts.node_mask.map(|m| m[node]).unwrap_or(true);
    let edge_ok = |edge: EdgeId| opts.edge_mask.map(|m| m[edge]).unwrap_or(true);
    let residual_of = |edge: EdgeId| match opts.residual {
        Some(residual) => residual[edge],
        None => graph.capacities()[edge],
    };

    if !node_ok(src) {
        return (to_float_dists(&dist), PredDag { dist, pred });
    }

    let costs = graph.costs();
    let mut heap: BinaryHeap<Reverse<(i64, NodeId)>> = BinaryHeap::new();
    dist[src] = 0;
    heap.push(Reverse((0, src)));

    let mut chosen: Vec<EdgeId> = Vec::new();

    while let Some(Reverse((d, u))) = heap.pop() {
        if d > dist[u] {
            continue;
        }
        if opts.dst == Some(u) {
            break;
        }

        let outs = graph.out_edges(u);
        let mut i = 0;
        while i < outs.len() {
            let v = graph.edge_dst(outs[i]);
            let mut j = i;
            while j < outs.len() && graph.edge_dst(outs[j]) == v {
                j += 1;
            }
            let parallel = &outs[i..j];
            i = j;

            if v == u || !node_ok(v) {
                continue;
            }

            // Usable parallel edges at minimum cost.
            let mut min_cost = i64::MAX;
            for &k in parallel {
                if !edge_ok(k) {
                    continue;
                }
                if selection.require_capacity && residual_of(k) <= MIN_CAP {
                    continue;
                }
                if costs[k] < min_cost {
                    min_cost = costs[k];
                }
            }
            if min_cost == i64::MAX {
                continue;
            }

            chosen.clear();
            if selection.multi_edge {
                for &k in parallel {
                    if !edge_ok(k) {
                        continue;
                    }
                    if selection.require_capacity && residual_of(k) <= MIN_CAP {
                        continue;
                    }
                    if costs[k] == min_cost {
                        chosen.push(k);
                    }
                }
            } else {
                let mut best: Option<EdgeId> = None;
                for &k in parallel {
                    if !edge_ok(k) {
                        continue;
                    }
                    if selection.require_capacity && residual_of(k) <= MIN_CAP {
                        continue;
                    }
                    if costs[k] != min_cost {
                        continue;
                    }
                    best = match (best, selection.tie_break) {
                        (None, _) => Some(k),
                        (Some(b), EdgeTieBreak::Deterministic) => Some(b.min(k)),
                        (Some(b), EdgeTieBreak::PreferHigherResidual) => {
                            if residual_of(k) > residual_of(b) {
                                Some(k)
                            } else {
                                Some(b)
                            }
                        }
                    };
                }
                if let Some(k) = best {
                    chosen.push(k);
                }
            }
            if chosen.is_empty() {
                continue;
            }

            let cand = d.saturating_add(min_cost);
            if cand < dist[v] {
                dist[v] = cand;
                pred[v].clear();
                pred[v].extend_from_slice(&chosen);
                heap.push(Reverse((cand, v)));
            } else if cand == dist[v] && opts.multipath {
                pred[v].extend_from_slice(&chosen);
            }
        }
    }

    (to_float_dists(&dist), PredDag { dist, pred })
}

fn to_float_dists(dist: &[i64]) -> Vec<f64> {
    dist.iter()
        .map(|&d| if d == UNREACHED { f64::INFINITY } else { d as f64 })
        .collect()
}
