//! K-shortest-paths enumeration.
//!
//! Yen-style deviation search: the best path comes from a plain SPF; each
//! accepted path spawns candidates by forbidding, one at a time, the edges
//! it uses and re-running SPF under the accumulated exclusion set. The
//! candidate pool is drained in cost order until `k` paths are produced or
//! the cost ceilings cut the stream off.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashSet};

use netgraph_core::{CoreGraph, EdgeId, NodeId};

use crate::spf::{spf, EdgeSelection, PredDag, SpfOptions};

/// Parameters for [`k_shortest_paths`].
#[derive(Debug, Clone, Copy)]
pub struct KspOptions {
    pub k: usize,
    /// Absolute path-cost ceiling.
    pub max_cost: f64,
    /// Relative ceiling: a factor of the best path's cost.
    pub max_cost_factor: Option<f64>,
    pub selection: EdgeSelection,
    pub multipath: bool,
}

impl Default for KspOptions {
    fn default() -> Self {
        Self {
            k: 3,
            max_cost: f64::INFINITY,
            max_cost_factor: None,
            selection: EdgeSelection::all_min_cost(),
            multipath: true,
        }
    }
}

/// One accepted KSP solution: the SPF distance array and predecessor DAG
/// computed under that solution's exclusion set.
pub type KspSolution = (Vec<f64>, PredDag);

#[derive(PartialEq)]
struct Candidate {
    cost: i64,
    seq: usize,
    excluded: BTreeSet<EdgeId>,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.cost, self.seq, &self.excluded).cmp(&(other.cost, other.seq, &other.excluded))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Enumerate up to `k` shortest path solutions from `src` to `dst`.
///
/// Each solution is the `(dists, pred_dag)` pair of an SPF run; callers
/// resolve concrete paths from the DAG. Solutions arrive in nondecreasing
/// cost order and are deduplicated by the edge set of their first
/// resolved path.
pub fn k_shortest_paths(
    graph: &CoreGraph,
    src: NodeId,
    dst: NodeId,
    opts: &KspOptions,
    node_mask: Option<&[bool]>,
    edge_mask: Option<&[bool]>,
) -> Vec<KspSolution> {
    let mut results: Vec<KspSolution> = Vec::new();
    if opts.k == 0 {
        return results;
    }

    let base_mask: Vec<bool> = match edge_mask {
        Some(mask) => mask.to_vec(),
        None => vec![true; graph.num_edges()],
    };

    let run_spf = |excluded: &BTreeSet<EdgeId>| -> (Vec<f64>, PredDag) {
        let mut mask = base_mask.clone();
        for &edge in excluded {
            mask[edge] = false;
        }
        spf(
            graph,
            src,
            opts.selection,
            SpfOptions {
                node_mask,
                edge_mask: Some(&mask),
                residual: None,
                dst: Some(dst),
                multipath: opts.multipath,
            },
        )
    };

    // Signature of a solution: the edges of its lexicographically first
    // resolved path. Re-evaluating the path cost against the substrate's
    // cost array (rather than carrying a sentinel) keeps solutions
    // self-contained.
    let path_signature = |dag: &PredDag| -> Option<Vec<EdgeId>> {
        let paths = dag.resolve_to_paths(graph, src, dst, false);
        paths.first().map(|path| {
            path.iter()
                .flat_map(|(_, edges)| edges.iter().copied())
                .collect()
        })
    };

    let (_, dag0) = run_spf(&BTreeSet::new());
    let best_cost = match dag0.dist(dst) {
        Some(cost) => cost,
        None => return results,
    };

    let ceiling = {
        let mut ceiling = opts.max_cost;
        if let Some(factor) = opts.max_cost_factor {
            ceiling = ceiling.min(best_cost as f64 * factor);
        }
        ceiling
    };

    let mut seen: HashSet<Vec<EdgeId>> = HashSet::new();
    let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
    let mut seq = 0usize;
    heap.push(Reverse(Candidate {
        cost: best_cost,
        seq,
        excluded: BTreeSet::new(),
    }));

    while let Some(Reverse(candidate)) = heap.pop() {
        if results.len() >= opts.k {
            break;
        }
        if (candidate.cost as f64) > ceiling {
            break;
        }

        let (dists, dag) = run_spf(&candidate.excluded);
        let cost = match dag.dist(dst) {
            Some(cost) => cost,
            None => continue,
        };
        if (cost as f64) > ceiling {
            continue;
        }

        let signature = match path_signature(&dag) {
            Some(signature) => signature,
            None => continue,
        };
        if !seen.insert(signature.clone()) {
            continue;
        }

        // Children: forbid each edge of the accepted path on top of the
        // current exclusion set.
        for &edge in &signature {
            let mut excluded = candidate.excluded.clone();
            excluded.insert(edge);
            let (_, child_dag) = run_spf(&excluded);
            if let Some(child_cost) = child_dag.dist(dst) {
                seq += 1;
                heap.push(Reverse(Candidate {
                    cost: child_cost,
                    seq,
                    excluded,
                }));
            }
        }

        results.push((dists, dag));
    }

    results
}
