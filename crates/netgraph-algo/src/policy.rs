//! Flow-policy presets composing SPF and placement primitives.
//!
//! A [`FlowPolicy`] places a demand volume from a source to a sink on a
//! [`FlowGraph`] and reports the placed amount plus the concrete flows
//! created. Presets:
//!
//! | Preset | Placement | multi_edge | require_capacity | Max flows |
//! |---|---|---|---|---|
//! | `ShortestPathsEcmp` | EqualBalanced | yes | no | 1 |
//! | `ShortestPathsWcmp` | Proportional | yes | no | 1 |
//! | `TeWcmpUnlim` | Proportional | yes | yes | unlimited |
//! | `TeEcmpUpTo256Lsp` | EqualBalanced | no | yes | 256 |
//! | `TeEcmp16Lsp` | EqualBalanced | no | yes | 16 (fixed) |
//!
//! TE presets loop: while volume remains, recompute SPF against the
//! current residual (these residual-based DAGs are demand-specific and
//! must never be cached), allocate a fresh [`FlowIndex`], place, and stop
//! on saturation, on the flow-count limit, or at the iteration cap.
//!
//! LSP presets model tunnels: each flow is a single path. Tunnels are
//! assigned with residual-preferring SPF against a working residual, then
//! volumes are equalised so every LSP carries the same share, bounded by
//! `residual[e] / tunnels_using(e)` over all edges.

use std::str::FromStr;

use netgraph_core::{CoreGraph, EdgeId, NetGraphError, NetGraphResult, NodeId};
use serde::{Deserialize, Serialize};

use crate::flow::{FlowGraph, FlowIndex, FlowPlacement};
use crate::spf::{spf, EdgeSelection, EdgeTieBreak, SpfOptions, MIN_FLOW};

/// Bound on TE loop iterations and tunnel counts without explicit limits.
pub const POLICY_ITER_CAP: usize = 100;

/// Named flow-policy presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowPolicyPreset {
    /// Hop-by-hop equal-cost multi-path routing (IP forwarding with ECMP).
    ShortestPathsEcmp,
    /// Hop-by-hop weighted multi-path: proportional split over equal-cost
    /// paths.
    ShortestPathsWcmp,
    /// Traffic engineering with unlimited WCMP flows and capacity-aware
    /// selection.
    TeWcmpUnlim,
    /// Traffic engineering with up to 256 single-path LSP tunnels, all
    /// carrying equal volume.
    TeEcmpUpTo256Lsp,
    /// Traffic engineering with exactly 16 single-path LSP tunnels.
    TeEcmp16Lsp,
}

impl FlowPolicyPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowPolicyPreset::ShortestPathsEcmp => "SHORTEST_PATHS_ECMP",
            FlowPolicyPreset::ShortestPathsWcmp => "SHORTEST_PATHS_WCMP",
            FlowPolicyPreset::TeWcmpUnlim => "TE_WCMP_UNLIM",
            FlowPolicyPreset::TeEcmpUpTo256Lsp => "TE_ECMP_UP_TO_256_LSP",
            FlowPolicyPreset::TeEcmp16Lsp => "TE_ECMP_16_LSP",
        }
    }

    /// Whether the preset's first-step DAG depends only on `(src, preset)`
    /// and may be cached per run. The LSP presets route every flow against
    /// the live residual and are never cacheable.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            FlowPolicyPreset::ShortestPathsEcmp
                | FlowPolicyPreset::ShortestPathsWcmp
                | FlowPolicyPreset::TeWcmpUnlim
        )
    }
}

impl FromStr for FlowPolicyPreset {
    type Err = NetGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SHORTEST_PATHS_ECMP" => Ok(FlowPolicyPreset::ShortestPathsEcmp),
            "SHORTEST_PATHS_WCMP" => Ok(FlowPolicyPreset::ShortestPathsWcmp),
            "TE_WCMP_UNLIM" => Ok(FlowPolicyPreset::TeWcmpUnlim),
            "TE_ECMP_UP_TO_256_LSP" => Ok(FlowPolicyPreset::TeEcmpUpTo256Lsp),
            "TE_ECMP_16_LSP" => Ok(FlowPolicyPreset::TeEcmp16Lsp),
            other => Err(NetGraphError::Config(format!(
                "unknown flow policy preset '{other}'"
            ))),
        }
    }
}

/// Full policy configuration; presets are shorthands for these fields.
#[derive(Debug, Clone, Copy)]
pub struct FlowPolicyConfig {
    pub placement: FlowPlacement,
    pub selection: EdgeSelection,
    /// Record equal-cost multipath predecessors; `false` confines every
    /// flow to a single path (tunnel semantics).
    pub multipath: bool,
    pub min_flow_count: usize,
    /// `None` means unlimited.
    pub max_flow_count: Option<usize>,
    /// Rebalance tunnel volumes after assignment.
    pub reoptimize: bool,
}

impl FlowPolicyConfig {
    pub fn from_preset(preset: FlowPolicyPreset) -> Self {
        match preset {
            FlowPolicyPreset::ShortestPathsEcmp => Self {
                placement: FlowPlacement::EqualBalanced,
                selection: EdgeSelection {
                    multi_edge: true,
                    require_capacity: false,
                    tie_break: EdgeTieBreak::Deterministic,
                },
                multipath: true,
                min_flow_count: 1,
                max_flow_count: Some(1),
                reoptimize: false,
            },
            FlowPolicyPreset::ShortestPathsWcmp => Self {
                placement: FlowPlacement::Proportional,
                selection: EdgeSelection {
                    multi_edge: true,
                    require_capacity: false,
                    tie_break: EdgeTieBreak::Deterministic,
                },
                multipath: true,
                min_flow_count: 1,
                max_flow_count: Some(1),
                reoptimize: false,
            },
            FlowPolicyPreset::TeWcmpUnlim => Self {
                placement: FlowPlacement::Proportional,
                selection: EdgeSelection {
                    multi_edge: true,
                    require_capacity: true,
                    tie_break: EdgeTieBreak::PreferHigherResidual,
                },
                multipath: true,
                min_flow_count: 1,
                max_flow_count: None,
                reoptimize: false,
            },
            FlowPolicyPreset::TeEcmpUpTo256Lsp => Self {
                placement: FlowPlacement::EqualBalanced,
                selection: EdgeSelection {
                    multi_edge: false,
                    require_capacity: true,
                    tie_break: EdgeTieBreak::PreferHigherResidual,
                },
                multipath: false,
                min_flow_count: 1,
                max_flow_count: Some(256),
                reoptimize: true,
            },
            FlowPolicyPreset::TeEcmp16Lsp => Self {
                placement: FlowPlacement::EqualBalanced,
                selection: EdgeSelection {
                    multi_edge: false,
                    require_capacity: true,
                    tie_break: EdgeTieBreak::PreferHigherResidual,
                },
                multipath: false,
                min_flow_count: 16,
                max_flow_count: Some(16),
                reoptimize: true,
            },
        }
    }
}

/// One concrete flow created by a policy placement.
#[derive(Debug, Clone)]
pub struct PolicyFlow {
    pub index: FlowIndex,
    pub cost: i64,
    pub volume: f64,
}

/// Outcome of [`FlowPolicy::place_demand`].
#[derive(Debug, Clone, Default)]
pub struct PolicyPlacement {
    pub placed: f64,
    pub flows: Vec<PolicyFlow>,
}

/// A placement strategy bound to masks; stateless across demands.
#[derive(Debug, Clone, Copy)]
pub struct FlowPolicy<'m> {
    config: FlowPolicyConfig,
    node_mask: &'m [bool],
    edge_mask: &'m [bool],
}

impl<'m> FlowPolicy<'m> {
    pub fn new(config: FlowPolicyConfig, node_mask: &'m [bool], edge_mask: &'m [bool]) -> Self {
        Self {
            config,
            node_mask,
            edge_mask,
        }
    }

    pub fn from_preset(
        preset: FlowPolicyPreset,
        node_mask: &'m [bool],
        edge_mask: &'m [bool],
    ) -> Self {
        Self::new(FlowPolicyConfig::from_preset(preset), node_mask, edge_mask)
    }

    pub fn config(&self) -> &FlowPolicyConfig {
        &self.config
    }

    /// Place `volume` from `src` to `dst`, allocating flow counters from
    /// `flow_counter`. Returns the placed amount and created flows.
    pub fn place_demand(
        &self,
        flow_graph: &mut FlowGraph<'_>,
        src: NodeId,
        dst: NodeId,
        priority: i32,
        volume: f64,
        flow_counter: &mut u64,
    ) -> NetGraphResult<PolicyPlacement> {
        if volume <= MIN_FLOW {
            return Ok(PolicyPlacement::default());
        }
        if !self.config.multipath {
            return self.place_tunnels(flow_graph, src, dst, priority, volume, flow_counter);
        }
        match self.config.max_flow_count {
            Some(1) => self.place_single(flow_graph, src, dst, priority, volume, flow_counter),
            _ => self.place_te_loop(flow_graph, src, dst, priority, volume, flow_counter),
        }
    }

    fn place_single(
        &self,
        flow_graph: &mut FlowGraph<'_>,
        src: NodeId,
        dst: NodeId,
        priority: i32,
        volume: f64,
        flow_counter: &mut u64,
    ) -> NetGraphResult<PolicyPlacement> {
        let graph = flow_graph.graph();
        let residual = flow_graph.residual_view().to_vec();
        let (_, dag) = spf(
            graph,
            src,
            self.config.selection,
            SpfOptions {
                node_mask: Some(self.node_mask),
                edge_mask: Some(self.edge_mask),
                residual: Some(&residual),
                dst: None,
                multipath: true,
            },
        );
        let cost = match dag.dist(dst) {
            Some(cost) => cost,
            None => return Ok(PolicyPlacement::default()),
        };
        let index = FlowIndex::new(src, dst, priority, *flow_counter);
        *flow_counter += 1;
        let placed = flow_graph.place(index, src, dst, &dag, volume, self.config.placement)?;
        if placed <= MIN_FLOW {
            return Ok(PolicyPlacement::default());
        }
        Ok(PolicyPlacement {
            placed,
            flows: vec![PolicyFlow {
                index,
                cost,
                volume: placed,
            }],
        })
    }

    fn place_te_loop(
        &self,
        flow_graph: &mut FlowGraph<'_>,
        src: NodeId,
        dst: NodeId,
        priority: i32,
        volume: f64,
        flow_counter: &mut u64,
    ) -> NetGraphResult<PolicyPlacement> {
        let graph = flow_graph.graph();
        let max_flows = self.config.max_flow_count.unwrap_or(usize::MAX);
        let mut outcome = PolicyPlacement::default();
        let mut remaining = volume;

        for _ in 0..POLICY_ITER_CAP {
            if remaining <= MIN_FLOW || outcome.flows.len() >= max_flows {
                break;
            }
            // Residual-based DAG: specific to this demand's progress.
            let residual = flow_graph.residual_view().to_vec();
            let (_, dag) = spf(
                graph,
                src,
                self.config.selection,
                SpfOptions {
                    node_mask: Some(self.node_mask),
                    edge_mask: Some(self.edge_mask),
                    residual: Some(&residual),
                    dst: None,
                    multipath: true,
                },
            );
            let cost = match dag.dist(dst) {
                Some(cost) => cost,
                None => break,
            };
            let index = FlowIndex::new(src, dst, priority, *flow_counter);
            *flow_counter += 1;
            let placed =
                flow_graph.place(index, src, dst, &dag, remaining, self.config.placement)?;
            if placed <= MIN_FLOW {
                break;
            }
            outcome.placed += placed;
            remaining -= placed;
            outcome.flows.push(PolicyFlow {
                index,
                cost,
                volume: placed,
            });
        }
        Ok(outcome)
    }

    /// LSP tunnel placement: assign single paths against a working
    /// residual, equalise per-LSP volume, then commit.
    fn place_tunnels(
        &self,
        flow_graph: &mut FlowGraph<'_>,
        src: NodeId,
        dst: NodeId,
        priority: i32,
        volume: f64,
        flow_counter: &mut u64,
    ) -> NetGraphResult<PolicyPlacement> {
        let graph = flow_graph.graph();
        let max_n = self
            .config
            .max_flow_count
            .unwrap_or(POLICY_ITER_CAP)
            .max(self.config.min_flow_count);
        let fixed_n = self.config.min_flow_count == self.config.max_flow_count.unwrap_or(0);

        let mut working: Vec<f64> = flow_graph.residual_view().to_vec();
        let mut tunnels: Vec<(i64, Vec<EdgeId>)> = Vec::new();

        let single_path = |residual: &[f64]| -> Option<(i64, Vec<EdgeId>)> {
            let (_, dag) = spf(
                graph,
                src,
                self.config.selection,
                SpfOptions {
                    node_mask: Some(self.node_mask),
                    edge_mask: Some(self.edge_mask),
                    residual: Some(residual),
                    dst: None,
                    multipath: false,
                },
            );
            let cost = dag.dist(dst)?;
            // With multipath and multi_edge off, every node has at most
            // one predecessor edge: follow the chain from dst to src.
            let mut edges = Vec::new();
            let mut node = dst;
            while node != src {
                let edge = *dag.pred_edges(node).first()?;
                edges.push(edge);
                node = graph.edge_src(edge);
            }
            edges.reverse();
            Some((cost, edges))
        };

        // Per-LSP share implied by the current tunnel set: bounded by the
        // request split and by residual shared among tunnels per edge.
        let equal_share = |tunnels: &[(i64, Vec<EdgeId>)]| -> f64 {
            if tunnels.is_empty() {
                return 0.0;
            }
            let mut uses: hashbrown::HashMap<EdgeId, usize> = hashbrown::HashMap::new();
            for (_, edges) in tunnels {
                for &edge in edges {
                    *uses.entry(edge).or_insert(0) += 1;
                }
            }
            let mut share = volume / tunnels.len() as f64;
            for (&edge, &count) in &uses {
                share = share.min(flow_graph.residual_view()[edge] / count as f64);
            }
            share.max(0.0)
        };

        let provisional = volume / self.config.min_flow_count.max(1) as f64;
        while tunnels.len() < max_n {
            match single_path(&working) {
                Some((cost, edges)) => {
                    for &edge in &edges {
                        working[edge] = (working[edge] - provisional).max(0.0);
                    }
                    tunnels.push((cost, edges));
                }
                None => break,
            }
            if !fixed_n {
                let total = equal_share(&tunnels) * tunnels.len() as f64;
                if total >= volume - MIN_FLOW {
                    break;
                }
            }
        }
        if tunnels.is_empty() {
            return Ok(PolicyPlacement::default());
        }

        // Fixed-count presets keep exactly N LSPs even when fewer paths
        // exist: remaining LSPs share the least-loaded existing path.
        if fixed_n && self.config.reoptimize {
            while tunnels.len() < self.config.min_flow_count {
                let mut uses: hashbrown::HashMap<EdgeId, usize> = hashbrown::HashMap::new();
                for (_, edges) in &tunnels {
                    for &edge in edges {
                        *uses.entry(edge).or_insert(0) += 1;
                    }
                }
                let best = tunnels
                    .iter()
                    .map(|(cost, edges)| {
                        let headroom = edges
                            .iter()
                            .map(|&edge| {
                                flow_graph.residual_view()[edge]
                                    / (uses[&edge] + 1) as f64
                            })
                            .fold(f64::INFINITY, f64::min);
                        (*cost, edges.clone(), headroom)
                    })
                    .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
                match best {
                    Some((cost, edges, _)) => tunnels.push((cost, edges)),
                    None => break,
                }
            }
        }

        let share = equal_share(&tunnels);
        if share <= MIN_FLOW {
            return Ok(PolicyPlacement::default());
        }

        let mut outcome = PolicyPlacement::default();
        for (cost, edges) in tunnels {
            let index = FlowIndex::new(src, dst, priority, *flow_counter);
            *flow_counter += 1;
            flow_graph.place_path(index, &edges, share)?;
            outcome.placed += share;
            outcome.flows.push(PolicyFlow {
                index,
                cost,
                volume: share,
            });
        }
        Ok(outcome)
    }
}
