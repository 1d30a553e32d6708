//! Maximum-supported-demand search.
//!
//! Finds `alpha_star`, the largest uniform multiplier on all demand
//! volumes that still yields a fully feasible placement. The expansion,
//! substrate, masks, and resolved node ids are built once; each probe
//! only scales the volume vector. Bracketing grows (or shrinks) the
//! multiplier geometrically until the feasibility boundary is straddled,
//! then bisection narrows the bracket to `resolution`.

use netgraph_algo::{FlowGraph, FlowPolicyPreset};
use netgraph_core::{CoreGraph, NetGraphError, NetGraphResult, Network, NodeId};
use netgraph_scenarios::TrafficDemand;
use serde::Serialize;
use tracing::{debug, info};

use crate::demand::{expand_demands, ExpandedDemand};
use crate::placement::{place_demands, resolve_demand_ids, PlacementOptions};

/// Search parameters; validated at construction.
#[derive(Debug, Clone)]
pub struct MsdSearch {
    pub alpha_start: f64,
    pub growth_factor: f64,
    pub alpha_min: f64,
    pub alpha_max: f64,
    pub resolution: f64,
    pub max_bracket_iters: usize,
    pub max_bisect_iters: usize,
    /// Placement attempts per probe; feasibility is a majority decision.
    pub seeds_per_alpha: usize,
}

impl Default for MsdSearch {
    fn default() -> Self {
        Self {
            alpha_start: 1.0,
            growth_factor: 2.0,
            alpha_min: 1e-6,
            alpha_max: 1e9,
            resolution: 0.01,
            max_bracket_iters: 32,
            max_bisect_iters: 32,
            seeds_per_alpha: 1,
        }
    }
}

/// One probe evaluation in the search log.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRecord {
    pub alpha: f64,
    pub feasible: bool,
    pub seeds: usize,
    pub feasible_seeds: usize,
    pub min_placement_ratio: f64,
}

/// Search outcome: the multiplier plus the full probe log for
/// provenance.
#[derive(Debug, Clone, Serialize)]
pub struct MsdResult {
    pub alpha_star: f64,
    pub probes: Vec<ProbeRecord>,
}

struct MsdCache {
    graph: CoreGraph,
    node_mask: Vec<bool>,
    edge_mask: Vec<bool>,
    expanded: Vec<ExpandedDemand>,
    resolved_ids: Vec<(NodeId, NodeId)>,
}

impl MsdSearch {
    pub fn validate(&self) -> NetGraphResult<()> {
        if self.seeds_per_alpha < 1 {
            return Err(NetGraphError::Parameter(
                "seeds_per_alpha must be >= 1".into(),
            ));
        }
        if self.growth_factor <= 1.0 {
            return Err(NetGraphError::Parameter(
                "growth_factor must be > 1.0".into(),
            ));
        }
        if self.resolution <= 0.0 {
            return Err(NetGraphError::Parameter("resolution must be positive".into()));
        }
        if self.alpha_start <= 0.0 {
            return Err(NetGraphError::Parameter("alpha_start must be positive".into()));
        }
        Ok(())
    }

    /// Run the search for a demand set on a network.
    pub fn run(&self, network: &Network, demands: &[TrafficDemand]) -> NetGraphResult<MsdResult> {
        self.validate()?;
        if demands.is_empty() {
            return Err(NetGraphError::Selection(
                "demand set contains no demands; cannot compute maximum supported demand"
                    .into(),
            ));
        }

        let cache = self.build_cache(network, demands)?;
        debug!(demands = cache.expanded.len(), "msd cache built");

        let mut probes: Vec<ProbeRecord> = Vec::new();
        let alpha_star = self.search(&cache, &mut probes)?;
        info!(alpha_star, probes = probes.len(), "msd search complete");
        Ok(MsdResult { alpha_star, probes })
    }

    fn build_cache(
        &self,
        network: &Network,
        demands: &[TrafficDemand],
    ) -> NetGraphResult<MsdCache> {
        let expansion = expand_demands(network, demands, FlowPolicyPreset::ShortestPathsEcmp)?;
        let graph = CoreGraph::from_network(network, &expansion.augmentations)?;
        let node_mask = graph.build_node_mask(None);
        let edge_mask = graph.build_edge_mask(None);
        let resolved_ids = resolve_demand_ids(&graph, &expansion.demands)?;
        Ok(MsdCache {
            graph,
            node_mask,
            edge_mask,
            expanded: expansion.demands,
            resolved_ids,
        })
    }

    fn evaluate_alpha(
        &self,
        cache: &MsdCache,
        alpha: f64,
    ) -> NetGraphResult<(bool, ProbeRecord)> {
        let volumes: Vec<f64> = cache.expanded.iter().map(|d| d.volume * alpha).collect();
        let mut feasible_seeds = 0usize;
        let mut min_ratio = f64::INFINITY;

        for _ in 0..self.seeds_per_alpha.max(1) {
            let mut flow_graph = FlowGraph::with_edge_mask(&cache.graph, &cache.edge_mask);
            let result = place_demands(
                &cache.expanded,
                &volumes,
                &mut flow_graph,
                &cache.graph,
                &cache.node_mask,
                &cache.edge_mask,
                Some(&cache.resolved_ids),
                &PlacementOptions::default(),
            )?;
            if result.summary.total_demand == 0.0 {
                return Err(NetGraphError::Selection(format!(
                    "cannot evaluate feasibility for alpha={alpha:.6}: total demand is zero"
                )));
            }
            if result.summary.is_feasible() {
                feasible_seeds += 1;
            }
            min_ratio = min_ratio.min(result.summary.ratio());
        }

        let seeds = self.seeds_per_alpha.max(1);
        let required = seeds / 2 + 1;
        let feasible = feasible_seeds >= required;
        Ok((
            feasible,
            ProbeRecord {
                alpha,
                feasible,
                seeds,
                feasible_seeds,
                min_placement_ratio: if min_ratio.is_finite() { min_ratio } else { 1.0 },
            },
        ))
    }

    /// Bracket then bisect.
    fn search(
        &self,
        cache: &MsdCache,
        probes: &mut Vec<ProbeRecord>,
    ) -> NetGraphResult<f64> {
        let mut probe = |alpha: f64| -> NetGraphResult<bool> {
            let (feasible, record) = self.evaluate_alpha(cache, alpha)?;
            probes.push(record);
            Ok(feasible)
        };

        let mut lower: Option<f64> = None;
        let mut upper: Option<f64> = None;

        if probe(self.alpha_start)? {
            lower = Some(self.alpha_start);
            let mut alpha = self.alpha_start;
            for _ in 0..self.max_bracket_iters {
                alpha = (alpha * self.growth_factor).min(self.alpha_max);
                if Some(alpha) == lower {
                    break;
                }
                if probe(alpha)? {
                    lower = Some(alpha);
                } else {
                    upper = Some(alpha);
                    break;
                }
            }
            if upper.is_none() {
                upper = Some(
                    self.alpha_max
                        .min(lower.unwrap_or(self.alpha_start) + self.resolution.max(1.0)),
                );
            }
        } else {
            upper = Some(self.alpha_start);
            let mut alpha = self.alpha_start;
            for _ in 0..self.max_bracket_iters {
                alpha = (alpha / self.growth_factor).max(self.alpha_min);
                if Some(alpha) == upper {
                    break;
                }
                if probe(alpha)? {
                    lower = Some(alpha);
                    break;
                }
                upper = Some(alpha);
            }
            if lower.is_none() {
                return Err(NetGraphError::Selection(
                    "no feasible alpha found above alpha_min".into(),
                ));
            }
        }

        let (mut left, mut right) = (
            lower.expect("bracket lower bound"),
            upper.expect("bracket upper bound"),
        );
        for _ in 0..self.max_bisect_iters {
            if right - left <= self.resolution {
                break;
            }
            let mid = (left + right) / 2.0;
            if probe(mid)? {
                left = mid;
            } else {
                right = mid;
            }
        }
        Ok(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgraph_core::Mode;
    use netgraph_core::{Link, Network, Node};

    fn line(capacity: f64) -> Network {
        let mut network = Network::new();
        for name in ["A", "B", "C"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("A", "B").with_id("ab").with_capacity(capacity).with_cost(1));
        network.add_link(Link::new("B", "C").with_id("bc").with_capacity(capacity).with_cost(1));
        network
    }

    fn single_demand(volume: f64) -> Vec<TrafficDemand> {
        vec![TrafficDemand::new("^A$", "^C$", volume)
            .with_id("d1")
            .with_mode(Mode::Pairwise)]
    }

    #[test]
    fn test_alpha_star_brackets_and_converges() {
        // Volume 2 on a capacity-5 path: alpha_star ~ 2.5.
        let network = line(5.0);
        let search = MsdSearch::default();
        let result = search.run(&network, &single_demand(2.0)).unwrap();
        assert!(result.alpha_star >= 1.0);
        assert!((result.alpha_star - 2.5).abs() <= search.resolution);
        // The probe log proves bracketing: at least one feasible and one
        // infeasible probe.
        assert!(result.probes.iter().any(|p| p.feasible));
        assert!(result.probes.iter().any(|p| !p.feasible));
        // alpha beyond the bracket is infeasible.
        for probe in &result.probes {
            if probe.alpha > result.alpha_star + search.resolution {
                assert!(!probe.feasible, "alpha {} should be infeasible", probe.alpha);
            }
        }
    }

    #[test]
    fn test_infeasible_start_shrinks() {
        // Volume 20 on a capacity-5 path: alpha_star ~ 0.25.
        let network = line(5.0);
        let search = MsdSearch {
            resolution: 0.001,
            ..Default::default()
        };
        let result = search.run(&network, &single_demand(20.0)).unwrap();
        assert!(result.alpha_star < 1.0);
        assert!((result.alpha_star - 0.25).abs() <= 0.01);
    }

    #[test]
    fn test_no_feasible_alpha_errors() {
        // Zero-capacity path: nothing places at any alpha.
        let network = line(0.0);
        let search = MsdSearch {
            max_bracket_iters: 8,
            ..Default::default()
        };
        let err = search.run(&network, &single_demand(1.0)).unwrap_err();
        assert!(err.to_string().contains("no feasible alpha"));
    }

    #[test]
    fn test_empty_demand_set_errors() {
        let network = line(5.0);
        let err = MsdSearch::default().run(&network, &[]).unwrap_err();
        assert!(err.to_string().contains("no demands"));
    }

    #[test]
    fn test_parameter_validation() {
        let bad = MsdSearch {
            growth_factor: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = MsdSearch {
            seeds_per_alpha: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = MsdSearch {
            resolution: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_probe_log_records_ratios() {
        let network = line(5.0);
        let result = MsdSearch::default()
            .run(&network, &single_demand(2.0))
            .unwrap();
        for probe in &result.probes {
            assert_eq!(probe.seeds, 1);
            assert!(probe.min_placement_ratio > 0.0);
            assert!(probe.min_placement_ratio <= 1.0 + 1e-9);
        }
    }
}
