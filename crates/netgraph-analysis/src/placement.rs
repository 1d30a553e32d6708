//! Demand placement with per-source DAG caching.
//!
//! Demands are placed in priority order. For cacheable presets (ECMP,
//! WCMP, TE_WCMP_UNLIM) the first-step shortest-path DAG depends only on
//! `(source, preset)` and is cached across demands of a run. The
//! TE_WCMP_UNLIM continuation loop recomputes SPF against the live
//! residual each round; those DAGs are specific to the current demand's
//! placement progress and are never cached: caching them would corrupt
//! later demands from the same source. Non-cacheable presets (the LSP
//! tunnel variants) delegate to [`FlowPolicy`], which owns its own
//! flow-count and re-optimisation behaviour.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;
use netgraph_algo::{
    spf, EdgeSelection, EdgeTieBreak, FlowGraph, FlowIndex, FlowPlacement, FlowPolicy,
    FlowPolicyPreset, PredDag, SpfOptions, MIN_FLOW,
};
use netgraph_core::{CoreGraph, NetGraphError, NetGraphResult, NodeId};

use crate::demand::ExpandedDemand;

/// Iteration cap for the TE continuation loop.
const TE_LOOP_CAP: usize = 100;

/// Aggregated placement totals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementSummary {
    pub total_demand: f64,
    pub total_placed: f64,
}

impl PlacementSummary {
    pub fn ratio(&self) -> f64 {
        if self.total_demand > 0.0 {
            self.total_placed / self.total_demand
        } else {
            1.0
        }
    }

    pub fn is_feasible(&self) -> bool {
        self.ratio() >= 1.0 - 1e-12
    }
}

/// Single demand placement outcome.
#[derive(Debug, Clone)]
pub struct PlacementEntry {
    pub src_name: String,
    pub dst_name: String,
    pub priority: i32,
    pub volume: f64,
    pub placed: f64,
    pub cost_distribution: BTreeMap<i64, f64>,
    /// `link_id:direction` strings of edges carrying this demand.
    pub used_edges: BTreeSet<String>,
}

/// Complete placement result.
#[derive(Debug, Clone)]
pub struct PlacementResult {
    pub summary: PlacementSummary,
    pub entries: Option<Vec<PlacementEntry>>,
}

/// Collection switches for [`place_demands`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacementOptions {
    pub collect_entries: bool,
    pub include_cost_distribution: bool,
    pub include_used_edges: bool,
}

fn selection_for(preset: FlowPolicyPreset) -> EdgeSelection {
    match preset {
        FlowPolicyPreset::ShortestPathsEcmp | FlowPolicyPreset::ShortestPathsWcmp => {
            EdgeSelection {
                multi_edge: true,
                require_capacity: false,
                tie_break: EdgeTieBreak::Deterministic,
            }
        }
        _ => EdgeSelection {
            multi_edge: true,
            require_capacity: true,
            tie_break: EdgeTieBreak::PreferHigherResidual,
        },
    }
}

fn placement_for(preset: FlowPolicyPreset) -> FlowPlacement {
    match preset {
        FlowPolicyPreset::ShortestPathsEcmp => FlowPlacement::EqualBalanced,
        _ => FlowPlacement::Proportional,
    }
}

/// Place demands on a flow graph, in the given (priority-sorted) order.
///
/// `volumes` parallels `demands`, allowing uniform scaling without
/// rebuilding the expansion. `resolved_ids` are computed from the graph
/// when absent.
#[allow(clippy::too_many_arguments)]
pub fn place_demands(
    demands: &[ExpandedDemand],
    volumes: &[f64],
    flow_graph: &mut FlowGraph<'_>,
    graph: &CoreGraph,
    node_mask: &[bool],
    edge_mask: &[bool],
    resolved_ids: Option<&[(NodeId, NodeId)]>,
    opts: &PlacementOptions,
) -> NetGraphResult<PlacementResult> {
    if demands.len() != volumes.len() {
        return Err(NetGraphError::Parameter(format!(
            "demands ({}) and volumes ({}) must have equal length",
            demands.len(),
            volumes.len()
        )));
    }

    let owned_ids: Vec<(NodeId, NodeId)>;
    let resolved: &[(NodeId, NodeId)] = match resolved_ids {
        Some(ids) => ids,
        None => {
            owned_ids = resolve_demand_ids(graph, demands)?;
            &owned_ids
        }
    };

    let mut dag_cache: HashMap<(NodeId, FlowPolicyPreset), (Vec<f64>, PredDag)> = HashMap::new();
    let mut entries: Option<Vec<PlacementEntry>> = opts.collect_entries.then(Vec::new);
    let mut total_demand = 0.0;
    let mut total_placed = 0.0;
    let mut flow_counter: u64 = 0;

    for ((demand, &volume), &(src_id, dst_id)) in
        demands.iter().zip(volumes.iter()).zip(resolved.iter())
    {
        total_demand += volume;

        let (placed, cost_distribution, used_edges) = if demand.policy_preset.is_cacheable() {
            place_cached(
                demand,
                volume,
                src_id,
                dst_id,
                flow_graph,
                graph,
                node_mask,
                edge_mask,
                &mut dag_cache,
                &mut flow_counter,
                opts,
            )?
        } else {
            place_with_policy(
                demand,
                volume,
                src_id,
                dst_id,
                flow_graph,
                node_mask,
                edge_mask,
                &mut flow_counter,
                opts,
            )?
        };

        total_placed += placed;

        if let Some(entries) = entries.as_mut() {
            entries.push(PlacementEntry {
                src_name: demand.src_name.clone(),
                dst_name: demand.dst_name.clone(),
                priority: demand.priority,
                volume,
                placed,
                cost_distribution,
                used_edges,
            });
        }
    }

    Ok(PlacementResult {
        summary: PlacementSummary {
            total_demand,
            total_placed,
        },
        entries,
    })
}

/// Resolve `(src_id, dst_id)` pairs for expanded demands against a graph
/// that already contains their pseudo nodes.
pub fn resolve_demand_ids(
    graph: &CoreGraph,
    demands: &[ExpandedDemand],
) -> NetGraphResult<Vec<(NodeId, NodeId)>> {
    demands
        .iter()
        .map(|demand| {
            let src = graph.node_id(&demand.src_name).ok_or_else(|| {
                NetGraphError::Config(format!(
                    "demand '{}' source node '{}' not in graph; was the context built \
                     with this demand set's augmentations?",
                    demand.demand_id, demand.src_name
                ))
            })?;
            let dst = graph.node_id(&demand.dst_name).ok_or_else(|| {
                NetGraphError::Config(format!(
                    "demand '{}' target node '{}' not in graph",
                    demand.demand_id, demand.dst_name
                ))
            })?;
            Ok((src, dst))
        })
        .collect()
}

type PlacedDetails = (f64, BTreeMap<i64, f64>, BTreeSet<String>);

#[allow(clippy::too_many_arguments)]
fn place_cached(
    demand: &ExpandedDemand,
    volume: f64,
    src_id: NodeId,
    dst_id: NodeId,
    flow_graph: &mut FlowGraph<'_>,
    graph: &CoreGraph,
    node_mask: &[bool],
    edge_mask: &[bool],
    dag_cache: &mut HashMap<(NodeId, FlowPolicyPreset), (Vec<f64>, PredDag)>,
    flow_counter: &mut u64,
    opts: &PlacementOptions,
) -> NetGraphResult<PlacedDetails> {
    let preset = demand.policy_preset;
    let selection = selection_for(preset);
    let placement = placement_for(preset);
    let is_te = preset == FlowPolicyPreset::TeWcmpUnlim;

    // First step: capacity-based DAG, cacheable per (source, preset).
    let cache_key = (src_id, preset);
    if !dag_cache.contains_key(&cache_key) {
        let computed = spf(
            graph,
            src_id,
            selection,
            SpfOptions {
                node_mask: Some(node_mask),
                edge_mask: Some(edge_mask),
                residual: None,
                dst: None,
                multipath: true,
            },
        );
        dag_cache.insert(cache_key, computed);
    }
    let (dists, dag) = &dag_cache[&cache_key];

    if dists[dst_id].is_infinite() {
        return Ok((0.0, BTreeMap::new(), BTreeSet::new()));
    }

    let mut flow_indices: Vec<FlowIndex> = Vec::new();
    let mut flow_costs: Vec<(i64, f64)> = Vec::new();
    let mut placed = 0.0;
    let mut remaining = volume;

    let cost = dists[dst_id] as i64;
    let index = FlowIndex::new(src_id, dst_id, demand.priority, *flow_counter);
    *flow_counter += 1;
    let amount = flow_graph.place(index, src_id, dst_id, dag, remaining, placement)?;
    if amount > MIN_FLOW {
        flow_indices.push(index);
        flow_costs.push((cost, amount));
        placed += amount;
        remaining -= amount;
    }

    if is_te && remaining > MIN_FLOW {
        for _ in 0..TE_LOOP_CAP {
            // Residual-based DAG: never cached (demand-specific state).
            let residual = flow_graph.residual_view().to_vec();
            let (fresh_dists, fresh_dag) = spf(
                graph,
                src_id,
                selection,
                SpfOptions {
                    node_mask: Some(node_mask),
                    edge_mask: Some(edge_mask),
                    residual: Some(&residual),
                    dst: None,
                    multipath: true,
                },
            );
            if fresh_dists[dst_id].is_infinite() {
                break;
            }
            let fresh_cost = fresh_dists[dst_id] as i64;
            let index = FlowIndex::new(src_id, dst_id, demand.priority, *flow_counter);
            *flow_counter += 1;
            let additional =
                flow_graph.place(index, src_id, dst_id, &fresh_dag, remaining, placement)?;
            if additional < MIN_FLOW {
                break;
            }
            flow_indices.push(index);
            flow_costs.push((fresh_cost, additional));
            placed += additional;
            remaining -= additional;
            if remaining < MIN_FLOW {
                break;
            }
        }
    }

    let mut cost_distribution = BTreeMap::new();
    if opts.include_cost_distribution {
        for (cost, amount) in flow_costs {
            *cost_distribution.entry(cost).or_insert(0.0) += amount;
        }
    }
    let mut used_edges = BTreeSet::new();
    if opts.include_used_edges {
        for index in &flow_indices {
            for (edge, _) in flow_graph.get_flow_edges(index) {
                if let Some(edge_ref) = graph.edge_ref(edge) {
                    used_edges.insert(edge_ref.to_string());
                }
            }
        }
    }
    Ok((placed, cost_distribution, used_edges))
}

#[allow(clippy::too_many_arguments)]
fn place_with_policy(
    demand: &ExpandedDemand,
    volume: f64,
    src_id: NodeId,
    dst_id: NodeId,
    flow_graph: &mut FlowGraph<'_>,
    node_mask: &[bool],
    edge_mask: &[bool],
    flow_counter: &mut u64,
    opts: &PlacementOptions,
) -> NetGraphResult<PlacedDetails> {
    let policy = FlowPolicy::from_preset(demand.policy_preset, node_mask, edge_mask);
    let outcome = policy.place_demand(
        flow_graph,
        src_id,
        dst_id,
        demand.priority,
        volume,
        flow_counter,
    )?;

    let mut cost_distribution = BTreeMap::new();
    let mut used_edges = BTreeSet::new();
    if opts.include_cost_distribution {
        for flow in &outcome.flows {
            if flow.volume > 0.0 {
                *cost_distribution.entry(flow.cost).or_insert(0.0) += flow.volume;
            }
        }
    }
    if opts.include_used_edges {
        let graph = flow_graph.graph();
        for flow in &outcome.flows {
            for (edge, _) in flow_graph.get_flow_edges(&flow.index) {
                if let Some(edge_ref) = graph.edge_ref(edge) {
                    used_edges.insert(edge_ref.to_string());
                }
            }
        }
    }
    Ok((outcome.placed, cost_distribution, used_edges))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::expand_demands;
    use netgraph_core::Mode;
    use netgraph_core::{Link, Network, Node};
    use netgraph_scenarios::TrafficDemand;

    fn diamond() -> Network {
        let mut network = Network::new();
        for name in ["A", "B", "C", "D"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("A", "B").with_id("ab").with_capacity(60.0).with_cost(1));
        network.add_link(Link::new("A", "C").with_id("ac").with_capacity(60.0).with_cost(1));
        network.add_link(Link::new("B", "D").with_id("bd").with_capacity(60.0).with_cost(1));
        network.add_link(Link::new("C", "D").with_id("cd").with_capacity(60.0).with_cost(1));
        network
    }

    fn place_all(
        network: &Network,
        demands: Vec<TrafficDemand>,
        opts: &PlacementOptions,
    ) -> PlacementResult {
        let expansion = expand_demands(
            network,
            &demands,
            netgraph_algo::FlowPolicyPreset::ShortestPathsEcmp,
        )
        .unwrap();
        let graph = CoreGraph::from_network(network, &expansion.augmentations).unwrap();
        let node_mask = graph.build_node_mask(None);
        let edge_mask = graph.build_edge_mask(None);
        let mut flow_graph = FlowGraph::with_edge_mask(&graph, &edge_mask);
        let volumes: Vec<f64> = expansion.demands.iter().map(|d| d.volume).collect();
        place_demands(
            &expansion.demands,
            &volumes,
            &mut flow_graph,
            &graph,
            &node_mask,
            &edge_mask,
            None,
            opts,
        )
        .unwrap()
    }

    #[test]
    fn test_diamond_pairwise_places_fully() {
        let network = diamond();
        let demand = TrafficDemand::new("^A$", "^D$", 50.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise);
        let result = place_all(&network, vec![demand], &PlacementOptions::default());
        assert!((result.summary.total_demand - 50.0).abs() < 1e-9);
        assert!((result.summary.total_placed - 50.0).abs() < 1e-9);
        assert!(result.summary.is_feasible());
    }

    #[test]
    fn test_entries_with_details() {
        let network = diamond();
        let demand = TrafficDemand::new("^A$", "^D$", 50.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise);
        let result = place_all(
            &network,
            vec![demand],
            &PlacementOptions {
                collect_entries: true,
                include_cost_distribution: true,
                include_used_edges: true,
            },
        );
        let entries = result.entries.unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert!((entry.cost_distribution[&2] - 50.0).abs() < 1e-9);
        assert!(entry.used_edges.contains("ab:fwd"));
        assert!(entry.used_edges.contains("cd:fwd"));
    }

    #[test]
    fn test_te_loop_reroutes_and_cache_stays_clean() {
        // Two TE demands from A. The first saturates the cheap path and
        // spills to the costlier one; the second must not see a cached
        // residual-based DAG from the first.
        let mut network = Network::new();
        for name in ["A", "B", "C", "D", "E"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("A", "B").with_id("ab").with_capacity(50.0).with_cost(1));
        network.add_link(Link::new("B", "D").with_id("bd").with_capacity(50.0).with_cost(1));
        network.add_link(Link::new("B", "E").with_id("be").with_capacity(50.0).with_cost(1));
        network.add_link(Link::new("A", "C").with_id("ac").with_capacity(50.0).with_cost(2));
        network.add_link(Link::new("C", "D").with_id("cd").with_capacity(50.0).with_cost(2));

        let d1 = TrafficDemand::new("^A$", "^D$", 60.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise)
            .with_flow_policy(netgraph_algo::FlowPolicyPreset::TeWcmpUnlim);
        let d2 = TrafficDemand::new("^A$", "^E$", 30.0)
            .with_id("d2")
            .with_mode(Mode::Pairwise)
            .with_flow_policy(netgraph_algo::FlowPolicyPreset::TeWcmpUnlim);

        let result = place_all(
            &network,
            vec![d1, d2],
            &PlacementOptions {
                collect_entries: true,
                include_cost_distribution: true,
                include_used_edges: false,
            },
        );
        let entries = result.entries.unwrap();
        // First demand: 50 on A-B-D, 10 rerouted via A-C-D.
        let first = entries.iter().find(|e| e.dst_name == "D").unwrap();
        assert!((first.placed - 60.0).abs() < 1e-9);
        assert!((first.cost_distribution[&2] - 50.0).abs() < 1e-9);
        assert!((first.cost_distribution[&4] - 10.0).abs() < 1e-9);
        // Second demand: A->B retained nothing, so the cheap A-B-E route
        // is gone; the TE loop finds the detour through C, D, and the
        // reverse of B->D at cost 6. A poisoned cache (reusing the first
        // demand's residual-based DAG) would misplace this demand.
        let second = entries.iter().find(|e| e.dst_name == "E").unwrap();
        assert!((second.placed - 30.0).abs() < 1e-9);
        assert!((second.cost_distribution[&6] - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_scaled_volumes_without_reexpansion() {
        let network = diamond();
        let demand = TrafficDemand::new("^A$", "^D$", 50.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise);
        let expansion = expand_demands(
            &network,
            &[demand],
            netgraph_algo::FlowPolicyPreset::ShortestPathsEcmp,
        )
        .unwrap();
        let graph = CoreGraph::from_network(&network, &expansion.augmentations).unwrap();
        let node_mask = graph.build_node_mask(None);
        let edge_mask = graph.build_edge_mask(None);
        // Scale x3: 150 exceeds the 120 cut.
        let volumes: Vec<f64> = expansion.demands.iter().map(|d| d.volume * 3.0).collect();
        let mut flow_graph = FlowGraph::with_edge_mask(&graph, &edge_mask);
        let result = place_demands(
            &expansion.demands,
            &volumes,
            &mut flow_graph,
            &graph,
            &node_mask,
            &edge_mask,
            None,
            &PlacementOptions::default(),
        )
        .unwrap();
        assert!(!result.summary.is_feasible());
        assert!(result.summary.total_placed < 150.0);
    }

    #[test]
    fn test_unreachable_demand_contributes_zero() {
        let mut network = diamond();
        network.add_node(Node::new("Z"));
        let d1 = TrafficDemand::new("^A$", "^D$", 10.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise);
        let d2 = TrafficDemand::new("^A$", "^Z$", 10.0)
            .with_id("d2")
            .with_mode(Mode::Pairwise);
        let result = place_all(&network, vec![d1, d2], &PlacementOptions::default());
        assert!((result.summary.total_demand - 20.0).abs() < 1e-9);
        assert!((result.summary.total_placed - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_mismatched_volumes_rejected() {
        let network = diamond();
        let demand = TrafficDemand::new("^A$", "^D$", 50.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise);
        let expansion = expand_demands(
            &network,
            &[demand],
            netgraph_algo::FlowPolicyPreset::ShortestPathsEcmp,
        )
        .unwrap();
        let graph = CoreGraph::from_network(&network, &expansion.augmentations).unwrap();
        let node_mask = graph.build_node_mask(None);
        let edge_mask = graph.build_edge_mask(None);
        let mut flow_graph = FlowGraph::with_edge_mask(&graph, &edge_mask);
        let err = place_demands(
            &expansion.demands,
            &[],
            &mut flow_graph,
            &graph,
            &node_mask,
            &edge_mask,
            None,
            &PlacementOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("equal length"));
    }
}
