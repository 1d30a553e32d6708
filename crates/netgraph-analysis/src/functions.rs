//! Analysis callables for failure-manager runs.
//!
//! Each function takes the shared network, per-iteration exclusion sets,
//! typed parameters, and an optional pre-built [`AnalysisContext`]; it
//! returns a validated [`FlowIterationResult`]. Contexts are expensive to
//! build and cheap to reuse: the failure manager builds one up front and
//! hands it to every iteration, which then only rebuilds the
//! O(|excluded|) masks.

use std::collections::BTreeSet;

use netgraph_algo::{FlowGraph, FlowPlacement, FlowPolicyPreset};
use netgraph_core::{Mode, NetGraphResult, Network};
use netgraph_scenarios::TrafficDemand;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::context::{AnalysisContext, FlowAnalysisOptions};
use crate::demand::expand_demands;
use crate::placement::{place_demands, PlacementOptions};
use crate::results::{FlowEntry, FlowIterationResult, FlowSummary};

/// Parameters of [`max_flow_analysis`] and [`sensitivity_analysis`].
#[derive(Debug, Clone)]
pub struct MaxFlowParams {
    pub source: String,
    pub sink: String,
    pub mode: Mode,
    pub shortest_path: bool,
    pub require_capacity: bool,
    pub flow_placement: FlowPlacement,
    pub include_flow_details: bool,
    pub include_min_cut: bool,
}

impl Default for MaxFlowParams {
    fn default() -> Self {
        Self {
            source: String::new(),
            sink: String::new(),
            mode: Mode::Combine,
            shortest_path: false,
            require_capacity: true,
            flow_placement: FlowPlacement::Proportional,
            include_flow_details: false,
            include_min_cut: false,
        }
    }
}

impl MaxFlowParams {
    fn flow_options(&self) -> FlowAnalysisOptions {
        FlowAnalysisOptions {
            shortest_path: self.shortest_path,
            require_capacity: self.require_capacity,
            flow_placement: self.flow_placement,
        }
    }
}

/// Parameters of [`demand_placement_analysis`].
#[derive(Debug, Clone, Default)]
pub struct DemandPlacementParams {
    pub include_flow_details: bool,
    pub include_used_edges: bool,
}

/// Build a bound context for repeated max-flow / sensitivity analysis.
pub fn build_maxflow_context<'n>(
    network: &'n Network,
    source: &str,
    sink: &str,
    mode: Mode,
) -> NetGraphResult<AnalysisContext<'n>> {
    AnalysisContext::from_network_bound(network, source, sink, mode)
}

/// Build a context with demand-set augmentations for repeated placement
/// analysis. Demand ids must be stable: the pseudo nodes baked in here
/// are named after them.
pub fn build_demand_context<'n>(
    network: &'n Network,
    demands: &[TrafficDemand],
) -> NetGraphResult<AnalysisContext<'n>> {
    let expansion = expand_demands(network, demands, FlowPolicyPreset::ShortestPathsEcmp)?;
    AnalysisContext::with_augmentations(network, &expansion.augmentations)
}

/// Maximum-flow capacity between node groups under exclusions.
pub fn max_flow_analysis(
    network: &Network,
    excluded_nodes: &BTreeSet<String>,
    excluded_links: &BTreeSet<String>,
    params: &MaxFlowParams,
    context: Option<&AnalysisContext<'_>>,
) -> NetGraphResult<FlowIterationResult> {
    let owned;
    let ctx = match context {
        Some(ctx) => ctx,
        None => {
            owned = build_maxflow_context(network, &params.source, &params.sink, params.mode)?;
            &owned
        }
    };

    let mut flow_entries: Vec<FlowEntry> = Vec::new();
    let mut total = 0.0;

    if params.include_flow_details || params.include_min_cut {
        let flows = ctx.max_flow_detailed(
            None,
            None,
            params.mode,
            &params.flow_options(),
            Some(excluded_nodes),
            Some(excluded_links),
            params.include_min_cut,
        )?;
        for ((src, dst), result) in flows {
            let mut data = Map::new();
            if params.include_min_cut {
                if let Some(min_cut) = &result.min_cut {
                    if !min_cut.is_empty() {
                        data.insert(
                            "edges".into(),
                            json!(min_cut.iter().map(|e| e.to_string()).collect::<Vec<_>>()),
                        );
                        data.insert("edges_kind".into(), json!("min_cut"));
                    }
                }
            }
            let cost_distribution = if params.include_flow_details {
                result.cost_distribution.clone()
            } else {
                Default::default()
            };
            total += result.total_flow;
            flow_entries.push(FlowEntry::with_details(
                src,
                dst,
                0,
                result.total_flow,
                result.total_flow,
                0.0,
                cost_distribution,
                data,
            )?);
        }
    } else {
        let flows = ctx.max_flow(
            None,
            None,
            params.mode,
            &params.flow_options(),
            Some(excluded_nodes),
            Some(excluded_links),
        )?;
        for ((src, dst), value) in flows {
            total += value;
            flow_entries.push(FlowEntry::new(src, dst, 0, value, value, 0.0)?);
        }
    }

    debug!(total, flows = flow_entries.len(), "max-flow analysis complete");
    let summary = FlowSummary::new(total, total, 0, flow_entries.len())?;
    FlowIterationResult::new(flow_entries, summary)
}

/// Demand placement success under exclusions.
pub fn demand_placement_analysis(
    network: &Network,
    excluded_nodes: &BTreeSet<String>,
    excluded_links: &BTreeSet<String>,
    demands: &[TrafficDemand],
    params: &DemandPlacementParams,
    context: Option<&AnalysisContext<'_>>,
) -> NetGraphResult<FlowIterationResult> {
    let expansion = expand_demands(network, demands, FlowPolicyPreset::ShortestPathsEcmp)?;

    let owned;
    let ctx = match context {
        Some(ctx) => ctx,
        None => {
            owned = AnalysisContext::with_augmentations(network, &expansion.augmentations)?;
            &owned
        }
    };

    let graph = ctx.graph();
    let node_mask = ctx.build_node_mask(Some(excluded_nodes));
    let edge_mask = ctx.build_edge_mask(Some(excluded_links));
    let mut flow_graph = FlowGraph::with_edge_mask(graph, &edge_mask);
    let volumes: Vec<f64> = expansion.demands.iter().map(|d| d.volume).collect();

    let result = place_demands(
        &expansion.demands,
        &volumes,
        &mut flow_graph,
        graph,
        &node_mask,
        &edge_mask,
        None,
        &PlacementOptions {
            collect_entries: true,
            include_cost_distribution: params.include_flow_details,
            include_used_edges: params.include_used_edges,
        },
    )?;

    let mut flow_entries = Vec::new();
    for entry in result.entries.unwrap_or_default() {
        let mut data = Map::new();
        if !entry.used_edges.is_empty() {
            data.insert(
                "edges".into(),
                json!(entry.used_edges.iter().collect::<Vec<_>>()),
            );
            data.insert("edges_kind".into(), json!("used"));
        }
        flow_entries.push(FlowEntry::with_details(
            entry.src_name,
            entry.dst_name,
            entry.priority.max(0),
            entry.volume,
            entry.placed,
            entry.volume - entry.placed,
            entry.cost_distribution,
            data,
        )?);
    }

    let dropped_flows = flow_entries.iter().filter(|e| e.dropped > 0.0).count();
    let summary = FlowSummary::new(
        result.summary.total_demand,
        result.summary.total_placed,
        dropped_flows,
        flow_entries.len(),
    )?;
    FlowIterationResult::new(flow_entries, summary)
}

/// Component criticality: per-pair max flow plus per-edge flow reduction
/// scores stored under `data["sensitivity"]`.
pub fn sensitivity_analysis(
    network: &Network,
    excluded_nodes: &BTreeSet<String>,
    excluded_links: &BTreeSet<String>,
    params: &MaxFlowParams,
    context: Option<&AnalysisContext<'_>>,
) -> NetGraphResult<FlowIterationResult> {
    let owned;
    let ctx = match context {
        Some(ctx) => ctx,
        None => {
            owned = build_maxflow_context(network, &params.source, &params.sink, params.mode)?;
            &owned
        }
    };

    let opts = params.flow_options();
    let flow_values = ctx.max_flow(
        None,
        None,
        params.mode,
        &opts,
        Some(excluded_nodes),
        Some(excluded_links),
    )?;
    let sensitivity_maps = ctx.sensitivity(
        None,
        None,
        params.mode,
        &opts,
        Some(excluded_nodes),
        Some(excluded_links),
    )?;

    let mut flow_entries = Vec::new();
    let mut total = 0.0;
    for ((src, dst), value) in flow_values {
        let scores = sensitivity_maps
            .get(&(src.clone(), dst.clone()))
            .cloned()
            .unwrap_or_default();
        let mut data = Map::new();
        data.insert(
            "sensitivity".into(),
            Value::Object(scores.into_iter().map(|(k, v)| (k, json!(v))).collect()),
        );
        total += value;
        flow_entries.push(FlowEntry::with_details(
            src,
            dst,
            0,
            value,
            value,
            0.0,
            Default::default(),
            data,
        )?);
    }

    let summary = FlowSummary::new(total, total, 0, flow_entries.len())?;
    FlowIterationResult::new(flow_entries, summary)
}
