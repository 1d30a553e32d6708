//! Convenience Monte Carlo wrappers for the common analyses.
//!
//! Each wrapper pre-builds the appropriate [`AnalysisContext`] once and
//! shares it by reference with every worker, so per-iteration work is
//! mask building plus the analysis itself. The sensitivity wrapper
//! additionally aggregates per-component statistics weighted by each
//! unique pattern's occurrence count.

use std::collections::BTreeMap;

use netgraph_algo::FlowPlacement;
use netgraph_analysis::{
    build_demand_context, build_maxflow_context, demand_placement_analysis, max_flow_analysis,
    sensitivity_analysis, DemandPlacementParams, FlowIterationResult, MaxFlowParams,
};
use netgraph_core::{Mode, NetGraphResult};
use netgraph_scenarios::TrafficDemand;
use serde::Serialize;
use tracing::debug;

use crate::manager::{FailureManager, MonteCarloResult, Parallelism};

/// Parameters for [`FailureManager::run_max_flow_monte_carlo`] and
/// [`FailureManager::run_sensitivity_monte_carlo`].
#[derive(Debug, Clone)]
pub struct MaxFlowMonteCarloParams {
    pub source: String,
    pub sink: String,
    pub mode: Mode,
    pub iterations: usize,
    pub parallelism: Parallelism,
    pub shortest_path: bool,
    pub require_capacity: bool,
    pub flow_placement: FlowPlacement,
    pub seed: Option<u64>,
    pub store_failure_patterns: bool,
    /// Collect cost distributions and min-cut edges per flow.
    pub include_flow_summary: bool,
}

impl MaxFlowMonteCarloParams {
    pub fn new(source: impl Into<String>, sink: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            sink: sink.into(),
            mode: Mode::Combine,
            iterations: 100,
            parallelism: Parallelism::Fixed(1),
            shortest_path: false,
            require_capacity: true,
            flow_placement: FlowPlacement::Proportional,
            seed: None,
            store_failure_patterns: false,
            include_flow_summary: false,
        }
    }
}

/// Parameters for [`FailureManager::run_demand_placement_monte_carlo`].
#[derive(Debug, Clone)]
pub struct DemandPlacementMonteCarloParams {
    pub iterations: usize,
    pub parallelism: Parallelism,
    pub seed: Option<u64>,
    pub store_failure_patterns: bool,
    pub include_flow_details: bool,
    pub include_used_edges: bool,
}

impl Default for DemandPlacementMonteCarloParams {
    fn default() -> Self {
        Self {
            iterations: 100,
            parallelism: Parallelism::Fixed(1),
            seed: None,
            store_failure_patterns: false,
            include_flow_details: false,
            include_used_edges: false,
        }
    }
}

/// Aggregated statistics of one component's sensitivity scores across
/// unique failure patterns, weighted by occurrence count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Sensitivity Monte Carlo outcome: the raw run plus per-flow component
/// score aggregations keyed `"src->dst"` then `link_id:direction`.
#[derive(Debug)]
pub struct SensitivityMonteCarloResult {
    pub outcome: MonteCarloResult,
    pub component_scores: BTreeMap<String, BTreeMap<String, ComponentStats>>,
}

impl FailureManager<'_> {
    /// Max-flow capacity envelopes between node groups under failures.
    pub fn run_max_flow_monte_carlo(
        &self,
        params: &MaxFlowMonteCarloParams,
    ) -> NetGraphResult<MonteCarloResult> {
        let ctx =
            build_maxflow_context(self.network(), &params.source, &params.sink, params.mode)?;
        let analysis_params = MaxFlowParams {
            source: params.source.clone(),
            sink: params.sink.clone(),
            mode: params.mode,
            shortest_path: params.shortest_path,
            require_capacity: params.require_capacity,
            flow_placement: params.flow_placement,
            include_flow_details: params.include_flow_summary,
            include_min_cut: params.include_flow_summary,
        };
        self.run_monte_carlo_analysis(
            |network, excluded_nodes, excluded_links| {
                max_flow_analysis(
                    network,
                    excluded_nodes,
                    excluded_links,
                    &analysis_params,
                    Some(&ctx),
                )
            },
            "max_flow_analysis",
            params.iterations,
            params.parallelism,
            params.seed,
            params.store_failure_patterns,
        )
    }

    /// Traffic demand placement success under failures.
    pub fn run_demand_placement_monte_carlo(
        &self,
        demands: &[TrafficDemand],
        params: &DemandPlacementMonteCarloParams,
    ) -> NetGraphResult<MonteCarloResult> {
        let ctx = build_demand_context(self.network(), demands)?;
        let analysis_params = DemandPlacementParams {
            include_flow_details: params.include_flow_details,
            include_used_edges: params.include_used_edges,
        };
        self.run_monte_carlo_analysis(
            |network, excluded_nodes, excluded_links| {
                demand_placement_analysis(
                    network,
                    excluded_nodes,
                    excluded_links,
                    demands,
                    &analysis_params,
                    Some(&ctx),
                )
            },
            "demand_placement_analysis",
            params.iterations,
            params.parallelism,
            params.seed,
            params.store_failure_patterns,
        )
    }

    /// Component criticality under failures, with weighted per-component
    /// aggregation across unique patterns.
    pub fn run_sensitivity_monte_carlo(
        &self,
        params: &MaxFlowMonteCarloParams,
    ) -> NetGraphResult<SensitivityMonteCarloResult> {
        let ctx =
            build_maxflow_context(self.network(), &params.source, &params.sink, params.mode)?;
        let analysis_params = MaxFlowParams {
            source: params.source.clone(),
            sink: params.sink.clone(),
            mode: params.mode,
            shortest_path: params.shortest_path,
            require_capacity: params.require_capacity,
            flow_placement: params.flow_placement,
            include_flow_details: false,
            include_min_cut: false,
        };
        let outcome = self.run_monte_carlo_analysis(
            |network, excluded_nodes, excluded_links| {
                sensitivity_analysis(
                    network,
                    excluded_nodes,
                    excluded_links,
                    &analysis_params,
                    Some(&ctx),
                )
            },
            "sensitivity_analysis",
            params.iterations,
            params.parallelism,
            params.seed,
            params.store_failure_patterns,
        )?;

        let component_scores = aggregate_component_scores(&outcome.results);
        debug!(
            flows = component_scores.len(),
            "aggregated sensitivity component scores"
        );
        Ok(SensitivityMonteCarloResult {
            outcome,
            component_scores,
        })
    }
}

/// Weighted aggregation of per-component sensitivity scores:
/// `mean = sum(score_i * count_i) / sum(count_i)` with min/max/count.
pub fn aggregate_component_scores(
    results: &[FlowIterationResult],
) -> BTreeMap<String, BTreeMap<String, ComponentStats>> {
    struct Agg {
        weighted_sum: f64,
        count: usize,
        min: f64,
        max: f64,
    }
    let mut flow_aggregates: BTreeMap<String, BTreeMap<String, Agg>> = BTreeMap::new();

    for result in results {
        let count = result.occurrence_count;
        for entry in &result.flows {
            let flow_key = format!("{}->{}", entry.source, entry.destination);
            let scores = match entry.data.get("sensitivity").and_then(|v| v.as_object()) {
                Some(scores) => scores,
                None => continue,
            };
            let per_flow = flow_aggregates.entry(flow_key).or_default();
            for (component, score) in scores {
                let score = match score.as_f64() {
                    Some(score) => score,
                    None => continue,
                };
                let agg = per_flow.entry(component.clone()).or_insert(Agg {
                    weighted_sum: 0.0,
                    count: 0,
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                });
                agg.weighted_sum += score * count as f64;
                agg.count += count;
                agg.min = agg.min.min(score);
                agg.max = agg.max.max(score);
            }
        }
    }

    flow_aggregates
        .into_iter()
        .map(|(flow_key, components)| {
            let stats = components
                .into_iter()
                .filter(|(_, agg)| agg.count > 0)
                .map(|(component, agg)| {
                    (
                        component,
                        ComponentStats {
                            mean: agg.weighted_sum / agg.count as f64,
                            min: agg.min,
                            max: agg.max,
                            count: agg.count,
                        },
                    )
                })
                .collect();
            (flow_key, stats)
        })
        .collect()
}

/// Convenience for string-typed callers.
pub fn parse_flow_placement(value: &str) -> NetGraphResult<FlowPlacement> {
    value.parse()
}
