//! Prepared state for efficient repeated analysis.
//!
//! An [`AnalysisContext`] bundles the substrate built from a network
//! (optionally with pseudo-source/sink augmentations) and exposes the
//! max-flow, sensitivity, and shortest-path operations. Two usage
//! patterns:
//!
//! **Unbound**: flexible, specify source/sink per call; each call builds
//! a throw-away bound context under the hood:
//!
//! ```ignore
//! let ctx = AnalysisContext::from_network(&network)?;
//! let flows = ctx.max_flow(Some("^A$"), Some("^B$"), &opts, None, None)?;
//! ```
//!
//! **Bound**: source/sink patterns fixed at construction, pseudo edges
//! baked into the substrate; repeated calls reuse the graph and rebuild
//! only the O(|excluded|) masks:
//!
//! ```ignore
//! let ctx = AnalysisContext::from_network_bound(&network, "^dc/", "^edge/", Mode::Combine)?;
//! let baseline = ctx.max_flow(None, None, &opts, None, None)?;
//! let degraded = ctx.max_flow(None, None, &opts, None, Some(&failed_links))?;
//! ```
//!
//! The context is immutable after creation and safe to share across
//! worker threads with different exclusion sets.

use std::collections::{BTreeMap, BTreeSet};

use netgraph_algo::{
    k_shortest_paths as algo_ksp, max_flow as algo_max_flow, min_cut as algo_min_cut,
    sensitivity as algo_sensitivity, spf, EdgeSelection, FlowPlacement, KspOptions,
    MaxFlowOptions, SpfOptions,
};
use netgraph_core::{
    select_node_groups_by_path, AugmentationEdge, CoreGraph, EdgeId, EdgeRef, Mode, NetGraphError,
    NetGraphResult, Network, Node, NodeId, LARGE_CAPACITY,
};

use crate::path::Path;

/// Pair label key: `(source_label, sink_label)`.
pub type PairKey = (String, String);

/// Options shared by the flow-analysis operations.
#[derive(Debug, Clone, Copy)]
pub struct FlowAnalysisOptions {
    /// Restrict flow to minimum-cost paths (IP/IGP mode).
    pub shortest_path: bool,
    /// Capacity-aware path selection; `false` is cost-only semantics
    /// where saturated edges still attract traffic.
    pub require_capacity: bool,
    pub flow_placement: FlowPlacement,
}

impl Default for FlowAnalysisOptions {
    fn default() -> Self {
        Self {
            shortest_path: false,
            require_capacity: true,
            flow_placement: FlowPlacement::Proportional,
        }
    }
}

/// Detailed outcome of one (source, sink) max-flow evaluation.
#[derive(Debug, Clone, Default)]
pub struct MaxFlowResult {
    pub total_flow: f64,
    /// Placed volume per path-cost tier.
    pub cost_distribution: BTreeMap<i64, f64>,
    pub min_cut: Option<Vec<EdgeRef>>,
}

#[derive(Debug, Clone)]
struct BoundContext {
    source_path: String,
    sink_path: String,
    mode: Mode,
    /// Resolved pseudo endpoints per pair label.
    pairs: BTreeMap<PairKey, (NodeId, NodeId)>,
}

/// Immutable prepared state for network analysis.
#[derive(Debug)]
pub struct AnalysisContext<'n> {
    network: &'n Network,
    graph: CoreGraph,
    bound: Option<BoundContext>,
}

impl<'n> AnalysisContext<'n> {
    /// Unbound context without augmentations.
    pub fn from_network(network: &'n Network) -> NetGraphResult<Self> {
        Self::with_augmentations(network, &[])
    }

    /// Unbound context with caller-supplied augmentation edges (demand
    /// placement wires its pseudo nodes this way).
    pub fn with_augmentations(
        network: &'n Network,
        augmentations: &[AugmentationEdge],
    ) -> NetGraphResult<Self> {
        Ok(Self {
            network,
            graph: CoreGraph::from_network(network, augmentations)?,
            bound: None,
        })
    }

    /// Bound context: source/sink groups resolved now, pseudo edges baked
    /// into the substrate.
    pub fn from_network_bound(
        network: &'n Network,
        source: &str,
        sink: &str,
        mode: Mode,
    ) -> NetGraphResult<Self> {
        let (augmentations, pair_names) =
            build_pseudo_node_augmentations(network, source, sink, mode)?;
        let graph = CoreGraph::from_network(network, &augmentations)?;
        let mut pairs = BTreeMap::new();
        for (pair, (pseudo_src, pseudo_snk)) in pair_names {
            let src_id = graph.node_id(&pseudo_src).ok_or_else(|| {
                NetGraphError::Config(format!("pseudo node '{pseudo_src}' missing from graph"))
            })?;
            let snk_id = graph.node_id(&pseudo_snk).ok_or_else(|| {
                NetGraphError::Config(format!("pseudo node '{pseudo_snk}' missing from graph"))
            })?;
            pairs.insert(pair, (src_id, snk_id));
        }
        Ok(Self {
            network,
            graph,
            bound: Some(BoundContext {
                source_path: source.to_string(),
                sink_path: sink.to_string(),
                mode,
                pairs,
            }),
        })
    }

    pub fn network(&self) -> &'n Network {
        self.network
    }

    pub fn graph(&self) -> &CoreGraph {
        &self.graph
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn node_count(&self) -> usize {
        self.graph.num_nodes()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.num_edges()
    }

    pub fn build_node_mask(&self, excluded_nodes: Option<&BTreeSet<String>>) -> Vec<bool> {
        self.graph.build_node_mask(excluded_nodes)
    }

    pub fn build_edge_mask(&self, excluded_links: Option<&BTreeSet<String>>) -> Vec<bool> {
        self.graph.build_edge_mask(excluded_links)
    }

    // ── Flow analysis ────────────────────────────────────────────────

    /// Maximum flow per (source_label, sink_label) pair.
    pub fn max_flow(
        &self,
        source: Option<&str>,
        sink: Option<&str>,
        mode: Mode,
        opts: &FlowAnalysisOptions,
        excluded_nodes: Option<&BTreeSet<String>>,
        excluded_links: Option<&BTreeSet<String>>,
    ) -> NetGraphResult<BTreeMap<PairKey, f64>> {
        let detailed = self.max_flow_detailed(
            source,
            sink,
            mode,
            opts,
            excluded_nodes,
            excluded_links,
            false,
        )?;
        Ok(detailed
            .into_iter()
            .map(|(pair, result)| (pair, result.total_flow))
            .collect())
    }

    /// Maximum flow with cost distribution and optional min-cut.
    #[allow(clippy::too_many_arguments)]
    pub fn max_flow_detailed(
        &self,
        source: Option<&str>,
        sink: Option<&str>,
        mode: Mode,
        opts: &FlowAnalysisOptions,
        excluded_nodes: Option<&BTreeSet<String>>,
        excluded_links: Option<&BTreeSet<String>>,
        include_min_cut: bool,
    ) -> NetGraphResult<BTreeMap<PairKey, MaxFlowResult>> {
        match &self.bound {
            Some(_) => {
                ensure_unspecified(source, sink)?;
                self.max_flow_detailed_bound(opts, excluded_nodes, excluded_links, include_min_cut)
            }
            None => {
                let (source, sink) = require_patterns(source, sink)?;
                let ctx = AnalysisContext::from_network_bound(self.network, source, sink, mode)?;
                ctx.max_flow_detailed_bound(opts, excluded_nodes, excluded_links, include_min_cut)
            }
        }
    }

    fn max_flow_detailed_bound(
        &self,
        opts: &FlowAnalysisOptions,
        excluded_nodes: Option<&BTreeSet<String>>,
        excluded_links: Option<&BTreeSet<String>>,
        include_min_cut: bool,
    ) -> NetGraphResult<BTreeMap<PairKey, MaxFlowResult>> {
        let bound = self.bound.as_ref().ok_or_else(|| {
            NetGraphError::Config("max_flow_detailed_bound requires a bound context".into())
        })?;
        let node_mask = self.build_node_mask(excluded_nodes);
        let edge_mask = self.build_edge_mask(excluded_links);
        let mf_opts = MaxFlowOptions {
            placement: opts.flow_placement,
            shortest_path: opts.shortest_path,
            require_capacity: opts.require_capacity,
        };

        let mut results = BTreeMap::new();
        for (pair, &(src_id, snk_id)) in &bound.pairs {
            let computation =
                algo_max_flow(&self.graph, src_id, snk_id, &mf_opts, &node_mask, &edge_mask)?;
            let min_cut = include_min_cut.then(|| {
                algo_min_cut(
                    &self.graph,
                    &computation.flow_graph,
                    src_id,
                    &node_mask,
                    &edge_mask,
                )
            });
            results.insert(
                pair.clone(),
                MaxFlowResult {
                    total_flow: computation.total,
                    cost_distribution: computation.cost_distribution,
                    min_cut,
                },
            );
        }
        self.fill_missing_pairs(bound, &mut results, MaxFlowResult::default)?;
        Ok(results)
    }

    /// Per-edge flow reduction under single-edge removal, keyed
    /// `link_id:direction` per pair.
    #[allow(clippy::too_many_arguments)]
    pub fn sensitivity(
        &self,
        source: Option<&str>,
        sink: Option<&str>,
        mode: Mode,
        opts: &FlowAnalysisOptions,
        excluded_nodes: Option<&BTreeSet<String>>,
        excluded_links: Option<&BTreeSet<String>>,
    ) -> NetGraphResult<BTreeMap<PairKey, BTreeMap<String, f64>>> {
        match &self.bound {
            Some(_) => {
                ensure_unspecified(source, sink)?;
                self.sensitivity_bound(opts, excluded_nodes, excluded_links)
            }
            None => {
                let (source, sink) = require_patterns(source, sink)?;
                let ctx = AnalysisContext::from_network_bound(self.network, source, sink, mode)?;
                ctx.sensitivity_bound(opts, excluded_nodes, excluded_links)
            }
        }
    }

    fn sensitivity_bound(
        &self,
        opts: &FlowAnalysisOptions,
        excluded_nodes: Option<&BTreeSet<String>>,
        excluded_links: Option<&BTreeSet<String>>,
    ) -> NetGraphResult<BTreeMap<PairKey, BTreeMap<String, f64>>> {
        let bound = self.bound.as_ref().ok_or_else(|| {
            NetGraphError::Config("sensitivity_bound requires a bound context".into())
        })?;
        let node_mask = self.build_node_mask(excluded_nodes);
        let edge_mask = self.build_edge_mask(excluded_links);
        let mf_opts = MaxFlowOptions {
            placement: opts.flow_placement,
            shortest_path: opts.shortest_path,
            require_capacity: opts.require_capacity,
        };

        let mut results = BTreeMap::new();
        for (pair, &(src_id, snk_id)) in &bound.pairs {
            let scores = algo_sensitivity(
                &self.graph,
                src_id,
                snk_id,
                &mf_opts,
                &node_mask,
                &edge_mask,
            )?;
            let map: BTreeMap<String, f64> = scores
                .into_iter()
                .map(|(edge_ref, delta)| (edge_ref.to_string(), delta))
                .collect();
            results.insert(pair.clone(), map);
        }
        self.fill_missing_pairs(bound, &mut results, BTreeMap::new)?;
        Ok(results)
    }

    /// Pairs skipped at build time (overlapping or empty groups) still
    /// appear in results with a conventional no-flow default.
    fn fill_missing_pairs<T>(
        &self,
        bound: &BoundContext,
        results: &mut BTreeMap<PairKey, T>,
        default: impl Fn() -> T,
    ) -> NetGraphResult<()> {
        let src_groups = select_node_groups_by_path(self.network, &bound.source_path)?;
        let snk_groups = select_node_groups_by_path(self.network, &bound.sink_path)?;
        match bound.mode {
            Mode::Combine => {
                let pair = (
                    combined_label(&src_groups),
                    combined_label(&snk_groups),
                );
                results.entry(pair).or_insert_with(&default);
            }
            Mode::Pairwise => {
                for src_label in src_groups.keys() {
                    for snk_label in snk_groups.keys() {
                        results
                            .entry((src_label.clone(), snk_label.clone()))
                            .or_insert_with(&default);
                    }
                }
            }
        }
        Ok(())
    }

    // ── Path analysis ────────────────────────────────────────────────

    /// Minimal path cost per pair; infinity when no path exists or the
    /// groups overlap.
    pub fn shortest_path_cost(
        &self,
        source: Option<&str>,
        sink: Option<&str>,
        mode: Mode,
        edge_select: EdgeSelection,
        excluded_nodes: Option<&BTreeSet<String>>,
        excluded_links: Option<&BTreeSet<String>>,
    ) -> NetGraphResult<BTreeMap<PairKey, f64>> {
        let (source, sink, mode) = self.resolve_patterns(source, sink, mode)?;
        let (src_groups, snk_groups) = self.select_both(&source, &sink)?;
        let node_mask = self.build_node_mask(excluded_nodes);
        let edge_mask = self.build_edge_mask(excluded_links);

        let best_cost = |src_names: &[String], snk_names: &[String]| -> f64 {
            if src_names.is_empty() || snk_names.is_empty() || overlaps(src_names, snk_names) {
                return f64::INFINITY;
            }
            let mut best = f64::INFINITY;
            for src_name in src_names {
                let src_id = match self.graph.node_id(src_name) {
                    Some(id) => id,
                    None => continue,
                };
                let (dists, _) = spf(
                    &self.graph,
                    src_id,
                    edge_select,
                    SpfOptions {
                        node_mask: Some(&node_mask),
                        edge_mask: Some(&edge_mask),
                        multipath: true,
                        ..Default::default()
                    },
                );
                for snk_name in snk_names {
                    if let Some(snk_id) = self.graph.node_id(snk_name) {
                        best = best.min(dists[snk_id]);
                    }
                }
            }
            best
        };

        self.per_group(mode, &src_groups, &snk_groups, excluded_nodes, |s, t| {
            Ok(best_cost(s, t))
        })
    }

    /// Concrete minimum-cost paths per pair.
    #[allow(clippy::too_many_arguments)]
    pub fn shortest_paths(
        &self,
        source: Option<&str>,
        sink: Option<&str>,
        mode: Mode,
        edge_select: EdgeSelection,
        split_parallel_edges: bool,
        excluded_nodes: Option<&BTreeSet<String>>,
        excluded_links: Option<&BTreeSet<String>>,
    ) -> NetGraphResult<BTreeMap<PairKey, Vec<Path>>> {
        let (source, sink, mode) = self.resolve_patterns(source, sink, mode)?;
        let (src_groups, snk_groups) = self.select_both(&source, &sink)?;
        let node_mask = self.build_node_mask(excluded_nodes);
        let edge_mask = self.build_edge_mask(excluded_links);

        let best_paths = |src_names: &[String], snk_names: &[String]| -> Vec<Path> {
            if src_names.is_empty() || snk_names.is_empty() || overlaps(src_names, snk_names) {
                return Vec::new();
            }
            let mut best_cost = f64::INFINITY;
            let mut best: Vec<Path> = Vec::new();
            for src_name in src_names {
                let src_id = match self.graph.node_id(src_name) {
                    Some(id) => id,
                    None => continue,
                };
                let (dists, dag) = spf(
                    &self.graph,
                    src_id,
                    edge_select,
                    SpfOptions {
                        node_mask: Some(&node_mask),
                        edge_mask: Some(&edge_mask),
                        multipath: true,
                        ..Default::default()
                    },
                );
                for snk_name in snk_names {
                    let snk_id = match self.graph.node_id(snk_name) {
                        Some(id) => id,
                        None => continue,
                    };
                    let cost = dists[snk_id];
                    if cost.is_infinite() || cost > best_cost {
                        continue;
                    }
                    let resolved = dag.resolve_to_paths(
                        &self.graph,
                        src_id,
                        snk_id,
                        split_parallel_edges,
                    );
                    let paths = resolved
                        .into_iter()
                        .map(|id_path| self.id_path_to_path(&id_path, cost));
                    if cost < best_cost {
                        best_cost = cost;
                        best = paths.collect();
                    } else {
                        best.extend(paths);
                    }
                }
            }
            best.sort();
            best.dedup();
            best
        };

        self.per_group(mode, &src_groups, &snk_groups, excluded_nodes, |s, t| {
            Ok(best_paths(s, t))
        })
    }

    /// Up to `max_k` shortest paths per pair (Yen-style enumeration).
    #[allow(clippy::too_many_arguments)]
    pub fn k_shortest_paths(
        &self,
        source: Option<&str>,
        sink: Option<&str>,
        mode: Mode,
        max_k: usize,
        edge_select: EdgeSelection,
        max_path_cost: f64,
        max_path_cost_factor: Option<f64>,
        split_parallel_edges: bool,
        excluded_nodes: Option<&BTreeSet<String>>,
        excluded_links: Option<&BTreeSet<String>>,
    ) -> NetGraphResult<BTreeMap<PairKey, Vec<Path>>> {
        let (source, sink, mode) = self.resolve_patterns(source, sink, mode)?;
        let (src_groups, snk_groups) = self.select_both(&source, &sink)?;
        let node_mask = self.build_node_mask(excluded_nodes);
        let edge_mask = self.build_edge_mask(excluded_links);

        let ksp_paths = |src_names: &[String], snk_names: &[String]| -> Vec<Path> {
            if src_names.is_empty() || snk_names.is_empty() || overlaps(src_names, snk_names) {
                return Vec::new();
            }
            // Best pair by plain SPF cost anchors the enumeration.
            let mut best_pair: Option<(NodeId, NodeId)> = None;
            let mut best_cost = f64::INFINITY;
            for src_name in src_names {
                let src_id = match self.graph.node_id(src_name) {
                    Some(id) => id,
                    None => continue,
                };
                let (dists, _) = spf(
                    &self.graph,
                    src_id,
                    edge_select,
                    SpfOptions {
                        node_mask: Some(&node_mask),
                        edge_mask: Some(&edge_mask),
                        multipath: true,
                        ..Default::default()
                    },
                );
                for snk_name in snk_names {
                    if let Some(snk_id) = self.graph.node_id(snk_name) {
                        if dists[snk_id] < best_cost {
                            best_cost = dists[snk_id];
                            best_pair = Some((src_id, snk_id));
                        }
                    }
                }
            }
            let (src_id, snk_id) = match best_pair {
                Some(pair) => pair,
                None => return Vec::new(),
            };

            let solutions = algo_ksp(
                &self.graph,
                src_id,
                snk_id,
                &KspOptions {
                    k: max_k,
                    max_cost: max_path_cost,
                    max_cost_factor: max_path_cost_factor,
                    selection: edge_select,
                    multipath: true,
                },
                Some(&node_mask),
                Some(&edge_mask),
            );

            let mut paths: Vec<Path> = Vec::new();
            for (dists, dag) in solutions {
                let cost = dists[snk_id];
                if cost.is_infinite() || cost > max_path_cost {
                    continue;
                }
                for id_path in
                    dag.resolve_to_paths(&self.graph, src_id, snk_id, split_parallel_edges)
                {
                    paths.push(self.id_path_to_path(&id_path, cost));
                    if paths.len() >= max_k {
                        break;
                    }
                }
                if paths.len() >= max_k {
                    break;
                }
            }
            paths.sort();
            paths.dedup();
            paths.truncate(max_k);
            paths
        };

        self.per_group(mode, &src_groups, &snk_groups, excluded_nodes, |s, t| {
            Ok(ksp_paths(s, t))
        })
    }

    // ── Internal helpers ─────────────────────────────────────────────

    fn resolve_patterns(
        &self,
        source: Option<&str>,
        sink: Option<&str>,
        mode: Mode,
    ) -> NetGraphResult<(String, String, Mode)> {
        match &self.bound {
            Some(bound) => {
                ensure_unspecified(source, sink)?;
                Ok((
                    bound.source_path.clone(),
                    bound.sink_path.clone(),
                    bound.mode,
                ))
            }
            None => {
                let (source, sink) = require_patterns(source, sink)?;
                Ok((source.to_string(), sink.to_string(), mode))
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn select_both(
        &self,
        source: &str,
        sink: &str,
    ) -> NetGraphResult<(
        BTreeMap<String, Vec<&'n Node>>,
        BTreeMap<String, Vec<&'n Node>>,
    )> {
        let src_groups = select_node_groups_by_path(self.network, source)?;
        if src_groups.is_empty() {
            return Err(NetGraphError::Selection(format!(
                "no source nodes found matching '{source}'"
            )));
        }
        let snk_groups = select_node_groups_by_path(self.network, sink)?;
        if snk_groups.is_empty() {
            return Err(NetGraphError::Selection(format!(
                "no sink nodes found matching '{sink}'"
            )));
        }
        Ok((src_groups, snk_groups))
    }

    /// Apply `eval` to active node-name lists per combine/pairwise group
    /// semantics.
    fn per_group<T>(
        &self,
        mode: Mode,
        src_groups: &BTreeMap<String, Vec<&Node>>,
        snk_groups: &BTreeMap<String, Vec<&Node>>,
        excluded_nodes: Option<&BTreeSet<String>>,
        eval: impl Fn(&[String], &[String]) -> NetGraphResult<T>,
    ) -> NetGraphResult<BTreeMap<PairKey, T>> {
        let mut results = BTreeMap::new();
        match mode {
            Mode::Combine => {
                let src_names = active_names_from_groups(src_groups, excluded_nodes);
                let snk_names = active_names_from_groups(snk_groups, excluded_nodes);
                let pair = (combined_label(src_groups), combined_label(snk_groups));
                results.insert(pair, eval(&src_names, &snk_names)?);
            }
            Mode::Pairwise => {
                for (src_label, src_nodes) in src_groups {
                    for (snk_label, snk_nodes) in snk_groups {
                        let src_names = active_names(src_nodes, excluded_nodes);
                        let snk_names = active_names(snk_nodes, excluded_nodes);
                        results.insert(
                            (src_label.clone(), snk_label.clone()),
                            eval(&src_names, &snk_names)?,
                        );
                    }
                }
            }
        }
        Ok(results)
    }

    fn id_path_to_path(&self, id_path: &[(NodeId, Vec<EdgeId>)], cost: f64) -> Path {
        let elements = id_path
            .iter()
            .map(|(node_id, edges)| {
                let refs: Vec<EdgeRef> = edges
                    .iter()
                    .filter_map(|&edge| self.graph.edge_ref(edge))
                    .collect();
                (self.graph.node_name(*node_id).to_string(), refs)
            })
            .collect();
        Path::new(elements, cost)
    }
}

fn ensure_unspecified(source: Option<&str>, sink: Option<&str>) -> NetGraphResult<()> {
    if source.is_some() || sink.is_some() {
        return Err(NetGraphError::Parameter(
            "bound context: source/sink already configured; create a new context for different groups"
                .into(),
        ));
    }
    Ok(())
}

fn require_patterns<'a>(
    source: Option<&'a str>,
    sink: Option<&'a str>,
) -> NetGraphResult<(&'a str, &'a str)> {
    match (source, sink) {
        (Some(source), Some(sink)) => Ok((source, sink)),
        _ => Err(NetGraphError::Parameter(
            "unbound context: source and sink are required".into(),
        )),
    }
}

fn combined_label(groups: &BTreeMap<String, Vec<&Node>>) -> String {
    groups.keys().cloned().collect::<Vec<_>>().join("|")
}

fn active_names(nodes: &[&Node], excluded: Option<&BTreeSet<String>>) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| !node.disabled)
        .filter(|node| excluded.map(|e| !e.contains(&node.name)).unwrap_or(true))
        .map(|node| node.name.clone())
        .collect()
}

fn active_names_from_groups(
    groups: &BTreeMap<String, Vec<&Node>>,
    excluded: Option<&BTreeSet<String>>,
) -> Vec<String> {
    groups
        .values()
        .flat_map(|nodes| active_names(nodes, excluded))
        .collect()
}

fn overlaps(a: &[String], b: &[String]) -> bool {
    let set: BTreeSet<&String> = a.iter().collect();
    b.iter().any(|name| set.contains(name))
}

/// Build pseudo source/sink augmentations for a bound context.
///
/// Combine mode aggregates all active sources behind `__PSEUDO_SRC__` and
/// sinks behind `__PSEUDO_SNK__`; pairwise creates per-pair pseudo nodes
/// suffixed with the group labels. Pairs with overlapping or empty
/// memberships are skipped and later reported with a no-flow default.
#[allow(clippy::type_complexity)]
fn build_pseudo_node_augmentations(
    network: &Network,
    source_path: &str,
    sink_path: &str,
    mode: Mode,
) -> NetGraphResult<(
    Vec<AugmentationEdge>,
    BTreeMap<PairKey, (String, String)>,
)> {
    let src_groups = select_node_groups_by_path(network, source_path)?;
    if src_groups.is_empty() {
        return Err(NetGraphError::Selection(format!(
            "no source nodes found matching '{source_path}'"
        )));
    }
    let snk_groups = select_node_groups_by_path(network, sink_path)?;
    if snk_groups.is_empty() {
        return Err(NetGraphError::Selection(format!(
            "no sink nodes found matching '{sink_path}'"
        )));
    }

    let mut augmentations = Vec::new();
    let mut pairs = BTreeMap::new();

    match mode {
        Mode::Combine => {
            let src_names = active_names_from_groups(&src_groups, None);
            let snk_names = active_names_from_groups(&snk_groups, None);
            let pair = (combined_label(&src_groups), combined_label(&snk_groups));
            if !src_names.is_empty() && !snk_names.is_empty() && !overlaps(&src_names, &snk_names)
            {
                let pseudo_src = "__PSEUDO_SRC__".to_string();
                let pseudo_snk = "__PSEUDO_SNK__".to_string();
                for name in &src_names {
                    augmentations.push(AugmentationEdge::new(
                        pseudo_src.clone(),
                        name.clone(),
                        LARGE_CAPACITY,
                        0,
                    ));
                }
                for name in &snk_names {
                    augmentations.push(AugmentationEdge::new(
                        name.clone(),
                        pseudo_snk.clone(),
                        LARGE_CAPACITY,
                        0,
                    ));
                }
                pairs.insert(pair, (pseudo_src, pseudo_snk));
            }
        }
        Mode::Pairwise => {
            for (src_label, src_nodes) in &src_groups {
                for (snk_label, snk_nodes) in &snk_groups {
                    let src_names = active_names(src_nodes, None);
                    let snk_names = active_names(snk_nodes, None);
                    if src_names.is_empty()
                        || snk_names.is_empty()
                        || overlaps(&src_names, &snk_names)
                    {
                        continue;
                    }
                    let pseudo_src = format!("__PSEUDO_SRC_{src_label}__");
                    let pseudo_snk = format!("__PSEUDO_SNK_{snk_label}__");
                    for name in &src_names {
                        augmentations.push(AugmentationEdge::new(
                            pseudo_src.clone(),
                            name.clone(),
                            LARGE_CAPACITY,
                            0,
                        ));
                    }
                    for name in &snk_names {
                        augmentations.push(AugmentationEdge::new(
                            name.clone(),
                            pseudo_snk.clone(),
                            LARGE_CAPACITY,
                            0,
                        ));
                    }
                    pairs.insert(
                        (src_label.clone(), snk_label.clone()),
                        (pseudo_src, pseudo_snk),
                    );
                }
            }
        }
    }

    Ok((augmentations, pairs))
}
