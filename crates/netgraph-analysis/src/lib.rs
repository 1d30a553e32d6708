//! # netgraph-analysis: Prepared Analysis Pipeline
//!
//! The analysis layer over [`netgraph_core`] and [`netgraph_algo`]:
//!
//! - [`AnalysisContext`]: prepared (optionally bound) state exposing
//!   max-flow, sensitivity, and shortest-path operations with per-call
//!   exclusion sets
//! - [`expand_demands`]: declarative demands into concrete placement
//!   units plus pseudo-node augmentations
//! - [`place_demands`]: priority-ordered placement with per-source DAG
//!   caching and flow-policy delegation
//! - analysis callables ([`max_flow_analysis`],
//!   [`demand_placement_analysis`], [`sensitivity_analysis`]) consumed by
//!   the Monte Carlo failure manager
//! - [`MsdSearch`]: bracketed bisection for the maximum supported demand
//!   multiplier
//! - validated result containers ([`FlowEntry`], [`FlowSummary`],
//!   [`FlowIterationResult`]) and the step-scoped [`Results`] store

pub mod context;
pub mod demand;
pub mod functions;
pub mod msd;
pub mod path;
pub mod placement;
pub mod results;
pub mod store;

pub use context::{AnalysisContext, FlowAnalysisOptions, MaxFlowResult, PairKey};
pub use demand::{expand_demands, DemandExpansion, ExpandedDemand};
pub use functions::{
    build_demand_context, build_maxflow_context, demand_placement_analysis, max_flow_analysis,
    sensitivity_analysis, DemandPlacementParams, MaxFlowParams,
};
pub use msd::{MsdResult, MsdSearch, ProbeRecord};
pub use path::Path;
pub use placement::{
    place_demands, resolve_demand_ids, PlacementEntry, PlacementOptions, PlacementResult,
    PlacementSummary,
};
pub use results::{FailureState, FlowEntry, FlowIterationResult, FlowSummary};
pub use store::{Results, StepMetadata};
