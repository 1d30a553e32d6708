//! # netgraph-batch: Monte Carlo Failure Analysis
//!
//! The execution layer for failure analysis:
//!
//! - [`FailureManager`]: baseline + failure iterations with pattern
//!   deduplication, rayon worker pools, and result enrichment
//!   (failure ids, states, traces, occurrence counts)
//! - convenience wrappers for max-flow, demand-placement, and
//!   sensitivity Monte Carlo runs
//! - optional per-worker profiling via the `NGRAPH_PROFILE_DIR`
//!   environment variable
//!
//! The shared network, policies, and any pre-built analysis context are
//! read-only during a run; workers own nothing but their exclusion sets
//! and results. Identical inputs and seeds produce identical outcomes at
//! any parallelism level.

pub mod manager;
pub mod profile;
pub mod wrappers;

pub use manager::{
    failure_id, FailureManager, MonteCarloMetadata, MonteCarloResult, Parallelism,
};
pub use profile::PROFILE_DIR_ENV;
pub use wrappers::{
    aggregate_component_scores, parse_flow_placement, ComponentStats,
    DemandPlacementMonteCarloParams, MaxFlowMonteCarloParams, SensitivityMonteCarloResult,
};
