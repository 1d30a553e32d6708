//! # netgraph-algo: Flow Algorithms for Capacity Analysis
//!
//! Path and flow algorithms over the [`netgraph_core`] substrate:
//!
//! - [`spf`]: single-source shortest-path DAGs with configurable edge
//!   selection ([`EdgeSelection`]) and multipath recording
//! - [`k_shortest_paths`]: Yen-style deviation enumeration with absolute
//!   and relative cost ceilings
//! - [`FlowGraph`]: residual state plus proportional (WCMP) and
//!   equal-balanced (ECMP) placement primitives
//! - [`max_flow`] / [`min_cut`] / [`sensitivity`]: iterative max-flow with
//!   residual recomputation, cut extraction, and per-edge criticality
//! - [`FlowPolicy`]: named presets composing the primitives (ECMP, WCMP,
//!   TE with unlimited or fixed LSP counts)
//!
//! All algorithms take node/edge inclusion masks; the substrate itself is
//! never mutated. Determinism: tie-breaking is positional, iteration
//! orders are index-based, and identical inputs produce identical outputs.

pub mod flow;
pub mod ksp;
pub mod maxflow;
pub mod policy;
pub mod spf;

pub use flow::{FlowGraph, FlowIndex, FlowPlacement};
pub use ksp::{k_shortest_paths, KspOptions, KspSolution};
pub use maxflow::{max_flow, min_cut, sensitivity, MaxFlowComputation, MaxFlowOptions};
pub use policy::{
    FlowPolicy, FlowPolicyConfig, FlowPolicyPreset, PolicyFlow, PolicyPlacement, POLICY_ITER_CAP,
};
pub use spf::{spf, EdgeSelection, EdgeTieBreak, PredDag, SpfOptions, MIN_CAP, MIN_FLOW};
