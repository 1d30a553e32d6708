//! # netgraph-scenarios: Declarative Analysis Inputs
//!
//! The declarative input layer for NetGraph analyses:
//!
//! - [`TrafficDemand`] / [`DemandSet`]: traffic demand specifications
//!   with stable identifiers and selector-based endpoints
//! - [`FailurePolicy`] / [`FailurePolicySet`]: weighted failure modes
//!   with attribute-matched, probabilistically selected rules
//! - [`compute_exclusions`]: deterministic per-iteration exclusion
//!   generation (one seeded RNG per iteration, shared across rules)
//!
//! Documents load from YAML or JSON with extension sniffing. Inputs are
//! validated at load time; analyses treat them as pre-validated.

pub mod demand;
pub mod generate;
pub mod policy;

pub use demand::{load_demand_set_from_path, DemandSet, GroupMode, TrafficDemand};
pub use generate::{
    compute_exclusions, EntityAttrs, Exclusions, ExpansionRecord, FailureTrace, SelectionRecord,
};
pub use policy::{
    load_failure_policy_set_from_path, FailureMode, FailurePolicy, FailurePolicySet, FailureRule,
    RuleScope, SelectionMode,
};
