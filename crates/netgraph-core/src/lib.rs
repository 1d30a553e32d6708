//! # netgraph-core: Network Modeling Core
//!
//! Provides the fundamental data structures for network capacity analysis:
//! the user-facing [`Network`] topology model, hierarchical risk groups,
//! attribute-based node selectors, and the immutable [`CoreGraph`]
//! substrate the flow algorithms run on.
//!
//! ## Design Philosophy
//!
//! The user-facing model and the algorithmic substrate are distinct:
//!
//! - **[`Network`]**: name-keyed maps of nodes, directed capacitated
//!   links, and risk groups. Plain values, never mutated by analyses.
//! - **[`CoreGraph`]**: a contiguous-id, array-of-structs view derived
//!   from the network. Every link contributes a forward and a reverse
//!   edge; pseudo nodes and augmentation edges support multi-source /
//!   multi-sink aggregation.
//! - **Masks**: failures and per-call exclusions are boolean inclusion
//!   masks built in O(|excluded| + |disabled|); the substrate itself is
//!   never rebuilt or mutated for an exclusion.
//!
//! This split keeps repeated analysis cheap: build the substrate once,
//! rebuild only small masks per failure iteration.
//!
//! ## Quick Start
//!
//! ```rust
//! use netgraph_core::{CoreGraph, Link, Network, Node};
//!
//! let mut network = Network::new();
//! network.add_node(Node::new("A"));
//! network.add_node(Node::new("B"));
//! network.add_link(Link::new("A", "B").with_id("A-B").with_capacity(10.0));
//! network.validate().unwrap();
//!
//! let graph = CoreGraph::from_network(&network, &[]).unwrap();
//! assert_eq!(graph.num_nodes(), 2);
//! assert_eq!(graph.num_edges(), 2); // forward + reverse
//! ```
//!
//! ## Modules
//!
//! - [`model`] - Network, nodes, links, risk groups, validation
//! - [`graph`] - The [`CoreGraph`] substrate, edge identity, masks
//! - [`select`] - Selectors, attribute conditions, grouped node selection
//! - [`error`] - Unified [`NetGraphError`] type

use serde::{Deserialize, Serialize};

pub mod error;
pub mod graph;
pub mod model;
pub mod select;
pub mod utils;

pub use error::{NetGraphError, NetGraphResult};
pub use graph::{
    AugmentationEdge, CoreGraph, Direction, EdgeId, EdgeRef, NodeId, EXT_NONE, LARGE_CAPACITY,
};
pub use model::{AttrMap, Link, Network, NetworkStats, Node, RiskGroup};
pub use select::{
    flatten_link_attrs, flatten_node_attrs, flatten_risk_group_attrs, match_entity_ids,
    select_node_groups_by_path, select_nodes, Condition, ConditionOp, FlatAttrs, Logic,
    MatchSpec, NodeSelector, SelectorSpec,
};
pub use utils::new_base64_uuid;

/// Group pairing semantics for multi-node sources and sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Union all source matches into one logical source (and sinks into
    /// one logical sink) behind pseudo nodes.
    Combine,
    /// Iterate every (source group, sink group) pair independently.
    Pairwise,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Combine => "combine",
            Mode::Pairwise => "pairwise",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = NetGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "combine" => Ok(Mode::Combine),
            "pairwise" => Ok(Mode::Pairwise),
            other => Err(NetGraphError::Parameter(format!(
                "invalid mode '{other}', expected 'combine' or 'pairwise'"
            ))),
        }
    }
}
