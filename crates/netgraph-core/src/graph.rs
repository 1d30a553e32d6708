//! Graph substrate: the indexed array representation the algorithms run on.
//!
//! A [`CoreGraph`] is built once from a [`Network`] plus optional
//! augmentation edges and is immutable afterwards. Nodes and edges live in
//! a contiguous integer id space:
//!
//! - node ids: sorted real node names first, then sorted pseudo names
//!   inferred from augmentations;
//! - edge ids: links in sorted link-id order, forward edge before reverse,
//!   augmentation edges appended last in the order supplied.
//!
//! Each edge carries an external id encoding `(link_index << 1) | dir_bit`;
//! augmentation edges use the sentinel `-1` and never surface at the API
//! boundary. Exclusions never mutate the substrate: they are expressed as
//! boolean inclusion masks built in O(|excluded| + |disabled|).

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NetGraphError, NetGraphResult};
use crate::model::Network;

/// Conventionally large capacity for pseudo edges. Finite so residual
/// arithmetic never sees infinities.
pub const LARGE_CAPACITY: f64 = 1e15;

/// External edge id sentinel for augmentation edges.
pub const EXT_NONE: i64 = -1;

/// Node index into the substrate arrays.
pub type NodeId = usize;

/// Edge index into the substrate arrays.
pub type EdgeId = usize;

/// Direction of an edge relative to its defining link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Fwd,
    Rev,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Fwd => write!(f, "fwd"),
            Direction::Rev => write!(f, "rev"),
        }
    }
}

/// Scenario-level identity of a substrate edge: the owning link and the
/// direction. This is the only edge identity exposed at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeRef {
    pub link_id: String,
    pub direction: Direction,
}

impl EdgeRef {
    pub fn new(link_id: impl Into<String>, direction: Direction) -> Self {
        Self {
            link_id: link_id.into(),
            direction,
        }
    }
}

impl fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.link_id, self.direction)
    }
}

/// Extra unidirectional edge spliced into the substrate at build time.
///
/// Endpoints that do not name real network nodes become pseudo nodes.
/// Augmentations are bound to the context they were built for; contexts
/// with different demand sets must not share them.
#[derive(Debug, Clone)]
pub struct AugmentationEdge {
    pub source: String,
    pub target: String,
    pub capacity: f64,
    pub cost: i64,
}

impl AugmentationEdge {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        capacity: f64,
        cost: i64,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            capacity,
            cost,
        }
    }
}

/// Immutable array-of-structs topology the flow algorithms operate on.
#[derive(Debug, Clone)]
pub struct CoreGraph {
    node_names: Vec<String>,
    node_id_of: HashMap<String, NodeId>,
    num_real_nodes: usize,

    src: Vec<NodeId>,
    dst: Vec<NodeId>,
    capacity: Vec<f64>,
    cost: Vec<i64>,
    ext_edge_id: Vec<i64>,

    link_ids: Vec<String>,

    // CSR out-adjacency; per node, edge ids sorted by (dst, edge id) so
    // parallel edges to the same neighbour are contiguous.
    out_offsets: Vec<usize>,
    out_edges: Vec<EdgeId>,

    disabled_node_ids: Vec<NodeId>,
    disabled_link_ids: BTreeSet<String>,
    link_id_to_edge_indices: HashMap<String, Vec<EdgeId>>,
}

impl CoreGraph {
    /// Build the substrate from a network and optional augmentations.
    ///
    /// Deterministic: two builds of the same inputs produce identical
    /// substrates (node ordering, edge ordering, adjacency layout).
    pub fn from_network(
        network: &Network,
        augmentations: &[AugmentationEdge],
    ) -> NetGraphResult<Self> {
        // Real node ids in sorted-name order; BTreeMap iteration is sorted.
        let real_names: Vec<String> = network.nodes.keys().cloned().collect();

        // Pseudo nodes inferred from augmentation endpoints, sorted.
        let mut pseudo_names: BTreeSet<String> = BTreeSet::new();
        for aug in augmentations {
            if !network.nodes.contains_key(&aug.source) {
                pseudo_names.insert(aug.source.clone());
            }
            if !network.nodes.contains_key(&aug.target) {
                pseudo_names.insert(aug.target.clone());
            }
        }

        let num_real_nodes = real_names.len();
        let mut node_names = real_names;
        node_names.extend(pseudo_names.into_iter());
        let node_id_of: HashMap<String, NodeId> = node_names
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id))
            .collect();

        let link_ids: Vec<String> = network.links.keys().cloned().collect();
        let link_index_of: HashMap<&str, usize> = link_ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();

        let num_edges = link_ids.len() * 2 + augmentations.len();
        let mut src = Vec::with_capacity(num_edges);
        let mut dst = Vec::with_capacity(num_edges);
        let mut capacity = Vec::with_capacity(num_edges);
        let mut cost = Vec::with_capacity(num_edges);
        let mut ext_edge_id = Vec::with_capacity(num_edges);

        for link_id in &link_ids {
            let link = &network.links[link_id];
            let link_idx = link_index_of[link_id.as_str()] as i64;
            let src_id = *node_id_of.get(&link.source).ok_or_else(|| {
                NetGraphError::Config(format!(
                    "link '{}' references undefined node '{}'",
                    link_id, link.source
                ))
            })?;
            let dst_id = *node_id_of.get(&link.target).ok_or_else(|| {
                NetGraphError::Config(format!(
                    "link '{}' references undefined node '{}'",
                    link_id, link.target
                ))
            })?;

            // Forward edge as defined, then the reverse twin.
            src.push(src_id);
            dst.push(dst_id);
            capacity.push(link.capacity);
            cost.push(link.cost);
            ext_edge_id.push(link_idx << 1);

            src.push(dst_id);
            dst.push(src_id);
            capacity.push(link.capacity);
            cost.push(link.cost);
            ext_edge_id.push((link_idx << 1) | 1);
        }

        for aug in augmentations {
            src.push(node_id_of[&aug.source]);
            dst.push(node_id_of[&aug.target]);
            capacity.push(aug.capacity);
            cost.push(aug.cost);
            ext_edge_id.push(EXT_NONE);
        }

        // CSR adjacency sorted by (dst, edge id).
        let num_nodes = node_names.len();
        let mut order: Vec<EdgeId> = (0..src.len()).collect();
        order.sort_by_key(|&k| (src[k], dst[k], k));
        let mut out_offsets = vec![0usize; num_nodes + 1];
        for &k in &order {
            out_offsets[src[k] + 1] += 1;
        }
        for i in 0..num_nodes {
            out_offsets[i + 1] += out_offsets[i];
        }
        let out_edges = order;

        let disabled_node_ids: Vec<NodeId> = network
            .nodes
            .values()
            .filter(|n| n.disabled)
            .filter_map(|n| node_id_of.get(&n.name).copied())
            .collect();
        let disabled_link_ids: BTreeSet<String> = network
            .links
            .values()
            .filter(|l| l.disabled)
            .map(|l| l.id.clone())
            .collect();

        let mut link_id_to_edge_indices: HashMap<String, Vec<EdgeId>> = HashMap::new();
        for (edge_idx, &ext) in ext_edge_id.iter().enumerate() {
            if ext == EXT_NONE {
                continue;
            }
            let link_idx = (ext >> 1) as usize;
            link_id_to_edge_indices
                .entry(link_ids[link_idx].clone())
                .or_default()
                .push(edge_idx);
        }

        Ok(Self {
            node_names,
            node_id_of,
            num_real_nodes,
            src,
            dst,
            capacity,
            cost,
            ext_edge_id,
            link_ids,
            out_offsets,
            out_edges,
            disabled_node_ids,
            disabled_link_ids,
            link_id_to_edge_indices,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.node_names.len()
    }

    /// Number of real (non-pseudo) nodes; pseudo ids start here.
    pub fn num_real_nodes(&self) -> usize {
        self.num_real_nodes
    }

    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.node_id_of.get(name).copied()
    }

    pub fn node_name(&self, id: NodeId) -> &str {
        &self.node_names[id]
    }

    pub fn edge_src(&self, edge: EdgeId) -> NodeId {
        self.src[edge]
    }

    pub fn edge_dst(&self, edge: EdgeId) -> NodeId {
        self.dst[edge]
    }

    pub fn capacities(&self) -> &[f64] {
        &self.capacity
    }

    pub fn costs(&self) -> &[i64] {
        &self.cost
    }

    pub fn ext_edge_ids(&self) -> &[i64] {
        &self.ext_edge_id
    }

    /// Decode an external edge id to its scenario-level identity.
    /// Augmentation edges (sentinel) yield `None`.
    pub fn decode_ext(&self, ext: i64) -> Option<EdgeRef> {
        if ext == EXT_NONE {
            return None;
        }
        let link_idx = (ext >> 1) as usize;
        let direction = if ext & 1 == 1 {
            Direction::Rev
        } else {
            Direction::Fwd
        };
        self.link_ids
            .get(link_idx)
            .map(|link_id| EdgeRef::new(link_id.clone(), direction))
    }

    /// Scenario identity of a substrate edge, `None` for augmentations.
    pub fn edge_ref(&self, edge: EdgeId) -> Option<EdgeRef> {
        self.decode_ext(self.ext_edge_id[edge])
    }

    /// Substrate edge indices (forward, reverse) belonging to a link.
    pub fn link_edge_indices(&self, link_id: &str) -> Option<&[EdgeId]> {
        self.link_id_to_edge_indices.get(link_id).map(|v| v.as_slice())
    }

    /// Out-edges of a node, sorted by (dst, edge id).
    pub fn out_edges(&self, node: NodeId) -> &[EdgeId] {
        &self.out_edges[self.out_offsets[node]..self.out_offsets[node + 1]]
    }

    pub fn disabled_node_ids(&self) -> &[NodeId] {
        &self.disabled_node_ids
    }

    pub fn disabled_link_ids(&self) -> &BTreeSet<String> {
        &self.disabled_link_ids
    }

    /// Node inclusion mask: true = included. Pre-disabled nodes and the
    /// given exclusions are false. Unknown names are ignored.
    pub fn build_node_mask(&self, excluded_nodes: Option<&BTreeSet<String>>) -> Vec<bool> {
        let mut mask = vec![true; self.num_nodes()];
        for &node_id in &self.disabled_node_ids {
            mask[node_id] = false;
        }
        if let Some(excluded) = excluded_nodes {
            for name in excluded {
                if let Some(&node_id) = self.node_id_of.get(name) {
                    mask[node_id] = false;
                }
            }
        }
        mask
    }

    /// Edge inclusion mask: true = included. Both directions of disabled
    /// and excluded links are false. Unknown link ids are ignored.
    pub fn build_edge_mask(&self, excluded_links: Option<&BTreeSet<String>>) -> Vec<bool> {
        let mut mask = vec![true; self.num_edges()];
        for link_id in &self.disabled_link_ids {
            if let Some(edges) = self.link_id_to_edge_indices.get(link_id) {
                for &edge_idx in edges {
                    mask[edge_idx] = false;
                }
            }
        }
        if let Some(excluded) = excluded_links {
            for link_id in excluded {
                if let Some(edges) = self.link_id_to_edge_indices.get(link_id) {
                    for &edge_idx in edges {
                        mask[edge_idx] = false;
                    }
                }
            }
        }
        mask
    }
}
