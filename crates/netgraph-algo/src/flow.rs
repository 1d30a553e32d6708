//! Mutable residual state and flow placement primitives.
//!
//! A [`FlowGraph`] wraps an immutable substrate with a residual-capacity
//! array and per-flow bookkeeping. [`FlowGraph::place`] consumes capacity
//! along a predecessor DAG under one of two strategies:
//!
//! - [`FlowPlacement::Proportional`] (WCMP): the volume admitted is the
//!   maximum flow the DAG edges allow, solved with Dinic-style layered
//!   augmentation restricted to the DAG;
//! - [`FlowPlacement::EqualBalanced`] (ECMP): every downstream branch of a
//!   node carries the same share; the admitted volume is bounded by the
//!   most constrained branch divided by its share.
//!
//! Placement maintains: residuals never go negative, per-flow conservation
//! holds at intermediate nodes, the placed amount lies in `[0, volume]`,
//! and a zero placement leaves no bookkeeping behind.

use std::fmt;
use std::str::FromStr;

use hashbrown::HashMap;
use netgraph_core::{CoreGraph, EdgeId, NetGraphError, NetGraphResult, NodeId};
use serde::{Deserialize, Serialize};

use crate::spf::{PredDag, MIN_CAP, MIN_FLOW};

/// Identifier of one concrete flow: source, sink, priority class, and a
/// monotonically assigned counter disambiguating parallel LSPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowIndex {
    pub src: NodeId,
    pub dst: NodeId,
    pub priority: i32,
    pub flow_counter: u64,
}

impl FlowIndex {
    pub fn new(src: NodeId, dst: NodeId, priority: i32, flow_counter: u64) -> Self {
        Self {
            src,
            dst,
            priority,
            flow_counter,
        }
    }
}

/// Flow distribution strategy over a predecessor DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowPlacement {
    Proportional,
    EqualBalanced,
}

impl FlowPlacement {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowPlacement::Proportional => "proportional",
            FlowPlacement::EqualBalanced => "equal_balanced",
        }
    }
}

impl fmt::Display for FlowPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowPlacement {
    type Err = NetGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "proportional" => Ok(FlowPlacement::Proportional),
            "equal_balanced" => Ok(FlowPlacement::EqualBalanced),
            other => Err(NetGraphError::Parameter(format!(
                "invalid flow placement '{other}'"
            ))),
        }
    }
}

/// Mutable per-run flow state over an immutable substrate.
#[derive(Debug, Clone)]
pub struct FlowGraph<'g> {
    graph: &'g CoreGraph,
    residual: Vec<f64>,
    flows: HashMap<FlowIndex, HashMap<EdgeId, f64>>,
}

impl<'g> FlowGraph<'g> {
    /// Fresh state: residual equals capacity on every edge.
    pub fn new(graph: &'g CoreGraph) -> Self {
        Self {
            graph,
            residual: graph.capacities().to_vec(),
            flows: HashMap::new(),
        }
    }

    /// Fresh state with mask-excluded edges zeroed out.
    pub fn with_edge_mask(graph: &'g CoreGraph, edge_mask: &[bool]) -> Self {
        let residual = graph
            .capacities()
            .iter()
            .zip(edge_mask.iter())
            .map(|(&cap, &ok)| if ok { cap } else { 0.0 })
            .collect();
        Self {
            graph,
            residual,
            flows: HashMap::new(),
        }
    }

    pub fn graph(&self) -> &'g CoreGraph {
        self.graph
    }

    /// Current residual capacities, read-only.
    pub fn residual_view(&self) -> &[f64] {
        &self.residual
    }

    /// Edges currently carrying positive flow for the given index,
    /// sorted by edge id.
    pub fn get_flow_edges(&self, index: &FlowIndex) -> Vec<(EdgeId, f64)> {
        let mut edges: Vec<(EdgeId, f64)> = self
            .flows
            .get(index)
            .map(|per_edge| {
                per_edge
                    .iter()
                    .filter(|(_, &amount)| amount > MIN_FLOW)
                    .map(|(&edge, &amount)| (edge, amount))
                    .collect()
            })
            .unwrap_or_default();
        edges.sort_by_key(|&(edge, _)| edge);
        edges
    }

    /// Total volume carried by a flow (its per-edge amount out of the
    /// source).
    pub fn flow_volume(&self, index: &FlowIndex) -> f64 {
        self.flows
            .get(index)
            .map(|per_edge| {
                per_edge
                    .iter()
                    .filter(|(&edge, _)| self.graph.edge_src(edge) == index.src)
                    .map(|(_, &amount)| amount)
                    .sum()
            })
            .unwrap_or(0.0)
    }

    /// Release a flow's capacity back to the residual and drop its
    /// bookkeeping. Returns the released volume at the source.
    pub fn remove_flow(&mut self, index: &FlowIndex) -> f64 {
        let mut released = 0.0;
        if let Some(per_edge) = self.flows.remove(index) {
            for (edge, amount) in per_edge {
                self.residual[edge] += amount;
                if self.graph.edge_src(edge) == index.src {
                    released += amount;
                }
            }
        }
        released
    }

    /// Push `amount` along an explicit single path of edges. Fails when
    /// any edge lacks residual. Used by LSP tunnel placement.
    pub fn place_path(
        &mut self,
        index: FlowIndex,
        edges: &[EdgeId],
        amount: f64,
    ) -> NetGraphResult<()> {
        if amount <= MIN_FLOW {
            return Ok(());
        }
        for &edge in edges {
            if self.residual[edge] + MIN_CAP < amount {
                return Err(NetGraphError::Validation(format!(
                    "placing {amount} on edge {edge} exceeds residual {}",
                    self.residual[edge]
                )));
            }
        }
        let per_edge = self.flows.entry(index).or_default();
        for &edge in edges {
            self.residual[edge] = (self.residual[edge] - amount).max(0.0);
            *per_edge.entry(edge).or_insert(0.0) += amount;
        }
        Ok(())
    }

    /// Place at most `volume` from `src` to `dst` along the DAG.
    /// Returns the admitted amount.
    pub fn place(
        &mut self,
        index: FlowIndex,
        src: NodeId,
        dst: NodeId,
        dag: &PredDag,
        volume: f64,
        placement: FlowPlacement,
    ) -> NetGraphResult<f64> {
        if volume <= MIN_FLOW || dag.dist(dst).is_none() || src == dst {
            return Ok(0.0);
        }
        let edge_flows = match placement {
            FlowPlacement::Proportional => self.place_proportional(src, dst, dag, volume),
            FlowPlacement::EqualBalanced => self.place_equal_balanced(src, dst, dag, volume)?,
        };

        let mut placed = 0.0;
        for &(edge, amount) in &edge_flows {
            if self.graph.edge_src(edge) == src {
                placed += amount;
            }
        }
        if placed <= MIN_FLOW {
            return Ok(0.0);
        }

        let per_edge = self.flows.entry(index).or_default();
        for (edge, amount) in edge_flows {
            if amount <= MIN_FLOW {
                continue;
            }
            self.residual[edge] = (self.residual[edge] - amount).max(0.0);
            *per_edge.entry(edge).or_insert(0.0) += amount;
        }
        Ok(placed.min(volume))
    }

    /// Max-flow restricted to the DAG edges (Dinic with BFS levels and
    /// blocking-flow DFS), bounded by `volume`.
    fn place_proportional(
        &self,
        src: NodeId,
        dst: NodeId,
        dag: &PredDag,
        volume: f64,
    ) -> Vec<(EdgeId, f64)> {
        let dag_edges = dag.edges_to(self.graph, dst);
        if dag_edges.is_empty() {
            return Vec::new();
        }

        // Local arc storage: forward arc per DAG edge plus a paired
        // reverse arc for augmentation undo.
        struct Arc {
            to: NodeId,
            cap: f64,
            edge: Option<EdgeId>,
        }
        let mut arcs: Vec<Arc> = Vec::with_capacity(dag_edges.len() * 2);
        let mut adj: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for &edge in &dag_edges {
            let u = self.graph.edge_src(edge);
            let v = self.graph.edge_dst(edge);
            let cap = self.residual[edge];
            if cap <= MIN_CAP {
                continue;
            }
            adj.entry(u).or_default().push(arcs.len());
            arcs.push(Arc {
                to: v,
                cap,
                edge: Some(edge),
            });
            adj.entry(v).or_default().push(arcs.len());
            arcs.push(Arc {
                to: u,
                cap: 0.0,
                edge: None,
            });
        }

        let mut remaining = volume;
        loop {
            if remaining <= MIN_FLOW {
                break;
            }
            // BFS levels over positive-residual arcs.
            let mut level: HashMap<NodeId, usize> = HashMap::new();
            level.insert(src, 0);
            let mut queue = std::collections::VecDeque::new();
            queue.push_back(src);
            while let Some(u) = queue.pop_front() {
                if u == dst {
                    continue;
                }
                let next_level = level[&u] + 1;
                if let Some(arc_ids) = adj.get(&u) {
                    for &arc_id in arc_ids {
                        let arc = &arcs[arc_id];
                        if arc.cap > MIN_CAP && !level.contains_key(&arc.to) {
                            level.insert(arc.to, next_level);
                            queue.push_back(arc.to);
                        }
                    }
                }
            }
            if !level.contains_key(&dst) {
                break;
            }

            // Blocking flow via iterative DFS with per-node arc cursors.
            let mut cursor: HashMap<NodeId, usize> = HashMap::new();
            let mut pushed_any = false;
            'augment: loop {
                if remaining <= MIN_FLOW {
                    break;
                }
                // Find one augmenting path respecting levels.
                let mut path_arcs: Vec<usize> = Vec::new();
                let mut node = src;
                loop {
                    if node == dst {
                        break;
                    }
                    let arc_ids = match adj.get(&node) {
                        Some(ids) => ids,
                        None => {
                            // Dead end: retreat.
                            match path_arcs.pop() {
                                Some(arc_id) => {
                                    let from = arcs[arc_id ^ 1].to;
                                    *cursor.entry(from).or_insert(0) += 1;
                                    node = from;
                                    continue;
                                }
                                None => break 'augment,
                            }
                        }
                    };
                    let cur = cursor.entry(node).or_insert(0);
                    let mut advanced = false;
                    while *cur < arc_ids.len() {
                        let arc_id = arc_ids[*cur];
                        let arc = &arcs[arc_id];
                        if arc.cap > MIN_CAP
                            && level.get(&arc.to).copied()
                                == level.get(&node).map(|l| l + 1)
                        {
                            path_arcs.push(arc_id);
                            node = arc.to;
                            advanced = true;
                            break;
                        }
                        *cur += 1;
                    }
                    if !advanced {
                        // Retreat one hop.
                        match path_arcs.pop() {
                            Some(arc_id) => {
                                let from = arcs[arc_id ^ 1].to;
                                *cursor.entry(from).or_insert(0) += 1;
                                node = from;
                            }
                            None => break 'augment,
                        }
                    }
                }
                if node != dst {
                    break;
                }
                let mut bottleneck = remaining;
                for &arc_id in &path_arcs {
                    bottleneck = bottleneck.min(arcs[arc_id].cap);
                }
                if bottleneck <= MIN_FLOW {
                    break;
                }
                for &arc_id in &path_arcs {
                    arcs[arc_id].cap -= bottleneck;
                    arcs[arc_id ^ 1].cap += bottleneck;
                }
                remaining -= bottleneck;
                pushed_any = true;
            }
            if !pushed_any {
                break;
            }
        }

        // Net forward flow per DAG edge = consumed capacity.
        let mut edge_flows = Vec::new();
        for (arc_id, arc) in arcs.iter().enumerate() {
            if arc_id % 2 != 0 {
                continue;
            }
            if let Some(edge) = arc.edge {
                let consumed = self.residual[edge] - arc.cap;
                // Reverse-arc gains cancel out: consumed = initial - final.
                let net = consumed.min(self.residual[edge]);
                if net > MIN_FLOW {
                    edge_flows.push((edge, net));
                }
            }
        }
        edge_flows
    }

    /// Equal split per downstream branch; admitted volume limited by the
    /// most constrained branch share.
    fn place_equal_balanced(
        &self,
        src: NodeId,
        dst: NodeId,
        dag: &PredDag,
        volume: f64,
    ) -> NetGraphResult<Vec<(EdgeId, f64)>> {
        let dag_edges = dag.edges_to(self.graph, dst);
        if dag_edges.is_empty() {
            return Ok(Vec::new());
        }

        // Forward adjacency and in-degrees within the sub-DAG.
        let mut out_edges: HashMap<NodeId, Vec<EdgeId>> = HashMap::new();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        in_degree.entry(src).or_insert(0);
        for &edge in &dag_edges {
            let u = self.graph.edge_src(edge);
            let v = self.graph.edge_dst(edge);
            out_edges.entry(u).or_default().push(edge);
            *in_degree.entry(v).or_insert(0) += 1;
            in_degree.entry(u).or_insert(0);
        }
        for edges in out_edges.values_mut() {
            edges.sort_unstable();
        }

        // Kahn topological order; the pred DAG is acyclic by construction.
        let mut ready: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&node, _)| node)
            .collect();
        ready.sort_unstable();
        let mut order = Vec::with_capacity(in_degree.len());
        let mut in_degree = in_degree;
        while let Some(node) = ready.pop() {
            order.push(node);
            if let Some(edges) = out_edges.get(&node) {
                for &edge in edges {
                    let v = self.graph.edge_dst(edge);
                    let deg = in_degree.get_mut(&v).expect("node in sub-DAG");
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(v);
                    }
                }
            }
            ready.sort_unstable();
        }
        if order.len() != in_degree.len() {
            return Err(NetGraphError::Validation(
                "predecessor DAG contains a zero-cost cycle".into(),
            ));
        }

        // Split fractions: each outgoing branch carries an equal share.
        let mut fraction: HashMap<NodeId, f64> = HashMap::new();
        fraction.insert(src, 1.0);
        let mut edge_share: Vec<(EdgeId, f64)> = Vec::new();
        for &node in &order {
            let f = fraction.get(&node).copied().unwrap_or(0.0);
            if f <= 0.0 || node == dst {
                continue;
            }
            if let Some(edges) = out_edges.get(&node) {
                let share = f / edges.len() as f64;
                for &edge in edges {
                    edge_share.push((edge, share));
                    *fraction.entry(self.graph.edge_dst(edge)).or_insert(0.0) += share;
                }
            }
        }

        // Most constrained branch bounds the admitted volume.
        let mut max_volume = f64::INFINITY;
        for &(edge, share) in &edge_share {
            if share > 0.0 {
                max_volume = max_volume.min(self.residual[edge] / share);
            }
        }
        let placed = volume.min(max_volume);
        if placed <= MIN_FLOW {
            return Ok(Vec::new());
        }

        Ok(edge_share
            .into_iter()
            .map(|(edge, share)| (edge, placed * share))
            .collect())
    }
}
