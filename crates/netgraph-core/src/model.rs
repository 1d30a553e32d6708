//! Network topology model.
//!
//! A [`Network`] owns three name-keyed maps: nodes, links, and risk groups.
//! Links are directed and capacitated; every link later produces a forward
//! and a reverse edge in the analysis substrate (see [`crate::graph`]).
//! Risk groups form a forest of named failure domains; nodes and links
//! reference them by name.
//!
//! The model is a plain value object: analyses never mutate it. Failures and
//! per-iteration overrides are expressed as exclusion masks on the substrate
//! instead.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};

use crate::error::{NetGraphError, NetGraphResult};
use crate::utils::new_base64_uuid;

/// Open attribute map attached to nodes, links, and risk groups.
///
/// Values are arbitrary JSON so selector conditions can traverse nested
/// structures with dot notation (e.g. `hardware.vendor`).
pub type AttrMap = BTreeMap<String, serde_json::Value>;

/// A network node, identified by a unique name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub risk_groups: BTreeSet<String>,
    #[serde(default)]
    pub attrs: AttrMap,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disabled: false,
            risk_groups: BTreeSet::new(),
            attrs: AttrMap::new(),
        }
    }

    /// Mark the node as administratively disabled.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn with_risk_group(mut self, group: impl Into<String>) -> Self {
        self.risk_groups.insert(group.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }
}

/// A directed, capacitated connection between two nodes.
///
/// Costs are integer routing metrics; capacities are non-negative reals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// Stable unique identifier. Auto-generated as `source|target|<uuid>`
    /// by [`Link::new`]; callers that serialize links must round-trip it.
    pub id: String,
    pub source: String,
    pub target: String,
    pub capacity: f64,
    pub cost: i64,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub risk_groups: BTreeSet<String>,
    #[serde(default)]
    pub attrs: AttrMap,
}

impl Link {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        let id = format!("{}|{}|{}", source, target, new_base64_uuid());
        Self {
            id,
            source,
            target,
            capacity: 1.0,
            cost: 1,
            disabled: false,
            risk_groups: BTreeSet::new(),
            attrs: AttrMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_cost(mut self, cost: i64) -> Self {
        self.cost = cost;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn with_risk_group(mut self, group: impl Into<String>) -> Self {
        self.risk_groups.insert(group.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }
}

/// Named failure domain. Failing a group fails every entity declaring it;
/// children fail transitively when `expand_children` is enabled on the
/// failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskGroup {
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub attrs: AttrMap,
}

impl RiskGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disabled: false,
            children: Vec::new(),
            attrs: AttrMap::new(),
        }
    }

    pub fn with_child(mut self, child: impl Into<String>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }
}

/// The user-facing network container.
///
/// Invariants (checked by [`Network::validate`]):
/// - every risk-group name referenced by a node or link is defined;
/// - the risk-group children relation is acyclic;
/// - every link endpoint names an existing node and capacities are
///   non-negative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,
    #[serde(default)]
    pub links: BTreeMap<String, Link>,
    #[serde(default)]
    pub risk_groups: BTreeMap<String, RiskGroup>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn add_link(&mut self, link: Link) {
        self.links.insert(link.id.clone(), link);
    }

    pub fn add_risk_group(&mut self, group: RiskGroup) {
        self.risk_groups.insert(group.name.clone(), group);
    }

    /// Validate structural invariants. Fatal before any analysis runs.
    pub fn validate(&self) -> NetGraphResult<()> {
        self.validate_link_endpoints()?;
        self.validate_risk_group_references()?;
        self.validate_risk_group_hierarchy()?;
        Ok(())
    }

    fn validate_link_endpoints(&self) -> NetGraphResult<()> {
        for link in self.links.values() {
            if !self.nodes.contains_key(&link.source) {
                return Err(NetGraphError::Config(format!(
                    "link '{}' references undefined source node '{}'",
                    link.id, link.source
                )));
            }
            if !self.nodes.contains_key(&link.target) {
                return Err(NetGraphError::Config(format!(
                    "link '{}' references undefined target node '{}'",
                    link.id, link.target
                )));
            }
            if !(link.capacity >= 0.0) {
                return Err(NetGraphError::Config(format!(
                    "link '{}' has negative or NaN capacity {}",
                    link.id, link.capacity
                )));
            }
        }
        Ok(())
    }

    /// Ensure all risk group references resolve to defined groups.
    ///
    /// Catches typos and missing definitions that would otherwise fail
    /// silently during failure simulation. The error lists up to 10
    /// violations.
    fn validate_risk_group_references(&self) -> NetGraphResult<()> {
        let mut errors: Vec<String> = Vec::new();

        for node in self.nodes.values() {
            let undefined: Vec<&String> = node
                .risk_groups
                .iter()
                .filter(|rg| !self.risk_groups.contains_key(*rg))
                .collect();
            if !undefined.is_empty() {
                errors.push(format!("node '{}': {:?}", node.name, undefined));
            }
        }
        for link in self.links.values() {
            let undefined: Vec<&String> = link
                .risk_groups
                .iter()
                .filter(|rg| !self.risk_groups.contains_key(*rg))
                .collect();
            if !undefined.is_empty() {
                errors.push(format!(
                    "link '{}->{}': {:?}",
                    link.source, link.target, undefined
                ));
            }
        }
        for group in self.risk_groups.values() {
            let undefined: Vec<&String> = group
                .children
                .iter()
                .filter(|child| !self.risk_groups.contains_key(*child))
                .collect();
            if !undefined.is_empty() {
                errors.push(format!("risk group '{}': {:?}", group.name, undefined));
            }
        }

        if errors.is_empty() {
            return Ok(());
        }
        let shown = errors.iter().take(10).cloned().collect::<Vec<_>>().join("\n  - ");
        let suffix = if errors.len() > 10 {
            format!("\n  ... and {} more", errors.len() - 10)
        } else {
            String::new()
        };
        Err(NetGraphError::Config(format!(
            "found {} undefined risk group reference(s):\n  - {}{}",
            errors.len(),
            shown,
            suffix
        )))
    }

    /// Detect circular references in the risk-group children relation.
    ///
    /// DFS colouring over a petgraph directed graph; the error message
    /// carries the offending cycle path.
    fn validate_risk_group_hierarchy(&self) -> NetGraphResult<()> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for group in self.risk_groups.values() {
            graph.add_node(group.name.as_str());
            for child in &group.children {
                if self.risk_groups.contains_key(child) {
                    graph.add_edge(group.name.as_str(), child.as_str(), ());
                }
            }
        }

        // White/gray/black DFS so the cycle path can be reconstructed.
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut color: BTreeMap<&str, Color> =
            graph.nodes().map(|n| (n, Color::White)).collect();

        fn dfs<'a>(
            node: &'a str,
            graph: &DiGraphMap<&'a str, ()>,
            color: &mut BTreeMap<&'a str, Color>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            color.insert(node, Color::Gray);
            stack.push(node);
            for child in graph.neighbors(node) {
                match color.get(child).copied().unwrap_or(Color::White) {
                    Color::Gray => {
                        let start = stack.iter().position(|&n| n == child).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(child.to_string());
                        return Some(cycle);
                    }
                    Color::White => {
                        if let Some(cycle) = dfs(child, graph, color, stack) {
                            return Some(cycle);
                        }
                    }
                    Color::Black => {}
                }
            }
            stack.pop();
            color.insert(node, Color::Black);
            None
        }

        let names: Vec<&str> = graph.nodes().collect();
        for name in names {
            if color.get(name).copied() == Some(Color::White) {
                let mut stack = Vec::new();
                if let Some(cycle) = dfs(name, &graph, &mut color, &mut stack) {
                    return Err(NetGraphError::Config(format!(
                        "circular reference in risk group hierarchy: {}",
                        cycle.join(" -> ")
                    )));
                }
            }
        }
        Ok(())
    }

    /// Compute basic statistics about the network.
    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::default();
        stats.num_nodes = self.nodes.len();
        stats.num_links = self.links.len();
        stats.num_risk_groups = self.risk_groups.len();
        for node in self.nodes.values() {
            if node.disabled {
                stats.disabled_nodes += 1;
            }
        }
        for link in self.links.values() {
            if link.disabled {
                stats.disabled_links += 1;
            } else {
                stats.total_capacity += link.capacity;
            }
        }
        stats
    }
}

/// Statistics about a network's size and capacity.
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub num_nodes: usize,
    pub num_links: usize,
    pub num_risk_groups: usize,
    pub disabled_nodes: usize,
    pub disabled_links: usize,
    /// Sum of capacities over enabled links (one direction).
    pub total_capacity: f64,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nodes, {} links ({:.0} capacity), {} risk groups",
            self.num_nodes, self.num_links, self.total_capacity, self.num_risk_groups
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_network() -> Network {
        let mut network = Network::new();
        network.add_node(Node::new("A"));
        network.add_node(Node::new("B"));
        network.add_link(Link::new("A", "B").with_id("A-B").with_capacity(10.0));
        network
    }

    #[test]
    fn test_network_creation() {
        let network = line_network();
        assert_eq!(network.nodes.len(), 2);
        assert_eq!(network.links.len(), 1);
        assert_eq!(network.links["A-B"].capacity, 10.0);
        network.validate().unwrap();
    }

    #[test]
    fn test_link_auto_id_embeds_endpoints() {
        let link = Link::new("spine1", "leaf1");
        assert!(link.id.starts_with("spine1|leaf1|"));
        // 22-char compact uuid suffix
        assert_eq!(link.id.split('|').nth(2).unwrap().len(), 22);
    }

    #[test]
    fn test_undefined_risk_group_reference() {
        let mut network = line_network();
        network.add_node(Node::new("C").with_risk_group("missing"));
        let err = network.validate().unwrap_err();
        assert!(err.to_string().contains("undefined risk group"));
    }

    #[test]
    fn test_undefined_link_endpoint() {
        let mut network = line_network();
        network.add_link(Link::new("A", "Z").with_id("A-Z"));
        let err = network.validate().unwrap_err();
        assert!(err.to_string().contains("undefined target node 'Z'"));
    }

    #[test]
    fn test_risk_group_cycle_detected() {
        let mut network = line_network();
        network.add_risk_group(RiskGroup::new("a").with_child("b"));
        network.add_risk_group(RiskGroup::new("b").with_child("c"));
        network.add_risk_group(RiskGroup::new("c").with_child("a"));
        let err = network.validate().unwrap_err();
        assert!(err.to_string().contains("circular reference"));
    }

    #[test]
    fn test_risk_group_forest_ok() {
        let mut network = line_network();
        network.add_risk_group(RiskGroup::new("site").with_child("rack1").with_child("rack2"));
        network.add_risk_group(RiskGroup::new("rack1"));
        network.add_risk_group(RiskGroup::new("rack2"));
        network.validate().unwrap();
    }

    #[test]
    fn test_stats() {
        let mut network = line_network();
        network.add_link(Link::new("B", "A").with_id("B-A").with_capacity(5.0).disabled());
        let stats = network.stats();
        assert_eq!(stats.num_nodes, 2);
        assert_eq!(stats.num_links, 2);
        assert_eq!(stats.disabled_links, 1);
        assert!((stats.total_capacity - 10.0).abs() < 1e-9);
        assert!(stats.to_string().contains("2 nodes"));
    }
}
