//! Deterministic failure-iteration generation.
//!
//! [`compute_exclusions`] turns a [`FailurePolicy`] into concrete sets of
//! excluded node names and link ids for one Monte Carlo iteration.
//!
//! Exactly one RNG instance is created per iteration, seeded from the
//! iteration seed (falling back to the policy seed), and threaded through
//! mode selection and every rule sequentially. Draws are never reset per
//! rule: failure events at different rules of the same mode stay
//! statistically independent. Entities are always iterated in sorted-id
//! order before any draw, so identical seeds reproduce identical
//! exclusions on every platform.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use netgraph_core::select::cached_regex;
use netgraph_core::{
    flatten_link_attrs, flatten_node_attrs, flatten_risk_group_attrs, match_entity_ids, AttrMap,
    FlatAttrs, NetGraphResult, Network,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::policy::{FailureMode, FailurePolicy, FailureRule, RuleScope, SelectionMode};

/// Flattened attribute views of all network entities, cached by the
/// caller across iterations.
#[derive(Debug, Clone)]
pub struct EntityAttrs {
    pub nodes: BTreeMap<String, FlatAttrs>,
    pub links: BTreeMap<String, FlatAttrs>,
    pub risk_groups: BTreeMap<String, FlatAttrs>,
}

impl EntityAttrs {
    pub fn from_network(network: &Network) -> Self {
        Self {
            nodes: network
                .nodes
                .iter()
                .map(|(name, node)| (name.clone(), flatten_node_attrs(node)))
                .collect(),
            links: network
                .links
                .iter()
                .map(|(id, link)| (id.clone(), flatten_link_attrs(link)))
                .collect(),
            risk_groups: network
                .risk_groups
                .iter()
                .map(|(name, group)| (name.clone(), flatten_risk_group_attrs(group)))
                .collect(),
        }
    }
}

/// Node and link exclusions of one failure iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub nodes: BTreeSet<String>,
    pub links: BTreeSet<String>,
}

impl Exclusions {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }
}

/// Per-rule selection record for the failure trace.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionRecord {
    pub rule_index: usize,
    pub scope: &'static str,
    pub mode: &'static str,
    pub matched_count: usize,
    pub selected_ids: Vec<String>,
}

/// Entities added by risk-group expansion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpansionRecord {
    pub nodes: Vec<String>,
    pub links: Vec<String>,
    pub risk_groups: Vec<String>,
}

/// Provenance of one failure iteration: which mode fired, what each rule
/// selected, and what expansion added.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FailureTrace {
    pub mode_index: Option<usize>,
    pub mode_attrs: AttrMap,
    pub selections: Vec<SelectionRecord>,
    pub expansion: ExpansionRecord,
}

/// Compute the exclusion sets for one iteration.
///
/// `seed_offset` overrides the policy seed; absent both, draws come from
/// entropy. When `trace` is given it is populated with full provenance.
pub fn compute_exclusions(
    network: &Network,
    attrs: &EntityAttrs,
    policy: Option<&FailurePolicy>,
    seed_offset: Option<u64>,
    mut trace: Option<&mut FailureTrace>,
) -> NetGraphResult<Exclusions> {
    let mut exclusions = Exclusions::default();
    let policy = match policy {
        Some(policy) => policy,
        None => return Ok(exclusions),
    };
    if policy.modes.is_empty() {
        return Ok(exclusions);
    }

    let mut rng = match seed_offset.or(policy.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mode_index = select_mode_index(&policy.modes, &mut rng);
    let mode = &policy.modes[mode_index];
    if let Some(trace) = trace.as_deref_mut() {
        trace.mode_index = Some(mode_index);
        trace.mode_attrs = mode.attrs.clone();
    }

    let mut failed_nodes: BTreeSet<String> = BTreeSet::new();
    let mut failed_links: BTreeSet<String> = BTreeSet::new();
    let mut failed_groups: BTreeSet<String> = BTreeSet::new();

    for (rule_index, rule) in mode.rules.iter().enumerate() {
        rule.validate()?;
        let entity_map = match rule.scope {
            RuleScope::Node => &attrs.nodes,
            RuleScope::Link => &attrs.links,
            RuleScope::RiskGroup => &attrs.risk_groups,
        };
        let matched = match_rule(rule, entity_map)?;
        let selected = select_entities(rule, &matched, entity_map, &mut rng);

        if let Some(trace) = trace.as_deref_mut() {
            if !selected.is_empty() {
                trace.selections.push(SelectionRecord {
                    rule_index,
                    scope: rule.scope.as_str(),
                    mode: rule.mode.as_str(),
                    matched_count: matched.len(),
                    selected_ids: selected.iter().cloned().collect(),
                });
            }
        }

        match rule.scope {
            RuleScope::Node => failed_nodes.extend(selected),
            RuleScope::Link => failed_links.extend(selected),
            RuleScope::RiskGroup => failed_groups.extend(selected),
        }
    }

    let pre_nodes = failed_nodes.clone();
    let pre_links = failed_links.clone();
    let pre_groups = failed_groups.clone();

    if policy.expand_groups {
        expand_shared_risk_groups(network, &mut failed_nodes, &mut failed_links);
    }
    if policy.expand_children && !failed_groups.is_empty() {
        expand_group_children(network, &mut failed_groups);
    }

    // Resolve failed risk groups to their member nodes and links.
    for group_name in &failed_groups {
        for (node_name, node) in &network.nodes {
            if node.risk_groups.contains(group_name) {
                failed_nodes.insert(node_name.clone());
            }
        }
        for (link_id, link) in &network.links {
            if link.risk_groups.contains(group_name) {
                failed_links.insert(link_id.clone());
            }
        }
    }

    if let Some(trace) = trace.as_deref_mut() {
        trace.expansion = ExpansionRecord {
            nodes: failed_nodes.difference(&pre_nodes).cloned().collect(),
            links: failed_links.difference(&pre_links).cloned().collect(),
            risk_groups: failed_groups.difference(&pre_groups).cloned().collect(),
        };
    }

    exclusions.nodes = failed_nodes;
    exclusions.links = failed_links;
    Ok(exclusions)
}

/// Weighted mode selection over positive weights in index order.
fn select_mode_index(modes: &[FailureMode], rng: &mut StdRng) -> usize {
    let effective: Vec<(usize, f64)> = modes
        .iter()
        .enumerate()
        .filter(|(_, mode)| mode.weight > 0.0)
        .map(|(idx, mode)| (idx, mode.weight))
        .collect();
    if effective.is_empty() {
        return 0;
    }
    let total: f64 = effective.iter().map(|(_, w)| w).sum();
    let draw = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for &(idx, weight) in &effective {
        cumulative += weight;
        if draw < cumulative {
            return idx;
        }
    }
    effective.last().map(|&(idx, _)| idx).unwrap_or(0)
}

fn match_rule(
    rule: &FailureRule,
    entity_map: &BTreeMap<String, FlatAttrs>,
) -> NetGraphResult<BTreeSet<String>> {
    let mut matched = match_entity_ids(entity_map, &rule.conditions, rule.logic)?;
    if let Some(pattern) = &rule.path {
        let re = cached_regex(pattern)?;
        matched.retain(|id| re.find(id).map(|m| m.start() == 0).unwrap_or(false));
    }
    Ok(matched)
}

/// Apply the rule's selection strategy. Matched ids arrive sorted, so the
/// mapping from RNG draws to entities is reproducible.
fn select_entities(
    rule: &FailureRule,
    matched: &BTreeSet<String>,
    entity_map: &BTreeMap<String, FlatAttrs>,
    rng: &mut StdRng,
) -> BTreeSet<String> {
    if matched.is_empty() {
        return BTreeSet::new();
    }
    match rule.mode {
        SelectionMode::All => matched.clone(),
        SelectionMode::Random => matched
            .iter()
            .filter(|_| rng.gen::<f64>() < rule.probability)
            .cloned()
            .collect(),
        SelectionMode::Choice => {
            let count = rule.count.min(matched.len());
            if count == 0 {
                return BTreeSet::new();
            }
            if let Some(weight_by) = &rule.weight_by {
                let mut positives: Vec<(String, f64)> = Vec::new();
                let mut zeros: Vec<String> = Vec::new();
                for id in matched {
                    let weight = entity_map
                        .get(id)
                        .and_then(|attrs| attrs.get(weight_by))
                        .and_then(weight_of)
                        .unwrap_or(0.0);
                    if weight > 0.0 {
                        positives.push((id.clone(), weight));
                    } else {
                        zeros.push(id.clone());
                    }
                }
                let mut selected =
                    weighted_sample_without_replacement(&positives, count, rng);
                let remaining = count.saturating_sub(selected.len());
                if remaining > 0 && !zeros.is_empty() {
                    for id in zeros.choose_multiple(rng, remaining) {
                        selected.insert(id.clone());
                    }
                }
                if !selected.is_empty() {
                    return selected;
                }
            }
            let pool: Vec<&String> = matched.iter().collect();
            pool.choose_multiple(rng, count)
                .map(|id| (*id).clone())
                .collect()
        }
    }
}

fn weight_of(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Efraimidis–Spirakis weighted sampling without replacement: draw
/// `u in (0,1]` per item, rank by `u^(1/w)`, keep the top `count`.
fn weighted_sample_without_replacement(
    items: &[(String, f64)],
    count: usize,
    rng: &mut StdRng,
) -> BTreeSet<String> {
    if items.is_empty() || count == 0 {
        return BTreeSet::new();
    }
    let mut scored: Vec<(f64, &String)> = Vec::with_capacity(items.len());
    for (id, weight) in items {
        let mut u = rng.gen::<f64>();
        if u <= 0.0 {
            u = 1e-12;
        }
        scored.push((u.powf(1.0 / weight), id));
    }
    scored.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .take(count)
        .map(|(_, id)| id.clone())
        .collect()
}

/// BFS closure: any entity sharing a risk group with a failed entity
/// fails too.
fn expand_shared_risk_groups(
    network: &Network,
    failed_nodes: &mut BTreeSet<String>,
    failed_links: &mut BTreeSet<String>,
) {
    let mut group_members: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, node) in &network.nodes {
        for group in &node.risk_groups {
            group_members.entry(group).or_default().push(name);
        }
    }
    for (id, link) in &network.links {
        for group in &link.risk_groups {
            group_members.entry(group).or_default().push(id);
        }
    }

    let mut queue: VecDeque<String> =
        failed_nodes.iter().chain(failed_links.iter()).cloned().collect();
    let mut visited: BTreeSet<String> = queue.iter().cloned().collect();

    while let Some(current) = queue.pop_front() {
        let groups: Vec<&String> = if let Some(node) = network.nodes.get(&current) {
            node.risk_groups.iter().collect()
        } else if let Some(link) = network.links.get(&current) {
            link.risk_groups.iter().collect()
        } else {
            Vec::new()
        };
        for group in groups {
            if let Some(members) = group_members.get(group.as_str()) {
                for &member in members {
                    if visited.insert(member.to_string()) {
                        queue.push_back(member.to_string());
                        if network.nodes.contains_key(member) {
                            failed_nodes.insert(member.to_string());
                        } else if network.links.contains_key(member) {
                            failed_links.insert(member.to_string());
                        }
                    }
                }
            }
        }
    }
}

/// Failing a risk group fails its descendants transitively.
fn expand_group_children(network: &Network, failed_groups: &mut BTreeSet<String>) {
    let mut queue: VecDeque<String> = failed_groups.iter().cloned().collect();
    while let Some(group_name) = queue.pop_front() {
        if let Some(group) = network.risk_groups.get(&group_name) {
            for child in &group.children {
                if failed_groups.insert(child.clone()) {
                    queue.push_back(child.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{FailureMode, FailurePolicy, FailureRule, RuleScope, SelectionMode};
    use netgraph_core::{Condition, ConditionOp, Link, Network, Node, RiskGroup};
    use serde_json::json;

    fn triangle() -> Network {
        let mut network = Network::new();
        for name in ["A", "B", "C"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("A", "B").with_id("ab").with_capacity(10.0));
        network.add_link(Link::new("B", "C").with_id("bc").with_capacity(10.0));
        network.add_link(Link::new("A", "C").with_id("ac").with_capacity(5.0));
        network
    }

    fn single_link_policy() -> FailurePolicy {
        FailurePolicy::new(vec![FailureMode::new(
            1.0,
            vec![FailureRule::new(RuleScope::Link)
                .with_mode(SelectionMode::Choice)
                .with_count(1)],
        )])
    }

    #[test]
    fn test_no_policy_no_exclusions() {
        let network = triangle();
        let attrs = EntityAttrs::from_network(&network);
        let exclusions = compute_exclusions(&network, &attrs, None, None, None).unwrap();
        assert!(exclusions.is_empty());
    }

    #[test]
    fn test_single_link_choice_is_deterministic() {
        let network = triangle();
        let attrs = EntityAttrs::from_network(&network);
        let policy = single_link_policy();
        let first = compute_exclusions(&network, &attrs, Some(&policy), Some(7), None).unwrap();
        let second = compute_exclusions(&network, &attrs, Some(&policy), Some(7), None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.links.len(), 1);
        assert!(first.nodes.is_empty());
    }

    #[test]
    fn test_different_seeds_cover_links() {
        let network = triangle();
        let attrs = EntityAttrs::from_network(&network);
        let policy = single_link_policy();
        let mut seen = BTreeSet::new();
        for seed in 0..40 {
            let exclusions =
                compute_exclusions(&network, &attrs, Some(&policy), Some(seed), None).unwrap();
            seen.extend(exclusions.links);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_all_mode_with_conditions() {
        let mut network = triangle();
        network.add_node(Node::new("spine1").with_attr("role", json!("spine")));
        network.add_node(Node::new("spine2").with_attr("role", json!("spine")));
        let attrs = EntityAttrs::from_network(&network);
        let policy = FailurePolicy::new(vec![FailureMode::new(
            1.0,
            vec![FailureRule::new(RuleScope::Node).with_condition(Condition::new(
                "role",
                ConditionOp::Eq,
                json!("spine"),
            ))],
        )]);
        let exclusions =
            compute_exclusions(&network, &attrs, Some(&policy), Some(1), None).unwrap();
        assert_eq!(exclusions.nodes.len(), 2);
        assert!(exclusions.nodes.contains("spine1"));
    }

    #[test]
    fn test_path_filter() {
        let network = triangle();
        let attrs = EntityAttrs::from_network(&network);
        let policy = FailurePolicy::new(vec![FailureMode::new(
            1.0,
            vec![FailureRule::new(RuleScope::Link).with_path("a")],
        )]);
        let exclusions =
            compute_exclusions(&network, &attrs, Some(&policy), Some(1), None).unwrap();
        // "ab" and "ac" start with "a"; "bc" does not.
        assert_eq!(exclusions.links.len(), 2);
        assert!(!exclusions.links.contains("bc"));
    }

    #[test]
    fn test_risk_group_resolution_and_children() {
        let mut network = Network::new();
        network.add_risk_group(RiskGroup::new("site").with_child("rack"));
        network.add_risk_group(RiskGroup::new("rack"));
        network.add_node(Node::new("n1").with_risk_group("site"));
        network.add_node(Node::new("n2").with_risk_group("rack"));
        network.add_node(Node::new("n3"));
        let attrs = EntityAttrs::from_network(&network);

        let rule = FailureRule::new(RuleScope::RiskGroup).with_path("^site$");
        let policy = FailurePolicy::new(vec![FailureMode::new(1.0, vec![rule])]);

        // Without expand_children only direct members fail.
        let exclusions =
            compute_exclusions(&network, &attrs, Some(&policy), Some(1), None).unwrap();
        assert_eq!(
            exclusions.nodes.iter().collect::<Vec<_>>(),
            vec!["n1"]
        );

        // With expand_children the descendant group's members fail too.
        let policy = policy.with_expand_children();
        let exclusions =
            compute_exclusions(&network, &attrs, Some(&policy), Some(1), None).unwrap();
        assert!(exclusions.nodes.contains("n1"));
        assert!(exclusions.nodes.contains("n2"));
        assert!(!exclusions.nodes.contains("n3"));
    }

    #[test]
    fn test_expand_groups_bfs() {
        let mut network = Network::new();
        network.add_risk_group(RiskGroup::new("conduit"));
        network.add_node(Node::new("A"));
        network.add_node(Node::new("B"));
        network.add_node(Node::new("C"));
        network.add_link(
            Link::new("A", "B").with_id("ab").with_risk_group("conduit"),
        );
        network.add_link(
            Link::new("B", "C").with_id("bc").with_risk_group("conduit"),
        );
        let attrs = EntityAttrs::from_network(&network);
        let policy = FailurePolicy::new(vec![FailureMode::new(
            1.0,
            vec![FailureRule::new(RuleScope::Link).with_path("^ab$")],
        )])
        .with_expand_groups();
        let exclusions =
            compute_exclusions(&network, &attrs, Some(&policy), Some(1), None).unwrap();
        assert!(exclusions.links.contains("ab"));
        assert!(exclusions.links.contains("bc"));
    }

    #[test]
    fn test_weighted_choice_prefers_heavy_items() {
        let mut network = Network::new();
        network.add_node(Node::new("A"));
        network.add_node(Node::new("B"));
        network.add_link(
            Link::new("A", "B")
                .with_id("heavy")
                .with_attr("failure_weight", json!(1000.0)),
        );
        network.add_link(
            Link::new("A", "B")
                .with_id("light")
                .with_attr("failure_weight", json!(0.001)),
        );
        let attrs = EntityAttrs::from_network(&network);
        let policy = FailurePolicy::new(vec![FailureMode::new(
            1.0,
            vec![FailureRule::new(RuleScope::Link)
                .with_mode(SelectionMode::Choice)
                .with_count(1)
                .with_weight_by("failure_weight")],
        )]);
        let mut heavy = 0;
        for seed in 0..50 {
            let exclusions =
                compute_exclusions(&network, &attrs, Some(&policy), Some(seed), None).unwrap();
            if exclusions.links.contains("heavy") {
                heavy += 1;
            }
        }
        assert!(heavy >= 45, "heavy selected only {heavy}/50 times");
    }

    #[test]
    fn test_mode_weights_drive_selection() {
        let network = triangle();
        let attrs = EntityAttrs::from_network(&network);
        // Mode 0 fails nodes, mode 1 (zero weight) would fail links.
        let policy = FailurePolicy::new(vec![
            FailureMode::new(1.0, vec![FailureRule::new(RuleScope::Node).with_path("^A$")]),
            FailureMode::new(0.0, vec![FailureRule::new(RuleScope::Link)]),
        ]);
        for seed in 0..10 {
            let exclusions =
                compute_exclusions(&network, &attrs, Some(&policy), Some(seed), None).unwrap();
            assert!(exclusions.links.is_empty());
            assert_eq!(exclusions.nodes.iter().collect::<Vec<_>>(), vec!["A"]);
        }
    }

    #[test]
    fn test_trace_records_mode_and_selections() {
        let network = triangle();
        let attrs = EntityAttrs::from_network(&network);
        let policy = single_link_policy();
        let mut trace = FailureTrace::default();
        let exclusions =
            compute_exclusions(&network, &attrs, Some(&policy), Some(3), Some(&mut trace))
                .unwrap();
        assert_eq!(trace.mode_index, Some(0));
        assert_eq!(trace.selections.len(), 1);
        assert_eq!(trace.selections[0].scope, "link");
        assert_eq!(
            trace.selections[0].selected_ids,
            exclusions.links.iter().cloned().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_rules_share_one_rng_stream() {
        // Two random rules in one mode must draw sequentially from the
        // same stream: joint outcomes vary instead of being perfectly
        // correlated by per-rule reseeding.
        let network = triangle();
        let attrs = EntityAttrs::from_network(&network);
        let policy = FailurePolicy::new(vec![FailureMode::new(
            1.0,
            vec![
                FailureRule::new(RuleScope::Node)
                    .with_mode(SelectionMode::Random)
                    .with_probability(0.5),
                FailureRule::new(RuleScope::Link)
                    .with_mode(SelectionMode::Random)
                    .with_probability(0.5),
            ],
        )]);
        let mut joint_patterns = BTreeSet::new();
        for seed in 0..60 {
            let exclusions =
                compute_exclusions(&network, &attrs, Some(&policy), Some(seed), None).unwrap();
            joint_patterns.insert(format!(
                "{:?}|{:?}",
                exclusions.nodes, exclusions.links
            ));
        }
        // Perfectly correlated draws would collapse the joint space.
        assert!(joint_patterns.len() > 8);
    }
}
