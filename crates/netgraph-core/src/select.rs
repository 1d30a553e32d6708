//! Node selection and attribute-condition evaluation.
//!
//! Demand and failure specifications reference network entities through
//! selectors: a regex on entity names, optional attribute conditions, and
//! optional re-grouping by attribute. This module normalises raw selector
//! values into [`NodeSelector`], evaluates conditions against flattened
//! attribute views, and performs the grouped node selection used by demand
//! expansion and the analysis context.
//!
//! Condition operators: `==, !=, <, <=, >, >=, contains, not_contains, in,
//! not_in, exists, not_exists`. Attribute paths use dot notation to
//! traverse nested JSON maps; a missing or null attribute never matches.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NetGraphError, NetGraphResult};
use crate::model::{Link, Network, Node, RiskGroup};

/// Flattened attribute view of an entity: top-level fields merged with its
/// open attribute map, top-level winning on conflicts.
pub type FlatAttrs = BTreeMap<String, Value>;

/// Process-wide compiled-regex cache. Selector and policy patterns repeat
/// across iterations, so compilation is amortised here.
static REGEX_CACHE: Lazy<RwLock<HashMap<String, Regex>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Compile (or fetch) a pattern anchored at the start of the entity name,
/// mirroring `re.match` semantics.
pub fn cached_regex(pattern: &str) -> NetGraphResult<Regex> {
    if let Some(re) = REGEX_CACHE.read().expect("regex cache poisoned").get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    REGEX_CACHE
        .write()
        .expect("regex cache poisoned")
        .insert(pattern.to_string(), re.clone());
    Ok(re)
}

fn matches_at_start(re: &Regex, text: &str) -> bool {
    re.find(text).map(|m| m.start() == 0).unwrap_or(false)
}

/// Comparison operator of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "not_contains")]
    NotContains,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "not_exists")]
    NotExists,
}

/// A single attribute condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Attribute name; dot notation traverses nested maps.
    pub attr: String,
    pub op: ConditionOp,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(attr: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        Self {
            attr: attr.into(),
            op,
            value,
        }
    }
}

/// How to combine multiple conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    And,
    #[default]
    Or,
}

/// Attribute-based filter: conditions plus combining logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSpec {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: Logic,
}

/// Unified node selection specification.
///
/// Evaluation order: regex path filter, attribute-match filter,
/// active/excluded filter, then optional re-grouping by attribute (which
/// overrides regex-capture grouping). At least one of `path`, `group_by`,
/// or `match` must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSelector {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default, rename = "match")]
    pub match_spec: Option<MatchSpec>,
    /// Whether disabled nodes are filtered. `None` defers to the calling
    /// context (demands default to `true`).
    #[serde(default)]
    pub active_only: Option<bool>,
}

impl NodeSelector {
    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    fn validate(&self) -> NetGraphResult<()> {
        if self.path.is_none() && self.group_by.is_none() && self.match_spec.is_none() {
            return Err(NetGraphError::Config(
                "selector requires at least one of: path, group_by, or match".into(),
            ));
        }
        Ok(())
    }
}

/// Raw selector value as written in demand specs: either a bare regex
/// string or a structured selector object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectorSpec {
    Path(String),
    Structured(NodeSelector),
}

impl Default for SelectorSpec {
    fn default() -> Self {
        SelectorSpec::Path(String::new())
    }
}

impl SelectorSpec {
    /// Normalise to a [`NodeSelector`], filling `active_only` from the
    /// context default when unset.
    pub fn normalize(&self, default_active_only: bool) -> NetGraphResult<NodeSelector> {
        let mut selector = match self {
            SelectorSpec::Path(path) => NodeSelector::from_path(path.clone()),
            SelectorSpec::Structured(selector) => {
                selector.validate()?;
                selector.clone()
            }
        };
        if selector.active_only.is_none() {
            selector.active_only = Some(default_active_only);
        }
        Ok(selector)
    }

    /// Stable textual form used in auto-generated demand ids.
    pub fn display_key(&self) -> String {
        match self {
            SelectorSpec::Path(path) => path.clone(),
            SelectorSpec::Structured(selector) => {
                serde_json::to_string(selector).unwrap_or_default()
            }
        }
    }
}

impl From<&str> for SelectorSpec {
    fn from(path: &str) -> Self {
        SelectorSpec::Path(path.to_string())
    }
}

// ── Attribute flattening ─────────────────────────────────────────────────

/// Flat attribute view of a node: `name`, `disabled`, `risk_groups` plus
/// user attrs (top-level fields win).
pub fn flatten_node_attrs(node: &Node) -> FlatAttrs {
    let mut attrs = FlatAttrs::new();
    attrs.insert("name".into(), Value::String(node.name.clone()));
    attrs.insert("disabled".into(), Value::Bool(node.disabled));
    attrs.insert(
        "risk_groups".into(),
        Value::Array(node.risk_groups.iter().cloned().map(Value::String).collect()),
    );
    for (key, value) in &node.attrs {
        attrs.entry(key.clone()).or_insert_with(|| value.clone());
    }
    attrs
}

/// Flat attribute view of a link, keyed for condition evaluation.
pub fn flatten_link_attrs(link: &Link) -> FlatAttrs {
    let mut attrs = FlatAttrs::new();
    attrs.insert("id".into(), Value::String(link.id.clone()));
    attrs.insert("source".into(), Value::String(link.source.clone()));
    attrs.insert("target".into(), Value::String(link.target.clone()));
    attrs.insert("capacity".into(), serde_json::json!(link.capacity));
    attrs.insert("cost".into(), serde_json::json!(link.cost));
    attrs.insert("disabled".into(), Value::Bool(link.disabled));
    attrs.insert(
        "risk_groups".into(),
        Value::Array(link.risk_groups.iter().cloned().map(Value::String).collect()),
    );
    for (key, value) in &link.attrs {
        attrs.entry(key.clone()).or_insert_with(|| value.clone());
    }
    attrs
}

/// Flat attribute view of a risk group.
pub fn flatten_risk_group_attrs(group: &RiskGroup) -> FlatAttrs {
    let mut attrs = FlatAttrs::new();
    attrs.insert("name".into(), Value::String(group.name.clone()));
    attrs.insert("disabled".into(), Value::Bool(group.disabled));
    attrs.insert(
        "children".into(),
        Value::Array(group.children.iter().cloned().map(Value::String).collect()),
    );
    for (key, value) in &group.attrs {
        attrs.entry(key.clone()).or_insert_with(|| value.clone());
    }
    attrs
}

// ── Condition evaluation ─────────────────────────────────────────────────

/// Resolve a dot-notation attribute path against a flat attribute map.
pub fn resolve_attr_path<'a>(attrs: &'a FlatAttrs, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = attrs.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Evaluate a single condition against a flat attribute map.
pub fn evaluate_condition(attrs: &FlatAttrs, cond: &Condition) -> NetGraphResult<bool> {
    let attr_value = resolve_attr_path(attrs, &cond.attr);
    let present = matches!(attr_value, Some(v) if !v.is_null());

    match cond.op {
        ConditionOp::Exists => return Ok(present),
        ConditionOp::NotExists => return Ok(!present),
        _ => {}
    }

    // Missing or null attribute never matches a value-comparing operator.
    let attr_value = match attr_value {
        Some(v) if !v.is_null() => v,
        _ => return Ok(false),
    };

    let result = match cond.op {
        ConditionOp::Eq => attr_value == &cond.value,
        ConditionOp::Ne => attr_value != &cond.value,
        ConditionOp::Lt | ConditionOp::Le | ConditionOp::Gt | ConditionOp::Ge => {
            match (as_number(attr_value), as_number(&cond.value)) {
                (Some(left), Some(right)) => match cond.op {
                    ConditionOp::Lt => left < right,
                    ConditionOp::Le => left <= right,
                    ConditionOp::Gt => left > right,
                    ConditionOp::Ge => left >= right,
                    _ => unreachable!(),
                },
                _ => false,
            }
        }
        ConditionOp::Contains => contains(attr_value, &cond.value),
        ConditionOp::NotContains => !contains(attr_value, &cond.value),
        ConditionOp::In => {
            let candidates = cond.value.as_array().ok_or_else(|| {
                NetGraphError::Parameter("'in' operator requires a list value".into())
            })?;
            candidates.contains(attr_value)
        }
        ConditionOp::NotIn => {
            let candidates = cond.value.as_array().ok_or_else(|| {
                NetGraphError::Parameter("'not_in' operator requires a list value".into())
            })?;
            !candidates.contains(attr_value)
        }
        ConditionOp::Exists | ConditionOp::NotExists => unreachable!(),
    };
    Ok(result)
}

fn contains(attr_value: &Value, expected: &Value) -> bool {
    match attr_value {
        Value::String(s) => {
            let needle = match expected {
                Value::String(e) => e.clone(),
                other => other.to_string(),
            };
            s.contains(&needle)
        }
        Value::Array(items) => items.contains(expected),
        _ => false,
    }
}

/// Evaluate conditions under AND/OR logic; empty conditions pass.
pub fn evaluate_conditions(
    attrs: &FlatAttrs,
    conditions: &[Condition],
    logic: Logic,
) -> NetGraphResult<bool> {
    if conditions.is_empty() {
        return Ok(true);
    }
    match logic {
        Logic::And => {
            for cond in conditions {
                if !evaluate_condition(attrs, cond)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Logic::Or => {
            for cond in conditions {
                if evaluate_condition(attrs, cond)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// Match entity ids by attribute conditions over pre-flattened views.
/// Empty conditions match everything.
pub fn match_entity_ids(
    entity_attrs: &BTreeMap<String, FlatAttrs>,
    conditions: &[Condition],
    logic: Logic,
) -> NetGraphResult<BTreeSet<String>> {
    if conditions.is_empty() {
        return Ok(entity_attrs.keys().cloned().collect());
    }
    let mut matched = BTreeSet::new();
    for (entity_id, attrs) in entity_attrs {
        if evaluate_conditions(attrs, conditions, logic)? {
            matched.insert(entity_id.clone());
        }
    }
    Ok(matched)
}

// ── Grouped node selection ───────────────────────────────────────────────

/// Select node groups by regex path.
///
/// Labels follow regex-capture convention: with capture groups, the label
/// is the captured texts joined with `|` (one group per distinct label);
/// without capture groups, all matches share a single group labelled by
/// the pattern itself. Iteration order is deterministic (sorted labels).
pub fn select_node_groups_by_path<'a>(
    network: &'a Network,
    pattern: &str,
) -> NetGraphResult<BTreeMap<String, Vec<&'a Node>>> {
    let re = cached_regex(pattern)?;
    let has_captures = re.captures_len() > 1;
    let mut groups: BTreeMap<String, Vec<&Node>> = BTreeMap::new();

    for node in network.nodes.values() {
        if has_captures {
            if let Some(caps) = re.captures(&node.name) {
                if caps.get(0).map(|m| m.start()) == Some(0) {
                    let label = (1..caps.len())
                        .filter_map(|i| caps.get(i).map(|m| m.as_str()))
                        .collect::<Vec<_>>()
                        .join("|");
                    groups.entry(label).or_default().push(node);
                }
            }
        } else if matches_at_start(&re, &node.name) {
            groups.entry(pattern.to_string()).or_default().push(node);
        }
    }
    Ok(groups)
}

/// Unified node selection entry point.
///
/// Applies, in order: regex path filter (or all nodes), attribute-match
/// filter, active/excluded filter, optional re-grouping by attribute.
pub fn select_nodes<'a>(
    network: &'a Network,
    selector: &NodeSelector,
    default_active_only: bool,
    excluded_nodes: Option<&BTreeSet<String>>,
) -> NetGraphResult<BTreeMap<String, Vec<&'a Node>>> {
    let active_only = selector.active_only.unwrap_or(default_active_only);

    let mut groups = match &selector.path {
        Some(path) => select_node_groups_by_path(network, path)?,
        None => {
            let mut all = BTreeMap::new();
            all.insert("_all_".to_string(), network.nodes.values().collect());
            all
        }
    };

    if let Some(match_spec) = &selector.match_spec {
        let mut filtered = BTreeMap::new();
        for (label, nodes) in groups {
            let mut kept = Vec::new();
            for node in nodes {
                let attrs = flatten_node_attrs(node);
                if evaluate_conditions(&attrs, &match_spec.conditions, match_spec.logic)? {
                    kept.push(node);
                }
            }
            if !kept.is_empty() {
                filtered.insert(label, kept);
            }
        }
        groups = filtered;
    }

    if active_only || excluded_nodes.map(|e| !e.is_empty()).unwrap_or(false) {
        let mut filtered = BTreeMap::new();
        for (label, nodes) in groups {
            let kept: Vec<&Node> = nodes
                .into_iter()
                .filter(|n| {
                    if active_only && n.disabled {
                        return false;
                    }
                    excluded_nodes.map(|e| !e.contains(&n.name)).unwrap_or(true)
                })
                .collect();
            if !kept.is_empty() {
                filtered.insert(label, kept);
            }
        }
        groups = filtered;
    }

    if let Some(group_by) = &selector.group_by {
        let mut regrouped: BTreeMap<String, Vec<&Node>> = BTreeMap::new();
        for nodes in groups.values() {
            for node in nodes {
                let attrs = flatten_node_attrs(node);
                if let Some(value) = resolve_attr_path(&attrs, group_by) {
                    let key = match value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    regrouped.entry(key).or_default().push(node);
                }
            }
        }
        return Ok(regrouped);
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Link, Network, Node};
    use serde_json::json;

    fn sample_network() -> Network {
        let mut network = Network::new();
        network.add_node(Node::new("dc1").with_attr("role", json!("dc")));
        network.add_node(Node::new("dc2").with_attr("role", json!("dc")));
        network.add_node(
            Node::new("edge1")
                .with_attr("role", json!("edge"))
                .with_attr("hardware", json!({"vendor": "acme"})),
        );
        network.add_node(Node::new("edge2").with_attr("role", json!("edge")).disabled());
        network.add_link(Link::new("dc1", "edge1").with_id("l1"));
        network
    }

    #[test]
    fn test_path_without_captures_uses_pattern_label() {
        let network = sample_network();
        let groups = select_node_groups_by_path(&network, "dc.*").unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["dc.*"].len(), 2);
    }

    #[test]
    fn test_path_with_captures_groups_by_capture() {
        let network = sample_network();
        let groups = select_node_groups_by_path(&network, "(dc|edge)\\d").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["dc"].len(), 2);
        assert_eq!(groups["edge"].len(), 2);
    }

    #[test]
    fn test_match_anchors_at_start() {
        let network = sample_network();
        // "c1" occurs inside "dc1" but not at the start
        let groups = select_node_groups_by_path(&network, "c1").unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn test_select_nodes_active_only_default() {
        let network = sample_network();
        let selector = NodeSelector::from_path("edge.*");
        let groups = select_nodes(&network, &selector, true, None).unwrap();
        let names: Vec<&str> = groups["edge.*"].iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["edge1"]);
    }

    #[test]
    fn test_select_nodes_match_conditions() {
        let network = sample_network();
        let selector = NodeSelector {
            path: None,
            group_by: None,
            match_spec: Some(MatchSpec {
                conditions: vec![Condition::new("role", ConditionOp::Eq, json!("dc"))],
                logic: Logic::Or,
            }),
            active_only: Some(false),
        };
        let groups = select_nodes(&network, &selector, true, None).unwrap();
        assert_eq!(groups["_all_"].len(), 2);
    }

    #[test]
    fn test_select_nodes_group_by_attribute() {
        let network = sample_network();
        let selector = NodeSelector {
            path: Some(".*".into()),
            group_by: Some("role".into()),
            match_spec: None,
            active_only: Some(false),
        };
        let groups = select_nodes(&network, &selector, true, None).unwrap();
        assert_eq!(groups["dc"].len(), 2);
        assert_eq!(groups["edge"].len(), 2);
    }

    #[test]
    fn test_dot_notation_condition() {
        let network = sample_network();
        let attrs = flatten_node_attrs(&network.nodes["edge1"]);
        let cond = Condition::new("hardware.vendor", ConditionOp::Eq, json!("acme"));
        assert!(evaluate_condition(&attrs, &cond).unwrap());
        let cond = Condition::new("hardware.model", ConditionOp::Exists, Value::Null);
        assert!(!evaluate_condition(&attrs, &cond).unwrap());
    }

    #[test]
    fn test_numeric_comparison_coerces_strings() {
        let mut attrs = FlatAttrs::new();
        attrs.insert("capacity".into(), json!("100"));
        let cond = Condition::new("capacity", ConditionOp::Ge, json!(50));
        assert!(evaluate_condition(&attrs, &cond).unwrap());
    }

    #[test]
    fn test_in_requires_list() {
        let mut attrs = FlatAttrs::new();
        attrs.insert("role".into(), json!("dc"));
        let cond = Condition::new("role", ConditionOp::In, json!("dc"));
        assert!(evaluate_condition(&attrs, &cond).is_err());
        let cond = Condition::new("role", ConditionOp::In, json!(["dc", "edge"]));
        assert!(evaluate_condition(&attrs, &cond).unwrap());
    }

    #[test]
    fn test_contains_on_risk_groups_array() {
        let node = Node::new("n1").with_risk_group("rg1");
        let attrs = flatten_node_attrs(&node);
        let cond = Condition::new("risk_groups", ConditionOp::Contains, json!("rg1"));
        assert!(evaluate_condition(&attrs, &cond).unwrap());
    }

    #[test]
    fn test_match_entity_ids_empty_conditions_matches_all() {
        let mut entity_attrs = BTreeMap::new();
        entity_attrs.insert("a".to_string(), FlatAttrs::new());
        entity_attrs.insert("b".to_string(), FlatAttrs::new());
        let matched = match_entity_ids(&entity_attrs, &[], Logic::Or).unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_selector_spec_normalize_defaults() {
        let spec = SelectorSpec::Path("^dc".into());
        let selector = spec.normalize(true).unwrap();
        assert_eq!(selector.active_only, Some(true));
        assert_eq!(selector.path.as_deref(), Some("^dc"));
    }

    #[test]
    fn test_structured_selector_requires_mechanism() {
        let spec = SelectorSpec::Structured(NodeSelector::default());
        assert!(spec.normalize(true).is_err());
    }

    #[test]
    fn test_flatten_link_attrs_top_level_wins() {
        let link = Link::new("a", "b")
            .with_id("l1")
            .with_capacity(5.0)
            .with_attr("capacity", json!(999));
        let attrs = flatten_link_attrs(&link);
        assert_eq!(attrs["capacity"], json!(5.0));
    }
}
