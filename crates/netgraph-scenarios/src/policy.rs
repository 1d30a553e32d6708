//! Failure policy primitives.
//!
//! A [`FailurePolicy`] is a set of weighted [`FailureMode`]s; exactly one
//! mode is drawn per iteration and all of its [`FailureRule`]s are applied
//! together, their selections unioned into the failure set. Rules match
//! entities by attribute conditions (plus an optional name regex) and
//! select among matches with `all`, probabilistic `random`, or fixed-size
//! `choice` (optionally weighted by an attribute).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use netgraph_core::{AttrMap, Condition, Logic, NetGraphError, NetGraphResult};
use serde::{Deserialize, Serialize};

/// Entity type a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Node,
    Link,
    RiskGroup,
}

impl RuleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleScope::Node => "node",
            RuleScope::Link => "link",
            RuleScope::RiskGroup => "risk_group",
        }
    }
}

/// Selection strategy among matched entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Select every matched entity.
    #[default]
    All,
    /// Per-entity Bernoulli draw with `probability`.
    Random,
    /// Pick exactly `count` entities, optionally weighted by `weight_by`.
    Choice,
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMode::All => "all",
            SelectionMode::Random => "random",
            SelectionMode::Choice => "choice",
        }
    }
}

/// Defines how to match and then select entities for failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRule {
    pub scope: RuleScope,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: Logic,
    #[serde(default)]
    pub mode: SelectionMode,
    #[serde(default = "default_probability")]
    pub probability: f64,
    #[serde(default = "default_count")]
    pub count: usize,
    /// Attribute used for weighted sampling in choice mode.
    #[serde(default)]
    pub weight_by: Option<String>,
    /// Optional regex filtering entity ids by name.
    #[serde(default)]
    pub path: Option<String>,
}

fn default_probability() -> f64 {
    1.0
}

fn default_count() -> usize {
    1
}

impl FailureRule {
    pub fn new(scope: RuleScope) -> Self {
        Self {
            scope,
            conditions: Vec::new(),
            logic: Logic::Or,
            mode: SelectionMode::All,
            probability: default_probability(),
            count: default_count(),
            weight_by: None,
            path: None,
        }
    }

    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = probability;
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_weight_by(mut self, attr: impl Into<String>) -> Self {
        self.weight_by = Some(attr.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn validate(&self) -> NetGraphResult<()> {
        if self.mode == SelectionMode::Random && !(0.0..=1.0).contains(&self.probability) {
            return Err(NetGraphError::Parameter(format!(
                "probability={} must be within [0,1] for mode='random'",
                self.probability
            )));
        }
        Ok(())
    }
}

/// A weighted mode bundling rules applied together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureMode {
    pub weight: f64,
    #[serde(default)]
    pub rules: Vec<FailureRule>,
    #[serde(default)]
    pub attrs: AttrMap,
}

impl FailureMode {
    pub fn new(weight: f64, rules: Vec<FailureRule>) -> Self {
        Self {
            weight,
            rules,
            attrs: AttrMap::new(),
        }
    }
}

/// A container for failure modes plus expansion flags and a seed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailurePolicy {
    #[serde(default)]
    pub attrs: AttrMap,
    /// Fail every entity sharing a risk group with a failed entity.
    #[serde(default)]
    pub expand_groups: bool,
    /// Failing a risk group fails its descendants transitively.
    #[serde(default)]
    pub expand_children: bool,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub modes: Vec<FailureMode>,
}

impl FailurePolicy {
    pub fn new(modes: Vec<FailureMode>) -> Self {
        Self {
            modes,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_expand_groups(mut self) -> Self {
        self.expand_groups = true;
        self
    }

    pub fn with_expand_children(mut self) -> Self {
        self.expand_children = true;
        self
    }

    /// A policy without rules produces no failures; Monte Carlo runs
    /// degenerate to baseline-only.
    pub fn has_effective_rules(&self) -> bool {
        self.modes.iter().any(|mode| !mode.rules.is_empty())
    }

    pub fn validate(&self) -> NetGraphResult<()> {
        for mode in &self.modes {
            if !(mode.weight >= 0.0) {
                return Err(NetGraphError::Parameter(format!(
                    "mode weight {} must be non-negative",
                    mode.weight
                )));
            }
            for rule in &mode.rules {
                rule.validate()?;
            }
        }
        Ok(())
    }

    /// JSON rendering for result provenance.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Named map of failure policies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailurePolicySet {
    #[serde(default)]
    pub policies: BTreeMap<String, FailurePolicy>,
}

impl FailurePolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, policy: FailurePolicy) {
        self.policies.insert(name.into(), policy);
    }

    pub fn get_policy(&self, name: &str) -> Result<&FailurePolicy> {
        self.policies
            .get(name)
            .ok_or_else(|| anyhow!("failure policy '{name}' not found"))
    }

    pub fn get_default(&self) -> Option<&FailurePolicy> {
        self.policies.get("default")
    }
}

/// Load a failure policy set from YAML or JSON.
pub fn load_failure_policy_set_from_path(path: &Path) -> Result<FailurePolicySet> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading failure policy set '{}'", path.display()))?;
    let set: FailurePolicySet = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            serde_yaml::from_str(&data).context("parsing failure policy yaml")?
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&data).context("parsing failure policy json")?
        }
        _ => serde_yaml::from_str(&data)
            .or_else(|_| serde_json::from_str(&data))
            .context("parsing failure policy set")?,
    };
    for policy in set.policies.values() {
        policy.validate()?;
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probability_validation() {
        let rule = FailureRule::new(RuleScope::Link)
            .with_mode(SelectionMode::Random)
            .with_probability(1.5);
        assert!(rule.validate().is_err());
        let rule = FailureRule::new(RuleScope::Link)
            .with_mode(SelectionMode::Random)
            .with_probability(0.5);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_effective_rules() {
        let empty = FailurePolicy::new(vec![FailureMode::new(1.0, vec![])]);
        assert!(!empty.has_effective_rules());
        let armed = FailurePolicy::new(vec![FailureMode::new(
            1.0,
            vec![FailureRule::new(RuleScope::Link)],
        )]);
        assert!(armed.has_effective_rules());
    }

    #[test]
    fn test_policy_set_lookup() {
        let mut set = FailurePolicySet::new();
        set.insert("single_link", FailurePolicy::default());
        assert!(set.get_policy("single_link").is_ok());
        assert!(set.get_policy("missing").is_err());
        assert!(set.get_default().is_none());
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
policies:
  single_link:
    seed: 42
    expand_groups: true
    modes:
      - weight: 1.0
        rules:
          - scope: link
            mode: choice
            count: 1
          - scope: node
            mode: random
            probability: 0.1
            conditions:
              - attr: role
                op: "=="
                value: spine
"#;
        let set: FailurePolicySet = serde_yaml::from_str(yaml).unwrap();
        let policy = set.get_policy("single_link").unwrap();
        assert_eq!(policy.seed, Some(42));
        assert!(policy.expand_groups);
        assert_eq!(policy.modes[0].rules.len(), 2);
        assert_eq!(policy.modes[0].rules[0].mode, SelectionMode::Choice);
        assert_eq!(policy.modes[0].rules[1].probability, 0.1);
        policy.validate().unwrap();

        let value = policy.to_value();
        assert_eq!(value["seed"], serde_json::json!(42));
    }
}
