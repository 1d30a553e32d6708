//! Traffic demand specifications.
//!
//! A [`TrafficDemand`] is declarative: selectors for sources and targets,
//! a volume, a priority class, and pairing semantics. Demand expansion
//! (in the analysis layer) turns these into concrete placement units.
//!
//! Identifier stability matters: pseudo nodes of combine-mode demands are
//! named after the demand id, so a context built for one copy of a demand
//! can only resolve nodes for another copy if the id survived
//! serialisation. Ids are therefore auto-generated once (as
//! `source|target|<uuid>`) and always round-tripped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use netgraph_algo::FlowPolicyPreset;
use netgraph_core::{new_base64_uuid, AttrMap, Mode, SelectorSpec};
use serde::{Deserialize, Serialize};

/// How grouped selector matches produce demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    /// Flatten all groups into node lists, then apply the pairing mode.
    #[default]
    Flatten,
    /// One demand per (source group, target group) pair. The base volume
    /// is NOT redistributed: every group pair receives the full volume.
    PerGroup,
    /// Pairwise over distinct group pairs with the volume divided evenly
    /// across pairs.
    GroupPairwise,
}

/// Declarative traffic demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficDemand {
    /// Stable identifier; auto-generated when empty.
    #[serde(default)]
    pub id: String,
    pub source: SelectorSpec,
    pub target: SelectorSpec,
    #[serde(default)]
    pub volume: f64,
    /// Lower value = higher priority.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub group_mode: GroupMode,
    #[serde(default)]
    pub flow_policy: Option<FlowPolicyPreset>,
    #[serde(default)]
    pub attrs: AttrMap,
}

fn default_mode() -> Mode {
    Mode::Combine
}

impl TrafficDemand {
    pub fn new(
        source: impl Into<SelectorSpec>,
        target: impl Into<SelectorSpec>,
        volume: f64,
    ) -> Self {
        let mut demand = Self {
            id: String::new(),
            source: source.into(),
            target: target.into(),
            volume,
            priority: 0,
            mode: Mode::Combine,
            group_mode: GroupMode::Flatten,
            flow_policy: None,
            attrs: AttrMap::new(),
        };
        demand.ensure_id();
        demand
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_group_mode(mut self, group_mode: GroupMode) -> Self {
        self.group_mode = group_mode;
        self
    }

    pub fn with_flow_policy(mut self, preset: FlowPolicyPreset) -> Self {
        self.flow_policy = Some(preset);
        self
    }

    /// Assign an id when none was provided. Two distinct demands never
    /// collide: the suffix is a fresh uuid.
    pub fn ensure_id(&mut self) {
        if self.id.is_empty() {
            self.id = format!(
                "{}|{}|{}",
                self.source.display_key(),
                self.target.display_key(),
                new_base64_uuid()
            );
        }
    }
}

/// Named map of demand lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DemandSet {
    #[serde(default)]
    pub sets: BTreeMap<String, Vec<TrafficDemand>>,
}

impl DemandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, mut demands: Vec<TrafficDemand>) {
        for demand in demands.iter_mut() {
            demand.ensure_id();
        }
        self.sets.insert(name.into(), demands);
    }

    pub fn get_set(&self, name: &str) -> Result<&[TrafficDemand]> {
        self.sets
            .get(name)
            .map(|demands| demands.as_slice())
            .ok_or_else(|| anyhow!("demand set '{name}' not found"))
    }

    pub fn get_default(&self) -> Result<&[TrafficDemand]> {
        self.get_set("default")
    }
}

/// Load a demand set document from YAML or JSON, sniffing by extension
/// with a YAML-then-JSON fallback.
pub fn load_demand_set_from_path(path: &Path) -> Result<DemandSet> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading demand set '{}'", path.display()))?;
    let mut set: DemandSet = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            serde_yaml::from_str(&data).context("parsing demand set yaml")?
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&data).context("parsing demand set json")?
        }
        _ => serde_yaml::from_str(&data)
            .or_else(|_| serde_json::from_str(&data))
            .context("parsing demand set")?,
    };
    for demands in set.sets.values_mut() {
        for demand in demands.iter_mut() {
            demand.ensure_id();
        }
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_auto_id_embeds_selectors() {
        let demand = TrafficDemand::new("^dc/", "^edge/", 100.0);
        assert!(demand.id.starts_with("^dc/|^edge/|"));
    }

    #[test]
    fn test_explicit_id_preserved() {
        let mut demand = TrafficDemand::new("a", "b", 1.0).with_id("stable-id");
        demand.ensure_id();
        assert_eq!(demand.id, "stable-id");
    }

    #[test]
    fn test_distinct_demands_get_distinct_ids() {
        let d1 = TrafficDemand::new("a", "b", 1.0);
        let d2 = TrafficDemand::new("a", "b", 1.0);
        assert_ne!(d1.id, d2.id);
    }

    #[test]
    fn test_demand_set_lookup() {
        let mut set = DemandSet::new();
        set.insert("default", vec![TrafficDemand::new("a", "b", 5.0)]);
        assert_eq!(set.get_default().unwrap().len(), 1);
        assert!(set.get_set("missing").is_err());
    }

    #[test]
    fn test_load_yaml_document() {
        let yaml = r#"
sets:
  default:
    - source: "^dc"
      target: "^edge"
      volume: 10.0
      mode: pairwise
      group_mode: flatten
      priority: 1
      flow_policy: SHORTEST_PATHS_ECMP
"#;
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        let set = load_demand_set_from_path(file.path()).unwrap();
        let demands = set.get_default().unwrap();
        assert_eq!(demands.len(), 1);
        let demand = &demands[0];
        assert_eq!(demand.mode, Mode::Pairwise);
        assert_eq!(demand.priority, 1);
        assert_eq!(demand.flow_policy, Some(FlowPolicyPreset::ShortestPathsEcmp));
        assert!(!demand.id.is_empty());
    }

    #[test]
    fn test_round_trip_preserves_id() {
        let demand = TrafficDemand::new("a", "b", 2.0);
        let json = serde_json::to_string(&demand).unwrap();
        let restored: TrafficDemand = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, demand.id);
    }

    #[test]
    fn test_structured_selector_parses() {
        let yaml = r#"
sets:
  default:
    - source:
        path: "^dc"
        group_by: "site"
      target: "^edge"
      volume: 4.0
"#;
        let set: DemandSet = serde_yaml::from_str(yaml).unwrap();
        let demand = &set.sets["default"][0];
        match &demand.source {
            SelectorSpec::Structured(selector) => {
                assert_eq!(selector.group_by.as_deref(), Some("site"));
            }
            other => panic!("expected structured selector, got {other:?}"),
        }
    }
}
