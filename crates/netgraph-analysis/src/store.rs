//! Step-scoped results store with a deterministic export shape.
//!
//! `Results` organises outputs by step name. Steps write exactly two keys
//! under their namespace, `metadata` and `data`, and the exported value
//! has the shape `{workflow, steps, scenario}` with only JSON primitives.

use std::collections::BTreeMap;

use netgraph_core::{NetGraphError, NetGraphResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Seed provenance and ordering metadata for one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetadata {
    pub step_type: String,
    pub step_name: String,
    pub execution_order: usize,
    #[serde(default)]
    pub scenario_seed: Option<u64>,
    #[serde(default)]
    pub step_seed: Option<u64>,
    /// "scenario-derived", "explicit-step", or "none".
    #[serde(default = "default_seed_source")]
    pub seed_source: String,
    #[serde(default)]
    pub active_seed: Option<u64>,
}

fn default_seed_source() -> String {
    "none".to_string()
}

#[derive(Debug, Clone, Default)]
struct StepData {
    metadata: Value,
    data: Value,
}

/// Container with shape `{workflow, steps, scenario}`.
#[derive(Debug, Clone, Default)]
pub struct Results {
    store: BTreeMap<String, StepData>,
    metadata: BTreeMap<String, StepMetadata>,
    active_step: Option<String>,
    scenario: Option<Value>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter step scope; subsequent put/get target this step.
    pub fn enter_step(&mut self, step_name: impl Into<String>) {
        let step_name = step_name.into();
        self.store.entry(step_name.clone()).or_default();
        self.active_step = Some(step_name);
    }

    pub fn exit_step(&mut self) {
        self.active_step = None;
    }

    /// Store a value under the active step. Only the keys `metadata` and
    /// `data` are allowed.
    pub fn put(&mut self, key: &str, value: Value) -> NetGraphResult<()> {
        let step = self.active_step.clone().ok_or_else(|| {
            NetGraphError::Config("Results::put called without active step scope".into())
        })?;
        let slot = self.store.entry(step).or_default();
        match key {
            "metadata" => slot.metadata = value,
            "data" => slot.data = value,
            other => {
                return Err(NetGraphError::Config(format!(
                    "Results::put only allows keys 'metadata' and 'data', got '{other}'"
                )))
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let step = self.active_step.as_ref()?;
        let slot = self.store.get(step)?;
        match key {
            "metadata" => Some(&slot.metadata),
            "data" => Some(&slot.data),
            _ => None,
        }
    }

    /// Raw step payload for cross-step reads.
    pub fn get_step(&self, step_name: &str) -> Option<(&Value, &Value)> {
        self.store
            .get(step_name)
            .map(|slot| (&slot.metadata, &slot.data))
    }

    pub fn put_step_metadata(&mut self, metadata: StepMetadata) {
        self.metadata.insert(metadata.step_name.clone(), metadata);
    }

    pub fn get_step_metadata(&self, step_name: &str) -> Option<&StepMetadata> {
        self.metadata.get(step_name)
    }

    pub fn steps_by_execution_order(&self) -> Vec<&str> {
        let mut names: Vec<&StepMetadata> = self.metadata.values().collect();
        names.sort_by_key(|md| md.execution_order);
        names.iter().map(|md| md.step_name.as_str()).collect()
    }

    /// Attach a normalised scenario snapshot for export.
    pub fn set_scenario_snapshot(&mut self, snapshot: Value) {
        self.scenario = Some(snapshot);
    }

    /// Export with shape `{workflow, steps, scenario}`.
    pub fn to_value(&self) -> Value {
        let workflow: Map<String, Value> = self
            .metadata
            .iter()
            .map(|(name, md)| {
                (
                    name.clone(),
                    serde_json::to_value(md).unwrap_or(Value::Null),
                )
            })
            .collect();
        let steps: Map<String, Value> = self
            .store
            .iter()
            .map(|(name, slot)| {
                (
                    name.clone(),
                    json!({
                        "metadata": normalize(&slot.metadata),
                        "data": normalize(&slot.data),
                    }),
                )
            })
            .collect();
        let mut out = json!({
            "workflow": Value::Object(workflow),
            "steps": Value::Object(steps),
        });
        if let Some(scenario) = &self.scenario {
            out["scenario"] = scenario.clone();
        }
        out
    }
}

/// Coerce a value to JSON primitives: null payload slots become empty
/// objects so every step exports both keys.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Null => json!({}),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_requires_scope() {
        let mut results = Results::new();
        assert!(results.put("data", json!({})).is_err());
    }

    #[test]
    fn test_put_rejects_other_keys() {
        let mut results = Results::new();
        results.enter_step("probe");
        assert!(results.put("extra", json!({})).is_err());
        assert!(results.put("data", json!({"x": 1})).is_ok());
        assert!(results.put("metadata", json!({"seed": 42})).is_ok());
    }

    #[test]
    fn test_export_shape() {
        let mut results = Results::new();
        results.put_step_metadata(StepMetadata {
            step_type: "MaxFlowStep".into(),
            step_name: "probe".into(),
            execution_order: 0,
            scenario_seed: Some(42),
            step_seed: Some(42),
            seed_source: "scenario-derived".into(),
            active_seed: Some(42),
        });
        results.enter_step("probe");
        results.put("metadata", json!({"seed": 42})).unwrap();
        results.put("data", json!({"flow": 120.0})).unwrap();
        results.exit_step();
        results.set_scenario_snapshot(json!({"name": "diamond"}));

        let value = results.to_value();
        assert_eq!(value["steps"]["probe"]["data"]["flow"], json!(120.0));
        assert_eq!(
            value["workflow"]["probe"]["seed_source"],
            json!("scenario-derived")
        );
        assert_eq!(value["scenario"]["name"], json!("diamond"));
    }

    #[test]
    fn test_execution_order() {
        let mut results = Results::new();
        for (i, name) in ["second", "first"].iter().enumerate() {
            results.put_step_metadata(StepMetadata {
                step_type: "Step".into(),
                step_name: name.to_string(),
                execution_order: 1 - i,
                scenario_seed: None,
                step_seed: None,
                seed_source: "none".into(),
                active_seed: None,
            });
        }
        assert_eq!(results.steps_by_execution_order(), vec!["first", "second"]);
    }

    #[test]
    fn test_missing_payload_exports_empty_objects() {
        let mut results = Results::new();
        results.enter_step("empty");
        results.exit_step();
        let value = results.to_value();
        assert_eq!(value["steps"]["empty"]["data"], json!({}));
        assert_eq!(value["steps"]["empty"]["metadata"], json!({}));
    }
}
