//! Flow result containers for analysis iterations.
//!
//! Small, serialisable records capturing per-iteration outcomes in a
//! unit-agnostic form. Constructors validate invariants eagerly: numbers
//! must be finite and non-negative, `dropped` must equal
//! `demand - placed` within tolerance, and a summary must agree with its
//! flow list. Export goes through [`FlowEntry::to_value`] /
//! [`FlowIterationResult::to_value`], which produce JSON-safe values with
//! cost-distribution keys rendered as 9-decimal-quantised strings.

use std::collections::BTreeMap;

use netgraph_core::{NetGraphError, NetGraphResult};
use netgraph_scenarios::FailureTrace;
use serde_json::{json, Map, Value};

/// Numeric tolerance for validation and clamping.
const TOLERANCE: f64 = 1e-9;

/// Render a float key with at most 9 decimal places and no trailing
/// zeros; integral values render without a decimal point.
pub(crate) fn fmt_float_key(value: f64) -> String {
    let rounded = (value * 1e9).round() / 1e9;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        let mut text = format!("{rounded:.9}");
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
        text
    }
}

/// One source→destination flow outcome within an iteration.
///
/// Path costs in this system are integer metrics, so the cost
/// distribution is keyed by integer cost tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowEntry {
    pub source: String,
    pub destination: String,
    pub priority: i32,
    pub demand: f64,
    pub placed: f64,
    pub dropped: f64,
    /// Placed volume per path-cost tier.
    pub cost_distribution: BTreeMap<i64, f64>,
    /// Per-flow extras (min-cut edges, used edges, sensitivity scores).
    pub data: Map<String, Value>,
}

impl FlowEntry {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        priority: i32,
        demand: f64,
        placed: f64,
        dropped: f64,
    ) -> NetGraphResult<Self> {
        Self::with_details(
            source,
            destination,
            priority,
            demand,
            placed,
            dropped,
            BTreeMap::new(),
            Map::new(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_details(
        source: impl Into<String>,
        destination: impl Into<String>,
        priority: i32,
        demand: f64,
        placed: f64,
        dropped: f64,
        cost_distribution: BTreeMap<i64, f64>,
        data: Map<String, Value>,
    ) -> NetGraphResult<Self> {
        let source = source.into();
        let destination = destination.into();
        if source.is_empty() {
            return Err(NetGraphError::ResultInvariant(
                "FlowEntry.source must be a non-empty string".into(),
            ));
        }
        if destination.is_empty() {
            return Err(NetGraphError::ResultInvariant(
                "FlowEntry.destination must be a non-empty string".into(),
            ));
        }
        if priority < 0 {
            return Err(NetGraphError::ResultInvariant(
                "FlowEntry.priority must be non-negative".into(),
            ));
        }
        for (name, value) in [("demand", demand), ("placed", placed)] {
            if !value.is_finite() {
                return Err(NetGraphError::ResultInvariant(format!(
                    "FlowEntry.{name} must be finite"
                )));
            }
            if value < 0.0 {
                return Err(NetGraphError::ResultInvariant(format!(
                    "FlowEntry.{name} must be non-negative"
                )));
            }
        }
        if !dropped.is_finite() {
            return Err(NetGraphError::ResultInvariant(
                "FlowEntry.dropped must be finite".into(),
            ));
        }
        // Clamp tiny negative drop caused by rounding noise.
        let dropped = if dropped < 0.0 && dropped.abs() <= TOLERANCE {
            0.0
        } else {
            dropped
        };
        if dropped < 0.0 {
            return Err(NetGraphError::ResultInvariant(
                "FlowEntry.dropped must be non-negative".into(),
            ));
        }
        if (dropped - (demand - placed)).abs() > TOLERANCE {
            return Err(NetGraphError::ResultInvariant(format!(
                "FlowEntry.dropped must equal demand - placed: demand={demand} placed={placed} dropped={dropped}"
            )));
        }
        for (&cost, &volume) in &cost_distribution {
            if !volume.is_finite() || volume < 0.0 {
                return Err(NetGraphError::ResultInvariant(format!(
                    "FlowEntry.cost_distribution[{cost}] must be finite and non-negative"
                )));
            }
        }
        Ok(Self {
            source,
            destination,
            priority,
            demand,
            placed,
            dropped,
            cost_distribution,
            data,
        })
    }

    /// JSON-safe rendering; cost keys become quantised strings.
    pub fn to_value(&self) -> Value {
        let costs: Map<String, Value> = self
            .cost_distribution
            .iter()
            .map(|(&cost, &volume)| (fmt_float_key(cost as f64), json!(volume)))
            .collect();
        json!({
            "source": self.source,
            "destination": self.destination,
            "priority": self.priority,
            "demand": self.demand,
            "placed": self.placed,
            "dropped": self.dropped,
            "cost_distribution": costs,
            "data": Value::Object(self.data.clone()),
        })
    }

    /// Rebuild from [`FlowEntry::to_value`] output, re-validating all
    /// invariants. Cost keys are compared as numbers after
    /// string-normalisation.
    pub fn from_value(value: &Value) -> NetGraphResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| NetGraphError::Parse("FlowEntry value must be an object".into()))?;
        let text = |key: &str| -> NetGraphResult<String> {
            obj.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| NetGraphError::Parse(format!("FlowEntry.{key} missing")))
        };
        let number = |key: &str| -> NetGraphResult<f64> {
            obj.get(key)
                .and_then(Value::as_f64)
                .ok_or_else(|| NetGraphError::Parse(format!("FlowEntry.{key} missing")))
        };
        let mut cost_distribution = BTreeMap::new();
        if let Some(costs) = obj.get("cost_distribution").and_then(Value::as_object) {
            for (key, volume) in costs {
                let cost: f64 = key
                    .parse()
                    .map_err(|_| NetGraphError::Parse(format!("bad cost key '{key}'")))?;
                let volume = volume.as_f64().ok_or_else(|| {
                    NetGraphError::Parse(format!("bad cost volume for '{key}'"))
                })?;
                cost_distribution.insert(cost.round() as i64, volume);
            }
        }
        let data = obj
            .get("data")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Self::with_details(
            text("source")?,
            text("destination")?,
            obj.get("priority").and_then(Value::as_i64).unwrap_or(0) as i32,
            number("demand")?,
            number("placed")?,
            number("dropped")?,
            cost_distribution,
            data,
        )
    }
}

/// Aggregated metrics across all flows of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSummary {
    pub total_demand: f64,
    pub total_placed: f64,
    /// `total_placed / total_demand` when demand > 0, else 1.0.
    pub overall_ratio: f64,
    pub dropped_flows: usize,
    pub num_flows: usize,
}

impl FlowSummary {
    pub fn new(
        total_demand: f64,
        total_placed: f64,
        dropped_flows: usize,
        num_flows: usize,
    ) -> NetGraphResult<Self> {
        for (name, value) in [("total_demand", total_demand), ("total_placed", total_placed)] {
            if !value.is_finite() || value < 0.0 {
                return Err(NetGraphError::ResultInvariant(format!(
                    "FlowSummary.{name} must be finite and non-negative"
                )));
            }
        }
        let overall_ratio = if total_demand == 0.0 {
            1.0
        } else {
            total_placed / total_demand
        };
        Ok(Self {
            total_demand,
            total_placed,
            overall_ratio,
            dropped_flows,
            num_flows,
        })
    }

    pub fn empty() -> Self {
        Self {
            total_demand: 0.0,
            total_placed: 0.0,
            overall_ratio: 1.0,
            dropped_flows: 0,
            num_flows: 0,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "total_demand": self.total_demand,
            "total_placed": self.total_placed,
            "overall_ratio": self.overall_ratio,
            "dropped_flows": self.dropped_flows,
            "num_flows": self.num_flows,
        })
    }
}

/// Excluded entities of a failure iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureState {
    pub excluded_nodes: Vec<String>,
    pub excluded_links: Vec<String>,
}

impl FailureState {
    pub fn to_value(&self) -> Value {
        json!({
            "excluded_nodes": self.excluded_nodes,
            "excluded_links": self.excluded_links,
        })
    }
}

/// Per-iteration analysis result with failure provenance.
///
/// `failure_id` is empty for the baseline, otherwise a stable hash of the
/// exclusion sets assigned by the failure manager. `occurrence_count`
/// records how many Monte Carlo iterations produced this unique pattern.
#[derive(Debug, Clone)]
pub struct FlowIterationResult {
    pub failure_id: String,
    pub failure_state: Option<FailureState>,
    pub failure_trace: Option<FailureTrace>,
    pub occurrence_count: usize,
    pub flows: Vec<FlowEntry>,
    pub summary: FlowSummary,
    pub data: Map<String, Value>,
}

impl FlowIterationResult {
    pub fn new(flows: Vec<FlowEntry>, summary: FlowSummary) -> NetGraphResult<Self> {
        if summary.num_flows != flows.len() {
            return Err(NetGraphError::ResultInvariant(format!(
                "summary.num_flows ({}) must match flows ({})",
                summary.num_flows,
                flows.len()
            )));
        }
        Ok(Self {
            failure_id: String::new(),
            failure_state: None,
            failure_trace: None,
            occurrence_count: 1,
            flows,
            summary,
            data: Map::new(),
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "failure_id": self.failure_id,
            "failure_state": self.failure_state.as_ref().map(FailureState::to_value),
            "failure_trace": self
                .failure_trace
                .as_ref()
                .map(|trace| serde_json::to_value(trace).unwrap_or(Value::Null)),
            "occurrence_count": self.occurrence_count,
            "flows": self.flows.iter().map(FlowEntry::to_value).collect::<Vec<_>>(),
            "summary": self.summary.to_value(),
            "data": Value::Object(self.data.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_entry_valid() {
        let entry = FlowEntry::new("A", "B", 0, 10.0, 8.0, 2.0).unwrap();
        assert_eq!(entry.dropped, 2.0);
    }

    #[test]
    fn test_flow_entry_rejects_inconsistent_drop() {
        assert!(FlowEntry::new("A", "B", 0, 10.0, 8.0, 1.0).is_err());
    }

    #[test]
    fn test_flow_entry_clamps_tiny_negative_drop() {
        let entry = FlowEntry::new("A", "B", 0, 10.0, 10.0, -1e-12).unwrap();
        assert_eq!(entry.dropped, 0.0);
    }

    #[test]
    fn test_flow_entry_rejects_non_finite() {
        assert!(FlowEntry::new("A", "B", 0, f64::NAN, 0.0, 0.0).is_err());
        assert!(FlowEntry::new("A", "B", 0, f64::INFINITY, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_flow_entry_rejects_empty_endpoint() {
        assert!(FlowEntry::new("", "B", 0, 1.0, 1.0, 0.0).is_err());
        assert!(FlowEntry::new("A", "B", -1, 1.0, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_flow_entry_round_trip() {
        let mut costs = BTreeMap::new();
        costs.insert(2, 30.0);
        costs.insert(4, 10.0);
        let entry = FlowEntry::with_details(
            "A",
            "B",
            1,
            40.0,
            40.0,
            0.0,
            costs,
            Map::new(),
        )
        .unwrap();
        let value = entry.to_value();
        assert_eq!(value["cost_distribution"]["2"], json!(30.0));
        let restored = FlowEntry::from_value(&value).unwrap();
        assert_eq!(restored, entry);
    }

    #[test]
    fn test_fmt_float_key() {
        assert_eq!(fmt_float_key(2.0), "2");
        assert_eq!(fmt_float_key(2.5), "2.5");
        assert_eq!(fmt_float_key(1.0 / 3.0), "0.333333333");
    }

    #[test]
    fn test_summary_ratio() {
        let summary = FlowSummary::new(100.0, 80.0, 1, 2).unwrap();
        assert!((summary.overall_ratio - 0.8).abs() < 1e-12);
        let empty = FlowSummary::new(0.0, 0.0, 0, 0).unwrap();
        assert_eq!(empty.overall_ratio, 1.0);
    }

    #[test]
    fn test_iteration_result_count_mismatch() {
        let entry = FlowEntry::new("A", "B", 0, 1.0, 1.0, 0.0).unwrap();
        let summary = FlowSummary::new(1.0, 1.0, 0, 2).unwrap();
        assert!(FlowIterationResult::new(vec![entry], summary).is_err());
    }

    #[test]
    fn test_iteration_result_to_value_shape() {
        let entry = FlowEntry::new("A", "B", 0, 1.0, 1.0, 0.0).unwrap();
        let summary = FlowSummary::new(1.0, 1.0, 0, 1).unwrap();
        let mut result = FlowIterationResult::new(vec![entry], summary).unwrap();
        result.failure_id = "abcd1234".into();
        result.occurrence_count = 3;
        let value = result.to_value();
        assert_eq!(value["failure_id"], json!("abcd1234"));
        assert_eq!(value["occurrence_count"], json!(3));
        assert_eq!(value["summary"]["num_flows"], json!(1));
    }
}
