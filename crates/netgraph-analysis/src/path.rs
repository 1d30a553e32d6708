//! Concrete path representation at the analysis boundary.

use netgraph_core::EdgeRef;
use serde_json::{json, Value};

/// A concrete path: a sequence of `(node_name, edges-to-next)` elements
/// where the final element carries no edges, plus the total path cost.
#[derive(Debug, Clone)]
pub struct Path {
    pub elements: Vec<(String, Vec<EdgeRef>)>,
    pub cost: f64,
}

impl Path {
    pub fn new(elements: Vec<(String, Vec<EdgeRef>)>, cost: f64) -> Self {
        Self { elements, cost }
    }

    /// Node names along the path in order.
    pub fn nodes(&self) -> Vec<&str> {
        self.elements.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// All edge refs along the path in hop order.
    pub fn edges(&self) -> Vec<&EdgeRef> {
        self.elements
            .iter()
            .flat_map(|(_, edges)| edges.iter())
            .collect()
    }

    pub fn to_value(&self) -> Value {
        json!({
            "cost": self.cost,
            "elements": self
                .elements
                .iter()
                .map(|(name, edges)| {
                    json!([
                        name,
                        edges
                            .iter()
                            .map(|e| json!({"link_id": e.link_id, "direction": e.direction.to_string()}))
                            .collect::<Vec<_>>()
                    ])
                })
                .collect::<Vec<_>>(),
        })
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.cost.to_bits() == other.cost.to_bits() && self.elements == other.elements
    }
}

impl Eq for Path {}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.elements.cmp(&other.elements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgraph_core::Direction;

    #[test]
    fn test_path_ordering_by_cost_then_elements() {
        let cheap = Path::new(vec![("A".into(), vec![]), ("B".into(), vec![])], 1.0);
        let pricey = Path::new(vec![("A".into(), vec![]), ("C".into(), vec![])], 2.0);
        assert!(cheap < pricey);
    }

    #[test]
    fn test_path_accessors() {
        let path = Path::new(
            vec![
                ("A".into(), vec![EdgeRef::new("ab", Direction::Fwd)]),
                ("B".into(), vec![]),
            ],
            1.0,
        );
        assert_eq!(path.nodes(), vec!["A", "B"]);
        assert_eq!(path.edges().len(), 1);
        let value = path.to_value();
        assert_eq!(value["cost"], 1.0);
    }
}
