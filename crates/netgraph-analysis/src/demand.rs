//! Demand expansion: declarative demands into concrete placement units.
//!
//! Expansion evaluates each demand's selectors, then applies the
//! mode × group_mode matrix:
//!
//! - `pairwise` emits one demand per (src, dst) node pair with the volume
//!   divided evenly across pairs;
//! - `combine` emits a single `_src_<id>` → `_snk_<id>` demand with the
//!   full volume plus pseudo-node augmentation edges, skipped entirely
//!   when sources and sinks overlap;
//! - `per_group` iterates distinct group pairs, each receiving the FULL
//!   base volume (no redistribution; intentional asymmetry);
//! - `group_pairwise` divides the volume evenly across distinct group
//!   pairs before applying the pairing mode within each.
//!
//! Expansion works on node names, before any graph is built; ids are
//! resolved after the substrate exists with the augmentations included.

use std::collections::BTreeMap;

use netgraph_algo::FlowPolicyPreset;
use netgraph_core::{
    select_nodes, AugmentationEdge, NetGraphError, NetGraphResult, Network, Node,
    LARGE_CAPACITY,
};
use netgraph_scenarios::{GroupMode, TrafficDemand};

use netgraph_core::Mode;

/// Concrete demand ready for placement. Source/target are real or pseudo
/// node names depending on the parent demand's mode.
#[derive(Debug, Clone)]
pub struct ExpandedDemand {
    pub src_name: String,
    pub dst_name: String,
    pub volume: f64,
    pub priority: i32,
    pub policy_preset: FlowPolicyPreset,
    /// Parent TrafficDemand id, used to name pseudo nodes.
    pub demand_id: String,
}

/// Expansion output: demands sorted by priority plus augmentation edges
/// for combine-mode pseudo nodes.
#[derive(Debug, Clone, Default)]
pub struct DemandExpansion {
    pub demands: Vec<ExpandedDemand>,
    pub augmentations: Vec<AugmentationEdge>,
}

type Expansion = (Vec<ExpandedDemand>, Vec<AugmentationEdge>);

fn flatten_names(groups: &BTreeMap<String, Vec<&Node>>) -> Vec<String> {
    groups
        .values()
        .flat_map(|nodes| nodes.iter().map(|n| n.name.clone()))
        .collect()
}

fn expand_combine(
    demand_id: &str,
    volume: f64,
    priority: i32,
    preset: FlowPolicyPreset,
    src_groups: &BTreeMap<String, Vec<&Node>>,
    dst_groups: &BTreeMap<String, Vec<&Node>>,
) -> Expansion {
    let src_names = flatten_names(src_groups);
    let dst_names = flatten_names(dst_groups);
    if src_names.is_empty() || dst_names.is_empty() {
        return (Vec::new(), Vec::new());
    }
    // Aggregating overlapping endpoint sets behind one pseudo pair would
    // short-circuit the flow; skip the demand entirely.
    if src_names.iter().any(|name| dst_names.contains(name)) {
        return (Vec::new(), Vec::new());
    }

    let pseudo_src = format!("_src_{demand_id}");
    let pseudo_snk = format!("_snk_{demand_id}");
    let mut augmentations = Vec::with_capacity(src_names.len() + dst_names.len());
    for name in &src_names {
        augmentations.push(AugmentationEdge::new(
            pseudo_src.clone(),
            name.clone(),
            LARGE_CAPACITY,
            0,
        ));
    }
    for name in &dst_names {
        augmentations.push(AugmentationEdge::new(
            name.clone(),
            pseudo_snk.clone(),
            LARGE_CAPACITY,
            0,
        ));
    }

    let expanded = ExpandedDemand {
        src_name: pseudo_src,
        dst_name: pseudo_snk,
        volume,
        priority,
        policy_preset: preset,
        demand_id: demand_id.to_string(),
    };
    (vec![expanded], augmentations)
}

fn expand_pairwise(
    demand_id: &str,
    volume: f64,
    priority: i32,
    preset: FlowPolicyPreset,
    src_groups: &BTreeMap<String, Vec<&Node>>,
    dst_groups: &BTreeMap<String, Vec<&Node>>,
) -> Expansion {
    let src_names = flatten_names(src_groups);
    let dst_names = flatten_names(dst_groups);
    let pairs: Vec<(String, String)> = src_names
        .iter()
        .flat_map(|src| {
            dst_names
                .iter()
                .filter(move |dst| *dst != src)
                .map(move |dst| (src.clone(), dst.clone()))
        })
        .collect();
    if pairs.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let volume_per_pair = volume / pairs.len() as f64;
    let demands = pairs
        .into_iter()
        .map(|(src_name, dst_name)| ExpandedDemand {
            src_name,
            dst_name,
            volume: volume_per_pair,
            priority,
            policy_preset: preset,
            demand_id: demand_id.to_string(),
        })
        .collect();
    (demands, Vec::new())
}

fn expand_one(
    td: &TrafficDemand,
    preset: FlowPolicyPreset,
    src_groups: &BTreeMap<String, Vec<&Node>>,
    dst_groups: &BTreeMap<String, Vec<&Node>>,
) -> Expansion {
    let by_mode = |id: &str, volume: f64, s: &BTreeMap<String, Vec<&Node>>, d: &BTreeMap<String, Vec<&Node>>| match td.mode {
        Mode::Combine => expand_combine(id, volume, td.priority, preset, s, d),
        Mode::Pairwise => expand_pairwise(id, volume, td.priority, preset, s, d),
    };

    match td.group_mode {
        GroupMode::Flatten => by_mode(&td.id, td.volume, src_groups, dst_groups),
        GroupMode::PerGroup => {
            // Each group pair receives the original volume, undivided.
            let mut demands = Vec::new();
            let mut augmentations = Vec::new();
            for (src_label, src_nodes) in src_groups {
                for (dst_label, dst_nodes) in dst_groups {
                    if src_label == dst_label {
                        continue;
                    }
                    let derived_id = format!("{}|{}|{}", td.id, src_label, dst_label);
                    let single_src =
                        BTreeMap::from([(src_label.clone(), src_nodes.clone())]);
                    let single_dst =
                        BTreeMap::from([(dst_label.clone(), dst_nodes.clone())]);
                    let (d, a) = by_mode(&derived_id, td.volume, &single_src, &single_dst);
                    demands.extend(d);
                    augmentations.extend(a);
                }
            }
            (demands, augmentations)
        }
        GroupMode::GroupPairwise => {
            let group_pairs: Vec<(&String, &String)> = src_groups
                .keys()
                .flat_map(|s| dst_groups.keys().filter(move |d| *d != s).map(move |d| (s, d)))
                .collect();
            if group_pairs.is_empty() {
                return (Vec::new(), Vec::new());
            }
            let volume_per_pair = td.volume / group_pairs.len() as f64;
            let mut demands = Vec::new();
            let mut augmentations = Vec::new();
            for (src_label, dst_label) in group_pairs {
                let derived_id = format!("{}|{}|{}", td.id, src_label, dst_label);
                let single_src =
                    BTreeMap::from([(src_label.clone(), src_groups[src_label].clone())]);
                let single_dst =
                    BTreeMap::from([(dst_label.clone(), dst_groups[dst_label].clone())]);
                let (d, a) = by_mode(&derived_id, volume_per_pair, &single_src, &single_dst);
                demands.extend(d);
                augmentations.extend(a);
            }
            (demands, augmentations)
        }
    }
}

/// Expand traffic demands into concrete placement units.
///
/// Selectors are evaluated with `active_only = true` by default (demand
/// context). Fails with a selection error when nothing expands.
pub fn expand_demands(
    network: &Network,
    traffic_demands: &[TrafficDemand],
    default_policy_preset: FlowPolicyPreset,
) -> NetGraphResult<DemandExpansion> {
    let mut all_demands: Vec<ExpandedDemand> = Vec::new();
    let mut all_augmentations: Vec<AugmentationEdge> = Vec::new();

    for td in traffic_demands {
        let src_selector = td.source.normalize(true)?;
        let dst_selector = td.target.normalize(true)?;
        let src_groups = select_nodes(network, &src_selector, true, None)?;
        let dst_groups = select_nodes(network, &dst_selector, true, None)?;
        if src_groups.is_empty() || dst_groups.is_empty() {
            continue;
        }
        let preset = td.flow_policy.unwrap_or(default_policy_preset);
        let (demands, augmentations) = expand_one(td, preset, &src_groups, &dst_groups);
        all_demands.extend(demands);
        all_augmentations.extend(augmentations);
    }

    if all_demands.is_empty() {
        return Err(NetGraphError::Selection(
            "no demands could be expanded: selectors matched no nodes, all matches are \
             disabled, or every source equals its target"
                .into(),
        ));
    }

    // Lower priority value first; stable for equal priorities.
    all_demands.sort_by_key(|d| d.priority);

    Ok(DemandExpansion {
        demands: all_demands,
        augmentations: all_augmentations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgraph_core::{Link, Network, Node};

    fn grid() -> Network {
        let mut network = Network::new();
        for name in ["a1", "a2", "b1", "b2"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("a1", "b1").with_id("l1").with_capacity(10.0));
        network.add_link(Link::new("a2", "b2").with_id("l2").with_capacity(10.0));
        network
    }

    const PRESET: FlowPolicyPreset = FlowPolicyPreset::ShortestPathsEcmp;

    #[test]
    fn test_pairwise_flatten_divides_volume() {
        let network = grid();
        let td = TrafficDemand::new("^a", "^b", 100.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise);
        let expansion = expand_demands(&network, &[td], PRESET).unwrap();
        assert_eq!(expansion.demands.len(), 4);
        assert!(expansion.augmentations.is_empty());
        for demand in &expansion.demands {
            assert!((demand.volume - 25.0).abs() < 1e-9);
        }
        let total: f64 = expansion.demands.iter().map(|d| d.volume).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_combine_flatten_uses_pseudo_nodes() {
        let network = grid();
        let td = TrafficDemand::new("^a", "^b", 100.0).with_id("d1");
        let expansion = expand_demands(&network, &[td], PRESET).unwrap();
        assert_eq!(expansion.demands.len(), 1);
        let demand = &expansion.demands[0];
        assert_eq!(demand.src_name, "_src_d1");
        assert_eq!(demand.dst_name, "_snk_d1");
        assert!((demand.volume - 100.0).abs() < 1e-9);
        // 2 sources + 2 sinks.
        assert_eq!(expansion.augmentations.len(), 4);
        assert!(expansion
            .augmentations
            .iter()
            .all(|aug| aug.capacity == LARGE_CAPACITY && aug.cost == 0));
    }

    #[test]
    fn test_combine_skipped_on_overlap() {
        let network = grid();
        let td = TrafficDemand::new(".*", "^a1$", 10.0).with_id("d1");
        let err = expand_demands(&network, &[td], PRESET).unwrap_err();
        assert!(err.to_string().contains("no demands"));
    }

    #[test]
    fn test_pairwise_excludes_self_pairs() {
        let network = grid();
        let td = TrafficDemand::new("^a1$", "^a", 10.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise);
        let expansion = expand_demands(&network, &[td], PRESET).unwrap();
        // a1 -> a1 filtered; only a1 -> a2 remains.
        assert_eq!(expansion.demands.len(), 1);
        assert_eq!(expansion.demands[0].dst_name, "a2");
        assert!((expansion.demands[0].volume - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_per_group_keeps_full_volume() {
        let network = grid();
        let td = TrafficDemand::new("^(a|b)1$", "^(a|b)2$", 40.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise)
            .with_group_mode(GroupMode::PerGroup);
        let expansion = expand_demands(&network, &[td], PRESET).unwrap();
        // Groups: src {a: [a1], b: [b1]}, dst {a: [a2], b: [b2]};
        // distinct-label pairs: (a,b) and (b,a). No volume division.
        assert_eq!(expansion.demands.len(), 2);
        for demand in &expansion.demands {
            assert!((demand.volume - 40.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_group_pairwise_divides_volume() {
        let network = grid();
        let td = TrafficDemand::new("^(a|b)1$", "^(a|b)2$", 40.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise)
            .with_group_mode(GroupMode::GroupPairwise);
        let expansion = expand_demands(&network, &[td], PRESET).unwrap();
        assert_eq!(expansion.demands.len(), 2);
        for demand in &expansion.demands {
            assert!((demand.volume - 20.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_per_group_derived_ids_name_pseudo_nodes() {
        let network = grid();
        let td = TrafficDemand::new("^(a|b)1$", "^(a|b)2$", 40.0)
            .with_id("d1")
            .with_group_mode(GroupMode::PerGroup);
        let expansion = expand_demands(&network, &[td], PRESET).unwrap();
        let names: Vec<&str> = expansion
            .demands
            .iter()
            .map(|d| d.src_name.as_str())
            .collect();
        assert!(names.contains(&"_src_d1|a|b"));
        assert!(names.contains(&"_src_d1|b|a"));
    }

    #[test]
    fn test_disabled_nodes_filtered() {
        let mut network = grid();
        network.add_node(Node::new("a3").disabled());
        let td = TrafficDemand::new("^a", "^b", 30.0)
            .with_id("d1")
            .with_mode(Mode::Pairwise);
        let expansion = expand_demands(&network, &[td], PRESET).unwrap();
        assert!(expansion
            .demands
            .iter()
            .all(|d| d.src_name != "a3"));
    }

    #[test]
    fn test_sorted_by_priority() {
        let network = grid();
        let low = TrafficDemand::new("^a1$", "^b1$", 1.0)
            .with_id("low")
            .with_mode(Mode::Pairwise)
            .with_priority(2);
        let high = TrafficDemand::new("^a2$", "^b2$", 1.0)
            .with_id("high")
            .with_mode(Mode::Pairwise)
            .with_priority(0);
        let expansion = expand_demands(&network, &[low, high], PRESET).unwrap();
        assert_eq!(expansion.demands[0].demand_id, "high");
        assert_eq!(expansion.demands[1].demand_id, "low");
    }
}
