//! Monte Carlo failure analysis engine.
//!
//! [`FailureManager`] drives failure iterations over a shared, read-only
//! network. Per run it:
//!
//! 1. always executes one baseline task (no exclusions) first, kept
//!    separate from the failure results;
//! 2. pre-computes every iteration's exclusion sets and deduplicates
//!    identical failure patterns, mapping each unique pattern to one
//!    representative task and an occurrence count;
//! 3. executes the unique tasks serially or on a rayon pool of
//!    `min(parallelism, unique_tasks)` workers; the network and any
//!    pre-built context are shared by reference, never copied or
//!    mutated;
//! 4. enriches each result with a stable `failure_id` (BLAKE2s, 8-byte
//!    digest, of the sorted exclusion sets), the failure state, the
//!    representative trace, and the occurrence count, preserving
//!    first-seen order.
//!
//! Worker errors abort the whole run; there is no partial salvage.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;
use std::time::Instant;

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2sVar;
use chrono::{DateTime, Utc};
use netgraph_analysis::{FailureState, FlowIterationResult};
use netgraph_core::{NetGraphError, NetGraphResult, Network};
use netgraph_scenarios::{
    compute_exclusions, EntityAttrs, Exclusions, FailurePolicy, FailurePolicySet, FailureTrace,
};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::profile::WorkerProfiler;

/// Worker-pool sizing for a Monte Carlo run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// Use the host's logical CPU count.
    Auto,
    Fixed(usize),
}

impl Parallelism {
    pub fn resolve(&self) -> NetGraphResult<usize> {
        match self {
            Parallelism::Auto => Ok(num_cpus::get().max(1)),
            Parallelism::Fixed(0) => Err(NetGraphError::Parameter(
                "parallelism must be >= 1".into(),
            )),
            Parallelism::Fixed(n) => Ok(*n),
        }
    }
}

/// Execution metadata of one Monte Carlo run.
#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloMetadata {
    pub iterations: usize,
    pub parallelism: usize,
    pub unique_patterns: usize,
    pub execution_time: f64,
    pub analysis_function: String,
    pub policy_name: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Outcome of [`FailureManager::run_monte_carlo_analysis`].
#[derive(Debug)]
pub struct MonteCarloResult {
    /// The no-failure reference run, never mixed into `results`.
    pub baseline: FlowIterationResult,
    /// Unique failure patterns in first-seen order, enriched with
    /// provenance and occurrence counts.
    pub results: Vec<FlowIterationResult>,
    pub metadata: MonteCarloMetadata,
}

/// Stable failure identifier: BLAKE2s with an 8-byte digest over
/// `sorted(nodes).join(",") + "|" + sorted(links).join(",")`. Empty
/// exclusions (the baseline) map to the empty string.
pub fn failure_id(nodes: &BTreeSet<String>, links: &BTreeSet<String>) -> String {
    if nodes.is_empty() && links.is_empty() {
        return String::new();
    }
    let payload = format!(
        "{}|{}",
        nodes.iter().cloned().collect::<Vec<_>>().join(","),
        links.iter().cloned().collect::<Vec<_>>().join(",")
    );
    let mut hasher = Blake2sVar::new(8).expect("8-byte blake2s digest");
    hasher.update(payload.as_bytes());
    let mut digest = [0u8; 8];
    hasher
        .finalize_variable(&mut digest)
        .expect("blake2s finalize");
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

struct UniqueTask {
    exclusions: Exclusions,
    count: usize,
    trace: Option<FailureTrace>,
}

/// Failure analysis engine with Monte Carlo capabilities.
///
/// Generic over the analysis function: anything taking the network plus
/// exclusion sets and returning a [`FlowIterationResult`] can run under
/// the same dedup/parallelism/enrichment machinery.
pub struct FailureManager<'a> {
    network: &'a Network,
    policy_set: &'a FailurePolicySet,
    policy_name: Option<String>,
    entity_attrs: OnceLock<EntityAttrs>,
}

impl<'a> FailureManager<'a> {
    pub fn new(
        network: &'a Network,
        policy_set: &'a FailurePolicySet,
        policy_name: Option<String>,
    ) -> Self {
        Self {
            network,
            policy_set,
            policy_name,
            entity_attrs: OnceLock::new(),
        }
    }

    pub fn network(&self) -> &'a Network {
        self.network
    }

    /// The selected failure policy, or `None` when no policy applies.
    pub fn get_failure_policy(&self) -> NetGraphResult<Option<&'a FailurePolicy>> {
        match &self.policy_name {
            Some(name) => self
                .policy_set
                .get_policy(name)
                .map(Some)
                .map_err(|_| {
                    NetGraphError::Config(format!("failure policy '{name}' not found"))
                }),
            None => Ok(None),
        }
    }

    fn attrs(&self) -> &EntityAttrs {
        self.entity_attrs
            .get_or_init(|| EntityAttrs::from_network(self.network))
    }

    /// Exclusion sets for one iteration under the selected policy.
    pub fn compute_exclusions(
        &self,
        seed_offset: Option<u64>,
        trace: Option<&mut FailureTrace>,
    ) -> NetGraphResult<Exclusions> {
        let policy = self.get_failure_policy()?;
        compute_exclusions(self.network, self.attrs(), policy, seed_offset, trace)
    }

    /// Run Monte Carlo failure analysis with any analysis function.
    ///
    /// The baseline always runs first, serially. Without effective rules
    /// in the selected policy the failure iteration count is forced to 0.
    /// Per-iteration seeds derive from `seed + iteration_index`.
    pub fn run_monte_carlo_analysis<F>(
        &self,
        analysis: F,
        analysis_name: &str,
        iterations: usize,
        parallelism: Parallelism,
        seed: Option<u64>,
        store_failure_patterns: bool,
    ) -> NetGraphResult<MonteCarloResult>
    where
        F: Fn(&Network, &BTreeSet<String>, &BTreeSet<String>) -> NetGraphResult<FlowIterationResult>
            + Sync,
    {
        if iterations == 0 {
            return Err(NetGraphError::Parameter("iterations must be >= 1".into()));
        }
        let workers = parallelism.resolve()?;
        let started_at = Utc::now();

        let policy = self.get_failure_policy()?;
        let has_effective_rules = policy
            .map(FailurePolicy::has_effective_rules)
            .unwrap_or(false);
        let effective_iterations = if has_effective_rules { iterations } else { 0 };
        info!(
            iterations = effective_iterations,
            workers, analysis_name, "running baseline + failure iterations"
        );

        // Pre-compute exclusions and dedup unique patterns (first-seen
        // order preserved by the task vector).
        let mut tasks: Vec<UniqueTask> = Vec::new();
        let mut task_index: HashMap<(BTreeSet<String>, BTreeSet<String>), usize> = HashMap::new();
        for i in 0..effective_iterations {
            let seed_offset = seed.map(|s| s + i as u64);
            let mut trace = store_failure_patterns.then(FailureTrace::default);
            let exclusions = self.compute_exclusions(seed_offset, trace.as_mut())?;
            let key = (exclusions.nodes.clone(), exclusions.links.clone());
            match task_index.get(&key) {
                Some(&idx) => tasks[idx].count += 1,
                None => {
                    task_index.insert(key, tasks.len());
                    tasks.push(UniqueTask {
                        exclusions,
                        count: 1,
                        trace,
                    });
                }
            }
        }
        let unique_patterns = tasks.len();
        if effective_iterations > 0 {
            info!(
                unique_patterns,
                iterations = effective_iterations,
                "monte-carlo deduplication complete"
            );
        }

        let run_start = Instant::now();

        // Baseline first, always serial.
        let empty = BTreeSet::new();
        let mut baseline = analysis(self.network, &empty, &empty)?;
        baseline.failure_id = String::new();
        baseline.failure_state = Some(FailureState::default());
        baseline.failure_trace = None;

        // Unique failure tasks.
        let use_parallel = workers > 1 && unique_patterns > 1;
        let raw_results: Vec<FlowIterationResult> = if use_parallel {
            let pool = ThreadPoolBuilder::new()
                .num_threads(workers.min(unique_patterns))
                .build()
                .map_err(|err| {
                    NetGraphError::Other(format!("building worker pool: {err}"))
                })?;
            pool.install(|| {
                tasks
                    .par_iter()
                    .map(|task| {
                        let profiler = WorkerProfiler::begin(analysis_name, false);
                        let result = analysis(
                            self.network,
                            &task.exclusions.nodes,
                            &task.exclusions.links,
                        );
                        if let Some(profiler) = profiler {
                            profiler.finish();
                        }
                        result
                    })
                    .collect::<NetGraphResult<Vec<_>>>()
            })?
        } else {
            let mut results = Vec::with_capacity(tasks.len());
            for task in &tasks {
                debug!(
                    nodes = task.exclusions.nodes.len(),
                    links = task.exclusions.links.len(),
                    "serial failure task"
                );
                results.push(analysis(
                    self.network,
                    &task.exclusions.nodes,
                    &task.exclusions.links,
                )?);
            }
            results
        };

        // Enrich with provenance, first-seen order.
        let mut results = Vec::with_capacity(raw_results.len());
        for (task, mut result) in tasks.into_iter().zip(raw_results) {
            result.failure_id =
                failure_id(&task.exclusions.nodes, &task.exclusions.links);
            result.failure_state = Some(FailureState {
                excluded_nodes: task.exclusions.nodes.iter().cloned().collect(),
                excluded_links: task.exclusions.links.iter().cloned().collect(),
            });
            result.failure_trace = if store_failure_patterns {
                task.trace
            } else {
                None
            };
            result.occurrence_count = task.count;
            results.push(result);
        }

        let execution_time = run_start.elapsed().as_secs_f64();
        info!(execution_time, "monte-carlo analysis complete");

        Ok(MonteCarloResult {
            baseline,
            results,
            metadata: MonteCarloMetadata {
                iterations: effective_iterations,
                parallelism: workers,
                unique_patterns,
                execution_time,
                analysis_function: analysis_name.to_string(),
                policy_name: self.policy_name.clone(),
                started_at,
            },
        })
    }

    /// Convenience: run one failure iteration and return its result, or
    /// the baseline when no failure applies.
    pub fn run_single_failure_scenario<F>(
        &self,
        analysis: F,
        analysis_name: &str,
        seed: Option<u64>,
    ) -> NetGraphResult<FlowIterationResult>
    where
        F: Fn(&Network, &BTreeSet<String>, &BTreeSet<String>) -> NetGraphResult<FlowIterationResult>
            + Sync,
    {
        let mut outcome = self.run_monte_carlo_analysis(
            analysis,
            analysis_name,
            1,
            Parallelism::Fixed(1),
            seed,
            false,
        )?;
        if outcome.results.is_empty() {
            Ok(outcome.baseline)
        } else {
            Ok(outcome.results.remove(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netgraph_analysis::{FlowEntry, FlowSummary};
    use netgraph_core::{Link, Node};
    use netgraph_scenarios::{FailureMode, FailureRule, RuleScope, SelectionMode};

    fn triangle() -> Network {
        let mut network = Network::new();
        for name in ["A", "B", "C"] {
            network.add_node(Node::new(name));
        }
        network.add_link(Link::new("A", "B").with_id("ab").with_capacity(10.0).with_cost(1));
        network.add_link(Link::new("B", "C").with_id("bc").with_capacity(10.0).with_cost(1));
        network.add_link(Link::new("A", "C").with_id("ac").with_capacity(5.0).with_cost(1));
        network
    }

    fn single_link_policy_set() -> FailurePolicySet {
        let mut set = FailurePolicySet::new();
        set.insert(
            "single_link",
            FailurePolicy::new(vec![FailureMode::new(
                1.0,
                vec![FailureRule::new(RuleScope::Link)
                    .with_mode(SelectionMode::Choice)
                    .with_count(1)],
            )]),
        );
        set
    }

    /// Analysis stub: counts included links as "flow".
    fn counting_analysis(
        network: &Network,
        _excluded_nodes: &BTreeSet<String>,
        excluded_links: &BTreeSet<String>,
    ) -> NetGraphResult<FlowIterationResult> {
        let live = network
            .links
            .keys()
            .filter(|id| !excluded_links.contains(*id))
            .count() as f64;
        let entry = FlowEntry::new("A", "C", 0, live, live, 0.0)?;
        let summary = FlowSummary::new(live, live, 0, 1)?;
        FlowIterationResult::new(vec![entry], summary)
    }

    #[test]
    fn test_baseline_always_present() {
        let network = triangle();
        let set = single_link_policy_set();
        let manager = FailureManager::new(&network, &set, Some("single_link".into()));
        let outcome = manager
            .run_monte_carlo_analysis(
                counting_analysis,
                "counting",
                5,
                Parallelism::Fixed(1),
                Some(42),
                false,
            )
            .unwrap();
        assert_eq!(outcome.baseline.failure_id, "");
        assert!((outcome.baseline.summary.total_placed - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_occurrence_counts_sum_to_iterations() {
        let network = triangle();
        let set = single_link_policy_set();
        let manager = FailureManager::new(&network, &set, Some("single_link".into()));
        let outcome = manager
            .run_monte_carlo_analysis(
                counting_analysis,
                "counting",
                12,
                Parallelism::Fixed(1),
                Some(42),
                false,
            )
            .unwrap();
        let total: usize = outcome.results.iter().map(|r| r.occurrence_count).sum();
        assert_eq!(total, 12);
        assert!(outcome.results.len() <= 3);
        assert_eq!(outcome.metadata.unique_patterns, outcome.results.len());
    }

    #[test]
    fn test_no_duplicate_dedup_keys() {
        let network = triangle();
        let set = single_link_policy_set();
        let manager = FailureManager::new(&network, &set, Some("single_link".into()));
        let outcome = manager
            .run_monte_carlo_analysis(
                counting_analysis,
                "counting",
                20,
                Parallelism::Fixed(1),
                Some(7),
                false,
            )
            .unwrap();
        let mut seen = BTreeSet::new();
        for result in &outcome.results {
            assert!(seen.insert(result.failure_id.clone()));
        }
    }

    #[test]
    fn test_determinism_under_seed() {
        let network = triangle();
        let set = single_link_policy_set();
        let manager = FailureManager::new(&network, &set, Some("single_link".into()));
        let run = |parallelism| {
            manager
                .run_monte_carlo_analysis(
                    counting_analysis,
                    "counting",
                    10,
                    parallelism,
                    Some(42),
                    true,
                )
                .unwrap()
        };
        let first = run(Parallelism::Fixed(1));
        let second = run(Parallelism::Fixed(4));
        assert_eq!(first.results.len(), second.results.len());
        for (a, b) in first.results.iter().zip(second.results.iter()) {
            assert_eq!(a.failure_id, b.failure_id);
            assert_eq!(a.occurrence_count, b.occurrence_count);
            assert_eq!(a.failure_state, b.failure_state);
        }
    }

    #[test]
    fn test_no_policy_runs_baseline_only() {
        let network = triangle();
        let set = FailurePolicySet::new();
        let manager = FailureManager::new(&network, &set, None);
        let outcome = manager
            .run_monte_carlo_analysis(
                counting_analysis,
                "counting",
                50,
                Parallelism::Fixed(1),
                Some(1),
                false,
            )
            .unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.metadata.iterations, 0);
    }

    #[test]
    fn test_unknown_policy_errors() {
        let network = triangle();
        let set = FailurePolicySet::new();
        let manager = FailureManager::new(&network, &set, Some("missing".into()));
        assert!(manager
            .run_monte_carlo_analysis(
                counting_analysis,
                "counting",
                1,
                Parallelism::Fixed(1),
                None,
                false,
            )
            .is_err());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let network = triangle();
        let set = single_link_policy_set();
        let manager = FailureManager::new(&network, &set, Some("single_link".into()));
        assert!(manager
            .run_monte_carlo_analysis(
                counting_analysis,
                "counting",
                0,
                Parallelism::Fixed(1),
                None,
                false,
            )
            .is_err());
        assert!(Parallelism::Fixed(0).resolve().is_err());
    }

    #[test]
    fn test_failure_id_stability() {
        let mut nodes = BTreeSet::new();
        nodes.insert("B".to_string());
        nodes.insert("A".to_string());
        let mut links = BTreeSet::new();
        links.insert("l1".to_string());
        let first = failure_id(&nodes, &links);
        let second = failure_id(&nodes, &links);
        assert_eq!(first, second);
        assert_eq!(first.len(), 16); // 8 bytes hex
        assert_eq!(failure_id(&BTreeSet::new(), &BTreeSet::new()), "");
    }

    #[test]
    fn test_traces_stored_on_request() {
        let network = triangle();
        let set = single_link_policy_set();
        let manager = FailureManager::new(&network, &set, Some("single_link".into()));
        let outcome = manager
            .run_monte_carlo_analysis(
                counting_analysis,
                "counting",
                5,
                Parallelism::Fixed(1),
                Some(42),
                true,
            )
            .unwrap();
        for result in &outcome.results {
            let trace = result.failure_trace.as_ref().expect("trace stored");
            assert_eq!(trace.mode_index, Some(0));
            assert!(!trace.selections.is_empty());
        }
        assert!(outcome.baseline.failure_trace.is_none());
    }

    #[test]
    fn test_worker_error_aborts_run() {
        let network = triangle();
        let set = single_link_policy_set();
        let manager = FailureManager::new(&network, &set, Some("single_link".into()));
        let failing = |_: &Network,
                       _: &BTreeSet<String>,
                       excluded_links: &BTreeSet<String>|
         -> NetGraphResult<FlowIterationResult> {
            if excluded_links.is_empty() {
                // Baseline succeeds.
                let entry = FlowEntry::new("A", "C", 0, 1.0, 1.0, 0.0)?;
                let summary = FlowSummary::new(1.0, 1.0, 0, 1)?;
                FlowIterationResult::new(vec![entry], summary)
            } else {
                Err(NetGraphError::Other("worker exploded".into()))
            }
        };
        let err = manager
            .run_monte_carlo_analysis(
                failing,
                "failing",
                5,
                Parallelism::Fixed(4),
                Some(42),
                false,
            )
            .unwrap_err();
        assert!(err.to_string().contains("worker exploded"));
    }

    #[test]
    fn test_single_failure_scenario() {
        let network = triangle();
        let set = single_link_policy_set();
        let manager = FailureManager::new(&network, &set, Some("single_link".into()));
        let result = manager
            .run_single_failure_scenario(counting_analysis, "counting", Some(42))
            .unwrap();
        assert!(!result.failure_id.is_empty());
        assert!((result.summary.total_placed - 2.0).abs() < 1e-9);
    }
}
