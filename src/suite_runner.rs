//! Suite Runner: execute one suite's steps sequentially.

use crate::events::{Event, EventBus};
use crate::http_client::HttpClient;
use crate::interpolate::InterpolationCache;
use crate::model::Suite;
use crate::registry::ExportRegistry;
use crate::result::{StepResult, StepStatus, SuiteResult, SuiteStatus};
use crate::step_executor::{self, ExecutionContext};
use crate::store::VariableStore;
use std::collections::HashMap;
use std::time::Instant;
use tracing::instrument;

/// A suite succeeds if every step is `success` or `skipped`; any
/// `failure` makes the suite `failure`.
fn compute_status(steps: &[StepResult]) -> SuiteStatus {
    if steps.iter().any(|s| s.status == StepStatus::Failure) {
        SuiteStatus::Failure
    } else {
        SuiteStatus::Success
    }
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(node_id = %suite.node_id))]
pub async fn run(
    suite: &Suite,
    store: &mut VariableStore,
    registry: &mut ExportRegistry,
    http_client: &HttpClient,
    base_url: Option<String>,
    cache: &mut InterpolationCache,
    dependency_node_ids: Vec<String>,
    all_suites: &HashMap<String, Suite>,
    step_filter: Vec<String>,
    events: &EventBus,
) -> SuiteResult {
    events.emit(Event::SuiteStart { node_id: &suite.node_id }).await;

    let started = Instant::now();
    let mut steps_results = Vec::with_capacity(suite.steps.len());

    let mut exec_ctx = ExecutionContext {
        store,
        registry,
        http_client,
        base_url,
        cache,
        node_id: suite.node_id.clone(),
        suite_exports: suite.exports.clone(),
        dependency_node_ids,
        all_suites,
        step_filter,
    };

    for step in &suite.steps {
        events
            .emit(Event::StepStart {
                node_id: &suite.node_id,
                step_name: &step.name,
            })
            .await;

        let step_result = step_executor::execute(step, &mut exec_ctx).await;

        events
            .emit(Event::StepEnd {
                node_id: &suite.node_id,
                step: &step_result,
            })
            .await;

        steps_results.push(step_result);
    }

    let status = compute_status(&steps_results);
    let error = if status == SuiteStatus::Failure {
        steps_results
            .iter()
            .find(|s| s.status == StepStatus::Failure)
            .and_then(|s| s.error.clone())
    } else {
        None
    };

    let result = SuiteResult {
        node_id: suite.node_id.clone(),
        suite_name: suite.suite_name.clone(),
        status,
        steps_results,
        duration_ms: started.elapsed().as_millis() as u64,
        error,
    };

    events.emit(Event::SuiteEnd { suite: &result }).await;
    result
}
