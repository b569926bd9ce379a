//! Step Executor: the six-stage per-step pipeline.

use crate::assertions::{self, ResponseContext};
use crate::capture;
use crate::capture::jmespath_search;
use crate::error::CoreError;
use crate::http_client::HttpClient;
use crate::interpolate::{interpolate_value, InterpolationCache, InterpolationContext};
use crate::model::{CallSpec, OnCallError, Request, Step, Suite};
use crate::registry::ExportRegistry;
use crate::result::{RequestInfo, ResponseInfo, StepResult, StepStatus};
use crate::scenario;
use crate::store::{Scope, VariableStore};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use tracing::{instrument, warn};

/// Everything a step needs beyond its own definition: store/registry,
/// the HTTP client, and enough of the suite graph to resolve `call`.
pub struct ExecutionContext<'a> {
    pub store: &'a mut VariableStore,
    pub registry: &'a mut ExportRegistry,
    pub http_client: &'a HttpClient,
    pub base_url: Option<String>,
    pub cache: &'a mut InterpolationCache,
    pub node_id: String,
    pub suite_exports: Vec<String>,
    pub dependency_node_ids: Vec<String>,
    pub all_suites: &'a HashMap<String, Suite>,
    /// lower-cased, trimmed filter tokens; empty means "no filter".
    pub step_filter: Vec<String>,
}

fn matches_step_filter(step_id: &str, qualified: &str, filter: &[String]) -> bool {
    if filter.is_empty() {
        return true;
    }
    let step_id_lower = step_id.to_ascii_lowercase();
    let qualified_lower = qualified.to_ascii_lowercase();
    filter.iter().any(|f| *f == step_id_lower || *f == qualified_lower)
}

fn resolve_suite_by_relative_path<'a>(
    all_suites: &'a HashMap<String, Suite>,
    relative_path: &str,
) -> Option<&'a Suite> {
    if Path::new(relative_path).is_absolute() {
        return None;
    }
    let stem = Path::new(relative_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(relative_path);

    all_suites.values().find(|s| {
        let file_path = s.file_path.to_string_lossy();
        file_path.ends_with(relative_path)
            || s.file_path
                .file_stem()
                .and_then(|fs| fs.to_str())
                .is_some_and(|fs| fs == stem)
    })
}

/// Execute one step, including any `iterate` loop, producing a
/// [`StepResult`].
#[instrument(skip(step, ctx), fields(step = %step.name))]
pub async fn execute(step: &Step, ctx: &mut ExecutionContext<'_>) -> StepResult {
    let step_id = step.resolved_step_id();
    let qualified_step_id = format!("{}::{}", ctx.node_id, step_id);
    let normalized_qualified = qualified_step_id.to_ascii_lowercase();
    let _ = &normalized_qualified;

    if !matches_step_filter(&step_id, &qualified_step_id, &ctx.step_filter) {
        return StepResult {
            name: step.name.clone(),
            step_id,
            qualified_step_id,
            status: StepStatus::Skipped,
            error: None,
            request: None,
            response: None,
            assertions: Vec::new(),
            captured_variables: HashMap::new(),
            scenario_evaluations: Vec::new(),
            duration_ms: 0,
        };
    }

    let started = Instant::now();

    let result = if let Some(call) = &step.call {
        execute_call(step, call, ctx).await
    } else {
        let max_iterations = step.iterate.as_ref().map(|i| i.count).unwrap_or(1).max(1);
        let interval_ms = step.iterate.as_ref().map(|i| i.interval_ms).unwrap_or(0);
        let until = step.iterate.as_ref().and_then(|i| i.until.clone());

        let mut last = execute_once(step, ctx).await;
        for _ in 1..max_iterations {
            if let Some(ref cond) = until {
                if let Some(done) = check_until(cond, &last) {
                    if done {
                        break;
                    }
                }
            } else if matches!(last.0, StepStatus::Success) {
                break;
            }
            if interval_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(interval_ms)).await;
            }
            last = execute_once(step, ctx).await;
        }
        last
    };

    let (status, error, request, response, assertion_rows, captured, scenario_evals) = result;

    StepResult {
        name: step.name.clone(),
        step_id,
        qualified_step_id,
        status,
        error,
        request,
        response,
        assertions: assertion_rows,
        captured_variables: captured,
        scenario_evaluations: scenario_evals,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

type StepOutcome = (
    StepStatus,
    Option<String>,
    Option<RequestInfo>,
    Option<ResponseInfo>,
    Vec<crate::result::AssertionResult>,
    HashMap<String, Value>,
    Vec<crate::result::ScenarioEvaluation>,
);

fn check_until(condition: &str, outcome: &StepOutcome) -> Option<bool> {
    let response = outcome.3.as_ref()?;
    let context = serde_json::json!({
        "status_code": response.status_code,
        "headers": response.headers,
        "body": response.body,
        "duration_ms": response.total_ms,
        "size_bytes": response.size_bytes,
    });
    let preprocessed = scenario::preprocess_condition(condition);
    jmespath_search(&preprocessed, &context)
        .ok()
        .map(|v| matches!(v, Value::Bool(true)))
}

async fn execute_once(step: &Step, ctx: &mut ExecutionContext<'_>) -> StepOutcome {
    let Some(request_spec) = &step.request else {
        return (
            StepStatus::Skipped,
            Some("step has no request and no call block".to_string()),
            None,
            None,
            Vec::new(),
            HashMap::new(),
            Vec::new(),
        );
    };

    let interpolated_request = interpolate_request(request_spec, ctx);

    let (request_info, response_info) = match ctx
        .http_client
        .send(&interpolated_request, ctx.base_url.as_deref())
        .await
    {
        Ok(pair) => pair,
        Err(err) => {
            return (
                StepStatus::Failure,
                Some(err.to_string()),
                None,
                None,
                Vec::new(),
                HashMap::new(),
                Vec::new(),
            );
        }
    };

    let response_body = response_info.body.clone().unwrap_or(Value::Null);
    let response_ctx = ResponseContext {
        status_code: response_info.status_code,
        headers: &response_info.headers,
        body: &response_body,
        duration_ms: response_info.total_ms,
        size_bytes: response_info.size_bytes,
    };

    let assertion_rows = step
        .assert
        .as_ref()
        .map(|a| assertions::evaluate(a, &response_ctx))
        .unwrap_or_default();

    let mut captured = HashMap::new();
    {
        let interp_ctx = InterpolationContext {
            store: &*ctx.store,
            registry: &*ctx.registry,
            dependency_node_ids: &ctx.dependency_node_ids,
        };
        for (name, expr) in &step.capture {
            match capture::resolve(name, expr, &response_ctx, &interp_ctx, ctx.cache) {
                Ok(value) => {
                    captured.insert(name.clone(), value);
                }
                Err(err) => warn!(name, error = %err, "capture failed, variable not written"),
            }
        }
    }

    let mut scenario_evals = Vec::new();
    let mut scenario_failed = false;
    {
        let interp_ctx = InterpolationContext {
            store: &*ctx.store,
            registry: &*ctx.registry,
            dependency_node_ids: &ctx.dependency_node_ids,
        };
        for scn in &step.scenarios {
            match scenario::evaluate(scn, &response_ctx, &interp_ctx, ctx.cache, &mut captured) {
                Ok(eval) => {
                    if eval.assertions.iter().any(|r| !r.passed) {
                        scenario_failed = true;
                    }
                    scenario_evals.push(eval);
                }
                Err(err) => {
                    scenario_failed = true;
                    scenario_evals.push(crate::result::ScenarioEvaluation {
                        condition: scn.condition.clone(),
                        matched: false,
                        branch_taken: None,
                        assertions: vec![crate::result::AssertionResult {
                            field: "scenario.condition".to_string(),
                            expected: Value::String("valid JMESPath".to_string()),
                            actual: Value::Null,
                            passed: false,
                            message: err.to_string(),
                        }],
                    });
                }
            }
        }
    }

    for (name, value) in &captured {
        ctx.store.set(Scope::Runtime, name.clone(), value.clone());
        ctx.cache.invalidate(name);
        if ctx.suite_exports.iter().any(|e| e == name) {
            ctx.registry
                .set_exported_variable(&ctx.node_id, name, value.clone());
        }
    }

    let assertions_failed = assertion_rows.iter().any(|r| !r.passed);
    let status = if assertions_failed || scenario_failed {
        StepStatus::Failure
    } else {
        StepStatus::Success
    };

    (
        status,
        None,
        Some(request_info),
        Some(response_info),
        assertion_rows,
        captured,
        scenario_evals,
    )
}

fn interpolate_request(request: &Request, ctx: &mut ExecutionContext<'_>) -> Request {
    let interp_ctx = InterpolationContext {
        store: &*ctx.store,
        registry: &*ctx.registry,
        dependency_node_ids: &ctx.dependency_node_ids,
    };

    let url = crate::interpolate::interpolate_string(&request.url, &interp_ctx, ctx.cache);
    let headers: HashMap<String, String> = request
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), crate::interpolate::interpolate_string(v, &interp_ctx, ctx.cache)))
        .collect();
    let query: HashMap<String, String> = request
        .query
        .iter()
        .map(|(k, v)| (k.clone(), crate::interpolate::interpolate_string(v, &interp_ctx, ctx.cache)))
        .collect();
    let body = request
        .body
        .as_ref()
        .map(|b| interpolate_value(b, &interp_ctx, ctx.cache));

    Request {
        method: request.method,
        url,
        headers,
        query,
        body,
    }
}

async fn execute_call(
    caller_step: &Step,
    call: &CallSpec,
    ctx: &mut ExecutionContext<'_>,
) -> StepOutcome {
    let _ = caller_step;

    let Some(target_suite) = resolve_suite_by_relative_path(ctx.all_suites, &call.test) else {
        let message = format!("call target suite '{}' could not be resolved", call.test);
        return match call.on_error {
            OnCallError::Continue => (
                StepStatus::Skipped,
                Some(message),
                None,
                None,
                Vec::new(),
                HashMap::new(),
                Vec::new(),
            ),
            OnCallError::Fail => (
                StepStatus::Failure,
                Some(message),
                None,
                None,
                Vec::new(),
                HashMap::new(),
                Vec::new(),
            ),
        };
    };

    let Some(target_step) = target_suite
        .steps
        .iter()
        .find(|s| s.resolved_step_id() == call.step)
        .cloned()
    else {
        let message = format!(
            "call target step '{}' not found in suite '{}'",
            call.step, target_suite.node_id
        );
        return match call.on_error {
            OnCallError::Continue => (
                StepStatus::Skipped,
                Some(message),
                None,
                None,
                Vec::new(),
                HashMap::new(),
                Vec::new(),
            ),
            OnCallError::Fail => (
                StepStatus::Failure,
                Some(message),
                None,
                None,
                Vec::new(),
                HashMap::new(),
                Vec::new(),
            ),
        };
    };

    let target_node_id = target_suite.node_id.clone();
    let target_variables = target_suite.variables.clone();
    let target_exports = target_suite.exports.clone();

    let snapshot = if call.isolate_context {
        let snap = ctx.store.snapshot();
        ctx.store.clear_suite_scopes();
        ctx.store
            .set_many(Scope::Runtime, call.variables.clone());
        ctx.store.set_many(Scope::Suite, target_variables);
        Some(snap)
    } else {
        ctx.store.set_many(Scope::Runtime, call.variables.clone());
        None
    };

    let original_node_id = ctx.node_id.clone();
    let original_exports = ctx.suite_exports.clone();
    let original_deps = ctx.dependency_node_ids.clone();
    ctx.node_id = target_node_id.clone();
    ctx.suite_exports = target_exports;
    ctx.dependency_node_ids = Vec::new();

    let inner = execute_once(&target_step, ctx).await;

    ctx.node_id = original_node_id;
    ctx.suite_exports = original_exports;
    ctx.dependency_node_ids = original_deps;

    let inner_status = inner.0;
    let mut namespaced_captures = HashMap::new();
    for (name, value) in &inner.5 {
        namespaced_captures.insert(format!("{target_node_id}.{name}"), value.clone());
    }

    if let Some(snap) = snapshot {
        ctx.store.restore(snap);
    }

    for (name, value) in &namespaced_captures {
        ctx.store.set(Scope::Runtime, name.clone(), value.clone());
    }

    match (inner_status, call.on_error) {
        (StepStatus::Failure, OnCallError::Continue) => (
            StepStatus::Skipped,
            inner.1,
            inner.2,
            inner.3,
            inner.4,
            namespaced_captures,
            inner.6,
        ),
        _ => (
            inner_status,
            inner.1,
            inner.2,
            inner.3,
            inner.4,
            namespaced_captures,
            inner.6,
        ),
    }
}
