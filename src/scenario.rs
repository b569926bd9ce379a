//! Scenario Engine: conditional branches appending assertions/captures.

use crate::assertions::{self, ResponseContext};
use crate::capture::{self, jmespath_search};
use crate::error::CoreError;
use crate::interpolate::{InterpolationCache, InterpolationContext};
use crate::model::{Scenario, ScenarioBlock};
use crate::result::{AssertionResult, ScenarioEvaluation};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

static ENV_REF_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$env\.[A-Za-z_][A-Za-z0-9_]*").unwrap());
static BARE_LITERAL_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\b(true|false|null|\d+(\.\d+)?)\b").unwrap());

/// Wrap bare integers/booleans/nulls in backticks and replace
/// `$env.X` tokens with a null literal, per spec §3/§9.
pub fn preprocess_condition(condition: &str) -> String {
    let with_env_elided = ENV_REF_RE.replace_all(condition, "`null`");
    wrap_bare_literals(&with_env_elided)
}

fn wrap_bare_literals(input: &str) -> String {
    let mut out = String::new();
    let mut last = 0;
    for m in BARE_LITERAL_RE.find_iter(input) {
        out.push_str(&input[last..m.start()]);
        let preceded_by_backtick = input[..m.start()].ends_with('`');
        let followed_by_backtick = input[m.end()..].starts_with('`');
        if preceded_by_backtick && followed_by_backtick {
            out.push_str(m.as_str());
        } else {
            out.push('`');
            out.push_str(m.as_str());
            out.push('`');
        }
        last = m.end();
    }
    out.push_str(&input[last..]);
    out
}

fn response_context_json(response: &ResponseContext) -> Value {
    json!({
        "status_code": response.status_code,
        "headers": response.headers,
        "body": response.body,
        "duration_ms": response.duration_ms,
        "size_bytes": response.size_bytes,
    })
}

fn is_truthy(value: &Value) -> bool {
    matches!(value, Value::Bool(true))
}

/// Evaluate one scenario's condition, apply the matching branch, and
/// return the evaluation trace plus any merged captures.
#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    scenario: &Scenario,
    response: &ResponseContext,
    interp_ctx: &InterpolationContext,
    cache: &mut InterpolationCache,
    captured: &mut HashMap<String, Value>,
) -> Result<ScenarioEvaluation, CoreError> {
    let preprocessed = preprocess_condition(&scenario.condition);
    let context_json = response_context_json(response);

    let result = jmespath_search(&preprocessed, &context_json).map_err(|reason| {
        CoreError::ScenarioCondition {
            condition: scenario.condition.clone(),
            reason,
        }
    })?;

    let matched = is_truthy(&result);
    let (branch, branch_name) = if matched {
        (scenario.then_block.as_ref(), "then")
    } else {
        (scenario.else_block.as_ref(), "else")
    };

    let mut assertion_rows: Vec<AssertionResult> = Vec::new();
    let mut branch_taken = None;

    if let Some(block) = branch {
        branch_taken = Some(branch_name.to_string());
        assertion_rows = apply_block(block, response, interp_ctx, cache, captured)?;
    }

    Ok(ScenarioEvaluation {
        condition: scenario.condition.clone(),
        matched,
        branch_taken,
        assertions: assertion_rows,
    })
}

fn apply_block(
    block: &ScenarioBlock,
    response: &ResponseContext,
    interp_ctx: &InterpolationContext,
    cache: &mut InterpolationCache,
    captured: &mut HashMap<String, Value>,
) -> Result<Vec<AssertionResult>, CoreError> {
    let rows = match &block.assert {
        Some(assertions) => assertions::evaluate(assertions, response),
        None => Vec::new(),
    };

    for (name, expr) in &block.capture {
        match capture::resolve(name, expr, response, interp_ctx, cache) {
            Ok(value) => {
                captured.insert(name.clone(), value);
            }
            Err(err) => {
                tracing::warn!(name, error = %err, "scenario capture failed");
            }
        }
    }

    Ok(rows)
}
