//! Capture Engine: extract values from a response into named variables.

use crate::assertions::ResponseContext;
use crate::error::CoreError;
use crate::interpolate::{interpolate_string, InterpolationCache, InterpolationContext};
use serde_json::{json, Value};

/// Run a JMESPath query against `data`, converting the result back
/// into a `serde_json::Value`.
pub fn jmespath_search(expr: &str, data: &Value) -> Result<Value, String> {
    let expression = jmespath::compile(expr).map_err(|e| e.to_string())?;
    let variable = expression.search(data).map_err(|e| e.to_string())?;
    serde_json::to_value(&*variable).map_err(|e| e.to_string())
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

fn is_url_like(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with('/')
}

fn coerce_literal(s: &str) -> Option<Value> {
    match s {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => s.parse::<f64>().ok().map(|n| json!(n)),
    }
}

/// Resolve one capture expression against a response. Expression
/// resolution order: a double-quoted literal; else interpolate
/// `{{...}}` then evaluate as JMESPath against the response context;
/// on JMESPath failure, fall back to a primitive literal coercion or
/// URL-like raw string; otherwise raise [`CoreError::Capture`].
pub fn resolve(
    name: &str,
    expr: &str,
    response: &ResponseContext,
    ctx: &InterpolationContext,
    cache: &mut InterpolationCache,
) -> Result<Value, CoreError> {
    let trimmed = expr.trim();

    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return Ok(Value::String(trimmed[1..trimmed.len() - 1].to_string()));
    }

    let interpolated = interpolate_string(trimmed, ctx, cache);
    let context_json = response_context_json(response);

    match jmespath_search(&interpolated, &context_json) {
        Ok(value) => Ok(value),
        Err(reason) => {
            if let Some(literal) = coerce_literal(&interpolated) {
                Ok(literal)
            } else if is_url_like(&interpolated) {
                Ok(Value::String(interpolated))
            } else {
                Err(CoreError::Capture {
                    name: name.to_string(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ExportRegistry;
    use crate::store::VariableStore;
    use std::collections::HashMap;

    fn response<'a>(body: &'a Value, headers: &'a HashMap<String, String>) -> ResponseContext<'a> {
        ResponseContext {
            status_code: 200,
            headers,
            body,
            duration_ms: 5,
            size_bytes: 20,
        }
    }

    #[test]
    fn jmespath_capture_matches_direct_search() {
        let store = VariableStore::new();
        let registry = ExportRegistry::new();
        let ctx = InterpolationContext {
            store: &store,
            registry: &registry,
            dependency_node_ids: &[],
        };
        let mut cache = InterpolationCache::new();

        let headers = HashMap::new();
        let body = json!({"count": 3});
        let resp = response(&body, &headers);

        let captured = resolve("ok_count", "body.count", &resp, &ctx, &mut cache).unwrap();
        let expected = jmespath_search("body.count", &response_context_json(&resp)).unwrap();
        assert_eq!(captured, expected);
    }

    #[test]
    fn double_quoted_literal_returns_as_is() {
        let store = VariableStore::new();
        let registry = ExportRegistry::new();
        let ctx = InterpolationContext {
            store: &store,
            registry: &registry,
            dependency_node_ids: &[],
        };
        let mut cache = InterpolationCache::new();
        let headers = HashMap::new();
        let body = json!({});
        let resp = response(&body, &headers);

        let captured = resolve("literal", "\"hello\"", &resp, &ctx, &mut cache).unwrap();
        assert_eq!(captured, json!("hello"));
    }

    #[test]
    fn invalid_expression_raises_capture_error() {
        let store = VariableStore::new();
        let registry = ExportRegistry::new();
        let ctx = InterpolationContext {
            store: &store,
            registry: &registry,
            dependency_node_ids: &[],
        };
        let mut cache = InterpolationCache::new();
        let headers = HashMap::new();
        let body = json!({});
        let resp = response(&body, &headers);

        let err = resolve("bad", "body.[[[", &resp, &ctx, &mut cache).unwrap_err();
        assert!(matches!(err, CoreError::Capture { .. }));
    }
}
