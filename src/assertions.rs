//! Assertion Engine: flat/structured pre-processing and evaluation.

use crate::model::{Assertions, ChecksGroup};
use crate::result::AssertionResult;
use serde_json::Value;
use std::collections::HashMap;

/// A fully-evaluated HTTP response, as seen by assertions/captures/
/// scenarios.
pub struct ResponseContext<'a> {
    pub status_code: u16,
    pub headers: &'a HashMap<String, String>,
    pub body: &'a Value,
    pub duration_ms: u64,
    pub size_bytes: usize,
}

/// Rewrite flat `body.<path>` / `headers.<name>` keys from raw YAML
/// into the structured [`Assertions`] form. `raw` is the `assert:`
/// block as parsed generically (before typed deserialization).
pub fn normalize(raw: &Value) -> Assertions {
    let mut assertions = Assertions::default();
    let Some(map) = raw.as_object() else {
        return assertions;
    };

    for (key, value) in map {
        match key.as_str() {
            "status_code" => {
                assertions.status_code = value.as_u64().map(|v| v as u16);
            }
            "response_time_ms" => {
                if let Some(obj) = value.as_object() {
                    assertions.response_time_ms = Some(crate::model::ResponseTimeAssertion {
                        less_than: obj.get("less_than").and_then(|v| v.as_u64()),
                        greater_than: obj.get("greater_than").and_then(|v| v.as_u64()),
                    });
                }
            }
            "headers" => {
                if let Some(obj) = value.as_object() {
                    for (name, v) in obj {
                        assertions
                            .headers
                            .insert(name.clone(), value_to_checks_group(v));
                    }
                }
            }
            "body" => {
                if let Some(obj) = value.as_object() {
                    for (path, v) in obj {
                        assertions
                            .body
                            .insert(path.clone(), value_to_checks_group(v));
                    }
                }
            }
            flat if flat.starts_with("body.") => {
                let path = flat.trim_start_matches("body.").to_string();
                assertions
                    .body
                    .insert(path, ChecksGroup::from_flat_value(value.clone()));
            }
            flat if flat.starts_with("headers.") => {
                let name = flat.trim_start_matches("headers.").to_string();
                assertions
                    .headers
                    .insert(name, ChecksGroup::from_flat_value(value.clone()));
            }
            _ => {}
        }
    }

    assertions
}

fn value_to_checks_group(value: &Value) -> ChecksGroup {
    match value.as_object() {
        Some(obj) if is_structured_checks(obj) => ChecksGroup {
            equals: obj.get("equals").cloned(),
            not_equals: obj.get("not_equals").cloned(),
            contains: obj.get("contains").cloned(),
            greater_than: obj.get("greater_than").cloned(),
            less_than: obj.get("less_than").cloned(),
            regex: obj.get("regex").and_then(|v| v.as_str()).map(str::to_string),
        },
        _ => ChecksGroup::from_flat_value(value.clone()),
    }
}

fn is_structured_checks(obj: &serde_json::Map<String, Value>) -> bool {
    const KEYS: &[&str] = &[
        "equals",
        "not_equals",
        "contains",
        "greater_than",
        "less_than",
        "regex",
    ];
    obj.keys().any(|k| KEYS.contains(&k.as_str()))
}

/// Header lookup trying the given casing first, then lowercased; the
/// first match wins when both differ (spec §9 open question decision).
pub fn lookup_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a String> {
    headers
        .get(name)
        .or_else(|| headers.get(&name.to_ascii_lowercase()))
}

fn type_tolerant_eq(expected: &Value, actual: &Value) -> bool {
    if expected == actual {
        return true;
    }
    match (expected, actual) {
        (Value::Array(e), Value::Array(a)) => {
            e.len() == a.len() && e.iter().zip(a).all(|(x, y)| type_tolerant_eq(x, y))
        }
        (Value::Object(e), Value::Object(a)) => {
            e.len() == a.len()
                && e.iter()
                    .all(|(k, v)| a.get(k).is_some_and(|av| type_tolerant_eq(v, av)))
        }
        _ => scalar_string(expected) == scalar_string(actual),
    }
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn contains_check(expected: &Value, actual: &Value) -> bool {
    match actual {
        Value::String(s) => expected
            .as_str()
            .map(|e| s.contains(e))
            .unwrap_or(false),
        Value::Array(items) => items.iter().any(|item| type_tolerant_eq(expected, item)),
        Value::Object(map) => map.values().any(|v| type_tolerant_eq(expected, v)),
        _ => false,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn evaluate_checks_group(field: &str, group: &ChecksGroup, actual: &Value) -> Vec<AssertionResult> {
    let mut rows = Vec::new();

    if let Some(expected) = &group.equals {
        let passed = type_tolerant_eq(expected, actual);
        rows.push(row(field, "equals", expected.clone(), actual.clone(), passed));
    }
    if let Some(expected) = &group.not_equals {
        let passed = !type_tolerant_eq(expected, actual);
        rows.push(row(field, "not_equals", expected.clone(), actual.clone(), passed));
    }
    if let Some(expected) = &group.contains {
        let passed = contains_check(expected, actual);
        rows.push(row(field, "contains", expected.clone(), actual.clone(), passed));
    }
    if let Some(expected) = &group.greater_than {
        let passed = matches!((numeric(expected), numeric(actual)), (Some(e), Some(a)) if a > e);
        rows.push(row(field, "greater_than", expected.clone(), actual.clone(), passed));
    }
    if let Some(expected) = &group.less_than {
        let passed = matches!((numeric(expected), numeric(actual)), (Some(e), Some(a)) if a < e);
        rows.push(row(field, "less_than", expected.clone(), actual.clone(), passed));
    }
    if let Some(pattern) = &group.regex {
        let passed = actual
            .as_str()
            .and(regex::Regex::new(pattern).ok())
            .map(|re| re.is_match(actual.as_str().unwrap_or("")))
            .unwrap_or(false);
        rows.push(row(
            field,
            "regex",
            Value::String(pattern.clone()),
            actual.clone(),
            passed,
        ));
    }

    rows
}

fn row(field: &str, check: &str, expected: Value, actual: Value, passed: bool) -> AssertionResult {
    let message = if passed {
        format!("{field} {check} check passed")
    } else {
        format!("{field} {check} check failed: expected {expected}, got {actual}")
    };
    AssertionResult {
        field: field.to_string(),
        expected,
        actual,
        passed,
        message,
    }
}

/// Evaluate all assertions against a response, in canonical order:
/// status_code → headers → body (JMESPath) → response_time_ms.
pub fn evaluate(assertions: &Assertions, response: &ResponseContext) -> Vec<AssertionResult> {
    let mut rows = Vec::new();

    if let Some(expected) = assertions.status_code {
        let passed = expected == response.status_code;
        rows.push(row(
            "status_code",
            "equals",
            Value::from(expected),
            Value::from(response.status_code),
            passed,
        ));
    }

    for (name, group) in &assertions.headers {
        let actual = lookup_header(response.headers, name)
            .map(|v| Value::String(v.clone()))
            .unwrap_or(Value::Null);
        rows.extend(evaluate_checks_group(&format!("headers.{name}"), group, &actual));
    }

    for (path, group) in &assertions.body {
        let actual = match crate::capture::jmespath_search(path, response.body) {
            Ok(v) => v,
            Err(err) => {
                rows.push(row(
                    &format!("body.{path}"),
                    "jmespath",
                    Value::Null,
                    Value::Null,
                    false,
                ));
                rows.last_mut().unwrap().message = format!("invalid JMESPath '{path}': {err}");
                continue;
            }
        };
        rows.extend(evaluate_checks_group(&format!("body.{path}"), group, &actual));
    }

    if let Some(rt) = &assertions.response_time_ms {
        if let Some(max) = rt.less_than {
            let passed = response.duration_ms < max;
            rows.push(row(
                "response_time_ms",
                "less_than",
                Value::from(max),
                Value::from(response.duration_ms),
                passed,
            ));
        }
        if let Some(min) = rt.greater_than {
            let passed = response.duration_ms > min;
            rows.push(row(
                "response_time_ms",
                "greater_than",
                Value::from(min),
                Value::from(response.duration_ms),
                passed,
            ));
        }
    }

    rows
}
