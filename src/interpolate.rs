//! `{{EXPR}}` template interpolation over `serde_json::Value` trees.

use crate::registry::ExportRegistry;
use crate::store::VariableStore;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::warn;

static TOKEN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").unwrap());

/// Read-only view the interpolator needs to resolve an expression.
pub struct InterpolationContext<'a> {
    pub store: &'a VariableStore,
    pub registry: &'a ExportRegistry,
    /// node ids the current suite declares as dependencies, used as
    /// the fallback lookup for an unqualified name published by one
    /// of them.
    pub dependency_node_ids: &'a [String],
}

#[derive(Debug, Clone, PartialEq)]
enum ExprKind {
    Js(String),
    EnvRef(String),
    Faker(String),
    DottedPath(String),
    Bare(String),
}

fn classify(expr: &str) -> ExprKind {
    let trimmed = expr.trim();
    if let Some(code) = trimmed.strip_prefix("js:") {
        ExprKind::Js(code.trim().to_string())
    } else if let Some(rest) = trimmed.strip_prefix("$env.") {
        ExprKind::EnvRef(rest.to_string())
    } else if let Some(rest) = trimmed.strip_prefix("$faker.") {
        ExprKind::Faker(rest.to_string())
    } else if trimmed.contains('.') {
        ExprKind::DottedPath(trimmed.to_string())
    } else {
        ExprKind::Bare(trimmed.to_string())
    }
}

/// Stringify a resolved value per the canonical rules: strings
/// unchanged, numbers/booleans via their display form, null/missing as
/// empty string, objects/arrays as compact JSON text.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(_) | Value::Bool(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}

fn walk_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = if let Ok(idx) = segment.parse::<usize>() {
            current.get(idx)?
        } else {
            current.get(segment)?
        };
    }
    Some(current)
}

fn resolve_dotted_path(expr: &str, ctx: &InterpolationContext) -> Option<Value> {
    if ctx.registry.contains_full_name(expr) {
        if let Some(v) = ctx.registry.get_exported_variable(expr) {
            return Some(v.clone());
        }
    }

    let mut parts = expr.splitn(2, '.');
    let head = parts.next()?;
    let rest = parts.next();

    if let Some(base) = ctx.store.get(head) {
        return match rest {
            Some(path) => walk_path(base, path).cloned(),
            None => Some(base.clone()),
        };
    }

    for dep in ctx.dependency_node_ids {
        let full = format!("{dep}.{expr}");
        if let Some(v) = ctx.registry.get_exported_variable(&full) {
            return Some(v.clone());
        }
    }

    None
}

fn resolve_bare(name: &str, ctx: &InterpolationContext) -> Option<Value> {
    if let Some(v) = ctx.store.get(name) {
        return Some(v.clone());
    }
    for dep in ctx.dependency_node_ids {
        let full = format!("{dep}.{name}");
        if let Some(v) = ctx.registry.get_exported_variable(&full) {
            return Some(v.clone());
        }
    }
    None
}

fn generate_faker(generator: &str) -> Option<Value> {
    use fake::faker::internet::en::{FreeEmail, Username};
    use fake::faker::lorem::en::{Sentence, Word};
    use fake::faker::name::en::{FirstName, LastName, Name};
    use fake::faker::number::en::Digit;
    use fake::Fake;

    let value: String = match generator {
        "name.first_name" => FirstName().fake(),
        "name.last_name" => LastName().fake(),
        "name.full_name" => Name().fake(),
        "internet.email" => FreeEmail().fake(),
        "internet.username" => Username().fake(),
        "uuid.v4" => uuid::Uuid::new_v4().to_string(),
        "number.digit" => {
            let d: String = Digit().fake();
            d
        }
        "lorem.word" => Word().fake(),
        "lorem.sentence" => {
            let s: String = Sentence(3..8).fake();
            s
        }
        _ => return None,
    };
    Some(Value::String(value))
}

fn eval_js(code: &str, ctx: &InterpolationContext) -> Option<Value> {
    let engine = rhai::Engine::new_raw();
    let mut scope = rhai::Scope::new();
    for (name, value) in ctx.store.get_all() {
        if let Some(dynamic) = json_to_dynamic(&value) {
            scope.push_constant(name, dynamic);
        }
    }

    match engine.eval_expression_with_scope::<rhai::Dynamic>(&mut scope, code) {
        Ok(dynamic) => Some(dynamic_to_json(&dynamic)),
        Err(err) => {
            warn!(code, error = %err, "js: expression failed to evaluate");
            None
        }
    }
}

fn json_to_dynamic(value: &Value) -> Option<rhai::Dynamic> {
    Some(match value {
        Value::Null => rhai::Dynamic::UNIT,
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.into()
            } else {
                n.as_f64()?.into()
            }
        }
        Value::String(s) => s.clone().into(),
        _ => serde_json::to_string(value).ok()?.into(),
    })
}

fn dynamic_to_json(dynamic: &rhai::Dynamic) -> Value {
    if dynamic.is_unit() {
        Value::Null
    } else if let Some(b) = dynamic.clone().try_cast::<bool>() {
        Value::Bool(b)
    } else if let Some(i) = dynamic.clone().try_cast::<i64>() {
        Value::from(i)
    } else if let Some(f) = dynamic.clone().try_cast::<f64>() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else {
        Value::String(dynamic.to_string())
    }
}

fn resolve_expr(expr: &str, ctx: &InterpolationContext) -> Option<Value> {
    match classify(expr) {
        ExprKind::Js(code) => eval_js(&code, ctx),
        ExprKind::EnvRef(name) => ctx.store.get_in(crate::store::Scope::Environment, &name).cloned(),
        ExprKind::Faker(generator) => generate_faker(&generator),
        ExprKind::DottedPath(path) => resolve_dotted_path(&path, ctx),
        ExprKind::Bare(name) => resolve_bare(&name, ctx),
    }
}

/// String-level interpolation cache with per-name reverse-index
/// invalidation (spec design note §9). A write touching `name`
/// invalidates every cached template that referenced it.
#[derive(Debug, Default)]
pub struct InterpolationCache {
    cache: HashMap<String, String>,
    reverse_index: HashMap<String, HashSet<String>>,
}

impl InterpolationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self, name: &str) {
        if let Some(templates) = self.reverse_index.remove(name) {
            for template in templates {
                self.cache.remove(&template);
            }
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.reverse_index.clear();
    }
}

/// Interpolate every `{{EXPR}}` token in `template`, using `cache` to
/// skip recomputation of previously-seen templates.
pub fn interpolate_string(
    template: &str,
    ctx: &InterpolationContext,
    cache: &mut InterpolationCache,
) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    if let Some(hit) = cache.cache.get(template) {
        return hit.clone();
    }

    let mut referenced = Vec::new();
    let result = TOKEN_RE
        .replace_all(template, |caps: &regex::Captures| {
            let expr = caps[1].trim();
            referenced.push(root_identifier(expr));
            match resolve_expr(expr, ctx) {
                Some(v) => stringify(&v),
                None => {
                    warn!(expr, "unresolved interpolation token, left verbatim");
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    cache.cache.insert(template.to_string(), result.clone());
    for name in referenced {
        cache
            .reverse_index
            .entry(name)
            .or_default()
            .insert(template.to_string());
    }
    result
}

fn root_identifier(expr: &str) -> String {
    match classify(expr) {
        ExprKind::EnvRef(name) | ExprKind::Faker(name) => name,
        ExprKind::DottedPath(path) | ExprKind::Bare(path) => {
            path.split('.').next().unwrap_or(&path).to_string()
        }
        ExprKind::Js(code) => code,
    }
}

/// Recursively interpolate a JSON value tree: strings are rewritten,
/// arrays/objects walked and rebuilt, other scalars pass through.
pub fn interpolate_value(
    value: &Value,
    ctx: &InterpolationContext,
    cache: &mut InterpolationCache,
) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_string(s, ctx, cache)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| interpolate_value(v, ctx, cache))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, ctx, cache)))
                .collect(),
        ),
        other => other.clone(),
    }
}
