//! Suite file data model: the canonical in-memory form produced by
//! discovery and consumed by the graph, store, and executor layers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Priority tier used for ordering ties and fail-fast gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Infer a priority from keyword substrings in a suite name, used when
/// a suite's `metadata.priority` is absent.
pub fn infer_priority(suite_name: &str) -> Priority {
    let lower = suite_name.to_ascii_lowercase();
    const CRITICAL: &[&str] = &["critical", "smoke", "health"];
    const HIGH: &[&str] = &["auth", "login", "core"];
    const LOW: &[&str] = &["edge", "optional", "experimental"];

    if CRITICAL.iter().any(|k| lower.contains(k)) {
        Priority::Critical
    } else if HIGH.iter().any(|k| lower.contains(k)) {
        Priority::High
    } else if LOW.iter().any(|k| lower.contains(k)) {
        Priority::Low
    } else {
        Priority::Medium
    }
}

/// A dependency declaration on another suite, by node id or file path.
///
/// At least one of the two must be present; entries with neither are
/// dropped during normalization and logged as a warning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyEntry {
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl DependencyEntry {
    pub fn is_valid(&self) -> bool {
        self.node_id.is_some() || self.path.is_some()
    }
}

/// Suite-level `metadata:` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteMetadata {
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A discovered, normalized suite file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suite {
    pub node_id: String,
    pub suite_name: String,
    #[serde(default)]
    pub metadata: SuiteMetadata,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub depends: Vec<DependencyEntry>,
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Absolute path of the originating file. Not part of the on-disk
    /// format; filled in by discovery.
    #[serde(skip)]
    pub file_path: PathBuf,
    /// Resolved priority (explicit `metadata.priority`, else inferred).
    #[serde(skip)]
    pub priority: Priority,
    /// Resolved duration estimate in ms, used for scheduling heuristics.
    #[serde(skip)]
    pub estimated_duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// One HTTP request. String leaves (`url`, header/query values, body
/// strings) are subject to interpolation before being sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

/// A single structured check inside a checks-group
/// (`body."$.field": { equals: ... }`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChecksGroup {
    #[serde(default)]
    pub equals: Option<serde_json::Value>,
    #[serde(default)]
    pub not_equals: Option<serde_json::Value>,
    #[serde(default)]
    pub contains: Option<serde_json::Value>,
    #[serde(default)]
    pub greater_than: Option<serde_json::Value>,
    #[serde(default)]
    pub less_than: Option<serde_json::Value>,
    #[serde(default)]
    pub regex: Option<String>,
}

impl ChecksGroup {
    /// A flat-form assertion (`body."$.field": value`) is sugar for an
    /// `equals` checks-group.
    pub fn from_flat_value(value: serde_json::Value) -> Self {
        ChecksGroup {
            equals: Some(value),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_none()
            && self.not_equals.is_none()
            && self.contains.is_none()
            && self.greater_than.is_none()
            && self.less_than.is_none()
            && self.regex.is_none()
    }
}

/// `response_time_ms` assertion block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseTimeAssertion {
    #[serde(default)]
    pub less_than: Option<u64>,
    #[serde(default)]
    pub greater_than: Option<u64>,
}

/// Declarative response assertions for a step.
///
/// Raw YAML (flat `body.<path>: value` or structured
/// `body: { <path>: { equals: value } }` form) is rewritten into this
/// shape by [`crate::assertions::normalize`], which backs a custom
/// [`serde::Deserialize`] impl below so both forms parse transparently.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Assertions {
    pub status_code: Option<u16>,
    pub headers: HashMap<String, ChecksGroup>,
    pub body: HashMap<String, ChecksGroup>,
    pub response_time_ms: Option<ResponseTimeAssertion>,
}

impl<'de> Deserialize<'de> for Assertions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(crate::assertions::normalize(&raw))
    }
}

/// Extra assertions/captures applied when a [`Scenario`] condition
/// resolves a particular way.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioBlock {
    #[serde(default)]
    pub assert: Option<Assertions>,
    #[serde(default)]
    pub capture: HashMap<String, String>,
}

/// A conditional scenario attached to a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub condition: String,
    #[serde(rename = "then", default)]
    pub then_block: Option<ScenarioBlock>,
    #[serde(rename = "else", default)]
    pub else_block: Option<ScenarioBlock>,
}

/// Invoke a step belonging to another suite, in an isolated or shared
/// variable context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSpec {
    pub test: String,
    pub step: String,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub isolate_context: bool,
    #[serde(default)]
    pub on_error: OnCallError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnCallError {
    #[default]
    Fail,
    Continue,
}

/// Loop/retry descriptor for a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterateSpec {
    #[serde(default = "default_iterate_count")]
    pub count: u32,
    #[serde(default)]
    pub until: Option<String>,
    #[serde(default = "default_iterate_interval_ms")]
    pub interval_ms: u64,
}

fn default_iterate_count() -> u32 {
    1
}

fn default_iterate_interval_ms() -> u64 {
    0
}

/// One unit of work inside a suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub request: Option<Request>,
    #[serde(default)]
    pub assert: Option<Assertions>,
    #[serde(default)]
    pub capture: HashMap<String, String>,
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub iterate: Option<IterateSpec>,
    #[serde(default)]
    pub call: Option<CallSpec>,
}

impl Step {
    /// The explicit `step_id` if set, else a lower-kebab slug of `name`.
    pub fn resolved_step_id(&self) -> String {
        match &self.step_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => slugify(&self.name),
        }
    }
}

/// Lower-kebab slug of a step or suite name.
pub fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if (ch.is_whitespace() || matches!(ch, '-' | '_')) && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

impl Suite {
    /// Deserialize a suite from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Deserialize a suite from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the suite to a YAML string.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
