//! Run configuration: project settings, globals, discovery, priorities
//! and execution knobs, loaded from file plus an `FLOW_TEST_*` env
//! overlay into the environment scope.

use crate::model::Priority;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalsConfig {
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

impl Default for GlobalsConfig {
    fn default() -> Self {
        Self {
            variables: HashMap::new(),
            base_url: None,
            timeouts: TimeoutsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_timeout_ms")]
    pub default: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            default: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfigKeys {
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for DiscoveryConfigKeys {
    fn default() -> Self {
        Self {
            patterns: default_patterns(),
            exclude: Vec::new(),
        }
    }
}

fn default_patterns() -> Vec<String> {
    vec!["**/*.test.yml".to_string(), "**/*.test.yaml".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrioritiesConfig {
    #[serde(default = "default_priority_levels")]
    pub levels: Vec<Priority>,
    #[serde(default = "default_required_priorities")]
    pub required: Vec<Priority>,
}

impl Default for PrioritiesConfig {
    fn default() -> Self {
        Self {
            levels: default_priority_levels(),
            required: default_required_priorities(),
        }
    }
}

fn default_priority_levels() -> Vec<Priority> {
    vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
}

fn default_required_priorities() -> Vec<Priority> {
    vec![Priority::Critical]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionModeWrapper,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default)]
    pub continue_on_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionModeWrapper(pub ExecutionMode);

impl Default for ExecutionModeWrapper {
    fn default() -> Self {
        ExecutionModeWrapper(ExecutionMode::Sequential)
    }
}

fn default_max_parallel() -> usize {
    5
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionModeWrapper::default(),
            max_parallel: default_max_parallel(),
            continue_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub project_name: String,
    #[serde(default = "default_test_directory")]
    pub test_directory: PathBuf,
    #[serde(default)]
    pub globals: GlobalsConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfigKeys,
    #[serde(default)]
    pub priorities: PrioritiesConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
}

fn default_test_directory() -> PathBuf {
    PathBuf::from("./tests")
}

impl Config {
    /// Load configuration from a YAML or JSON file, dispatched by
    /// extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path)
            .context(format!("failed to read config file: {}", path.display()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config: Config = match ext {
            "json" => serde_json::from_str(&content)
                .context(format!("failed to parse JSON config: {}", path.display()))?,
            _ => serde_yaml::from_str(&content)
                .context(format!("failed to parse YAML config: {}", path.display()))?,
        };

        debug!(project_name = %config.project_name, "configuration loaded");
        Ok(config)
    }

    /// Fold `FLOW_TEST_*` environment variables (prefix stripped,
    /// lowercased) into `target`'s environment scope.
    pub fn apply_env_overrides(&self, target: &mut crate::store::VariableStore) {
        const PREFIX: &str = "FLOW_TEST_";
        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(PREFIX) {
                let name = name.to_lowercase();
                let parsed = if name == "use_strategy_pattern" {
                    serde_json::Value::Bool(parse_loose_bool(&value))
                } else {
                    serde_json::Value::String(value)
                };
                target.set(crate::store::Scope::Environment, name, parsed);
            }
        }
    }
}

fn parse_loose_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_bool_parses_known_truthy_forms() {
        for v in ["true", "1", "yes", "on", "TRUE", " yes "] {
            assert!(parse_loose_bool(v), "expected '{v}' to be truthy");
        }
        for v in ["false", "0", "no", "off", ""] {
            assert!(!parse_loose_bool(v), "expected '{v}' to be falsy");
        }
    }

    #[test]
    fn config_loads_from_yaml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "project_name: demo\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.project_name, "demo");
        assert_eq!(config.test_directory, PathBuf::from("./tests"));
        assert_eq!(config.globals.timeouts.default, 30_000);
        assert_eq!(config.execution.max_parallel, 5);
        assert_eq!(config.execution.mode.0, ExecutionMode::Sequential);
    }

    #[test]
    fn env_overrides_fold_into_environment_scope() {
        std::env::set_var("FLOW_TEST_API_KEY", "secret");
        std::env::set_var("FLOW_TEST_USE_STRATEGY_PATTERN", "yes");

        let config = Config {
            project_name: "demo".to_string(),
            test_directory: default_test_directory(),
            globals: GlobalsConfig::default(),
            discovery: DiscoveryConfigKeys::default(),
            priorities: PrioritiesConfig::default(),
            execution: ExecutionConfig::default(),
        };

        let mut store = crate::store::VariableStore::new();
        config.apply_env_overrides(&mut store);

        assert_eq!(
            store.get_in(crate::store::Scope::Environment, "api_key"),
            Some(&serde_json::Value::String("secret".to_string()))
        );
        assert_eq!(
            store.get_in(crate::store::Scope::Environment, "use_strategy_pattern"),
            Some(&serde_json::Value::Bool(true))
        );

        std::env::remove_var("FLOW_TEST_API_KEY");
        std::env::remove_var("FLOW_TEST_USE_STRATEGY_PATTERN");
    }
}
