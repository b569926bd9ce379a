//! Error kinds surfaced by the core.

use thiserror::Error;

/// Errors produced by the discovery, graph, and execution layers.
///
/// Not every variant is fatal — see the propagation policy on each
/// producing module. `DependencyMissing` in particular is logged as a
/// warning and never returned from a public entry point; it exists here
/// so tests and callers can match on a stable type when they do want it.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to parse suite file {path}: {source}")]
    DiscoveryParse {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("dependency cycle detected: {0}")]
    DependencyCycle(String),

    #[error("dependency '{dependency}' referenced by '{node_id}' could not be resolved")]
    DependencyMissing { node_id: String, dependency: String },

    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("capture failed for '{name}': {reason}")]
    Capture { name: String, reason: String },

    #[error("scenario condition invalid: {condition}: {reason}")]
    ScenarioCondition { condition: String, reason: String },

    #[error("request error: {0}")]
    Request(String),

    #[error("call resolution error: {0}")]
    CallResolution(String),

    #[error("hook error: {0}")]
    Hook(String),
}
