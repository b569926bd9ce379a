//! Result types returned by the executor, suite runner, and engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    Skipped,
}

/// One row produced by the assertion engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResult {
    pub field: String,
    pub expected: Value,
    pub actual: Value,
    pub passed: bool,
    pub message: String,
}

/// Outcome of evaluating one scenario's condition and applied block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioEvaluation {
    pub condition: String,
    pub matched: bool,
    pub branch_taken: Option<String>,
    pub assertions: Vec<AssertionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub time_to_first_byte_ms: u64,
    pub content_download_ms: u64,
    pub total_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub name: String,
    pub step_id: String,
    pub qualified_step_id: String,
    pub status: StepStatus,
    pub error: Option<String>,
    pub request: Option<RequestInfo>,
    pub response: Option<ResponseInfo>,
    pub assertions: Vec<AssertionResult>,
    pub captured_variables: HashMap<String, Value>,
    pub scenario_evaluations: Vec<ScenarioEvaluation>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub node_id: String,
    pub suite_name: String,
    pub status: SuiteStatus,
    pub steps_results: Vec<StepResult>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub project_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub total_tests: usize,
    pub successful_tests: usize,
    pub failed_tests: usize,
    pub skipped_tests: usize,
    pub success_rate: f64,
    pub suites_results: Vec<SuiteResult>,
    pub global_variables_final_state: HashMap<String, Value>,
}

impl AggregatedResult {
    pub fn exit_code(&self) -> i32 {
        if self.success_rate >= 100.0 {
            0
        } else {
            1
        }
    }
}
