use axum::{routing::get, Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use suiteflow::config::{Config, DiscoveryConfigKeys, ExecutionConfig, GlobalsConfig, PrioritiesConfig, TimeoutsConfig};
use suiteflow::engine::{Engine, RuntimeFilters};
use suiteflow::model::Priority;
use tokio::task::JoinHandle;

struct TestServer {
    base_url: String,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();

        let app = Router::new()
            .route(
                "/setup",
                get(|| async move { Json(json!({"token": "abc"})) }),
            )
            .route(
                "/api",
                get(|| async move { Json(json!({"token": "abc"})) }),
            )
            .route(
                "/scenario",
                get(|| async move { Json(json!({"status": "ok", "count": 3})) }),
            )
            .route("/root", get(|| async move { Json(json!({"ok": true})) }));

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });

        let handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                eprintln!("test server error: {err}");
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                let _ = handle.await;
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn base_config(test_dir: PathBuf, base_url: &str) -> Config {
    Config {
        project_name: "integration".to_string(),
        test_directory: test_dir,
        globals: GlobalsConfig {
            variables: HashMap::new(),
            base_url: Some(base_url.to_string()),
            timeouts: TimeoutsConfig { default: 5_000 },
        },
        discovery: DiscoveryConfigKeys {
            patterns: vec!["**/*.test.yaml".to_string()],
            exclude: Vec::new(),
        },
        priorities: PrioritiesConfig::default(),
        execution: ExecutionConfig::default(),
    }
}

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) {
    std::fs::write(dir.path().join(name), contents).unwrap();
}

// S1: cross-suite export/dependency chain.
#[tokio::test]
async fn dependent_suite_consumes_exported_variable() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();

    write_file(
        &dir,
        "setup.test.yaml",
        "node_id: setup\nsuite_name: Setup\nexports: [token]\nsteps:\n  - name: Login\n    request:\n      method: GET\n      url: /setup\n    capture:\n      token: body.token\n",
    );
    write_file(
        &dir,
        "api.test.yaml",
        "node_id: api\nsuite_name: Api\ndepends:\n  - node_id: setup\nsteps:\n  - name: Call\n    request:\n      method: GET\n      url: /api\n    assert:\n      body:\n        token:\n          equals: \"{{setup.token}}\"\n",
    );

    let config = base_config(dir.path().to_path_buf(), &server.base_url);
    let mut engine = Engine::new(config).unwrap();
    let result = engine.run(RuntimeFilters::default()).await.unwrap();

    assert_eq!(result.success_rate, 100.0);
    let api = result
        .suites_results
        .iter()
        .find(|s| s.node_id == "api")
        .unwrap();
    assert!(api.steps_results[0].assertions[0].passed);

    server.shutdown().await;
}

// S2: circular dependency aborts before any HTTP call.
#[tokio::test]
async fn circular_dependency_aborts_before_execution() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();

    write_file(
        &dir,
        "a.test.yaml",
        "node_id: a\nsuite_name: A\ndepends:\n  - node_id: b\nsteps: []\n",
    );
    write_file(
        &dir,
        "b.test.yaml",
        "node_id: b\nsuite_name: B\ndepends:\n  - node_id: a\nsteps: []\n",
    );

    let config = base_config(dir.path().to_path_buf(), &server.base_url);
    let mut engine = Engine::new(config).unwrap();
    let result = engine.run(RuntimeFilters::default()).await.unwrap();

    assert_eq!(result.total_tests, 0);
    assert_eq!(result.exit_code(), 1);
    assert!(result
        .suites_results
        .iter()
        .all(|s| s.error.as_deref().unwrap_or_default().contains("cycle")));

    server.shutdown().await;
}

// S3: capture feeds a scenario condition and its then-block assertion.
#[tokio::test]
async fn capture_feeds_scenario_assertion() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();

    write_file(
        &dir,
        "scenario.test.yaml",
        "node_id: scenario\nsuite_name: Scenario Suite\nsteps:\n  - name: Check\n    request:\n      method: GET\n      url: /scenario\n    capture:\n      ok_count: body.count\n    scenarios:\n      - condition: \"body.status == 'ok'\"\n        then:\n          assert:\n            body:\n              count:\n                greater_than: 2\n",
    );

    let config = base_config(dir.path().to_path_buf(), &server.base_url);
    let mut engine = Engine::new(config).unwrap();
    let result = engine.run(RuntimeFilters::default()).await.unwrap();

    assert_eq!(result.success_rate, 100.0);
    let step = &result.suites_results[0].steps_results[0];
    assert_eq!(step.captured_variables.get("ok_count"), Some(&json!(3)));
    assert_eq!(step.scenario_evaluations.len(), 1);
    assert!(step.scenario_evaluations[0].assertions.iter().all(|a| a.passed));

    server.shutdown().await;
}

// S5: a dependency that does not exist in discovery is dropped, not fatal.
#[tokio::test]
async fn missing_dependency_runs_suite_as_root() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();

    write_file(
        &dir,
        "x.test.yaml",
        "node_id: x\nsuite_name: X\ndepends:\n  - node_id: ghost\nsteps:\n  - name: Root\n    request:\n      method: GET\n      url: /root\n",
    );

    let config = base_config(dir.path().to_path_buf(), &server.base_url);
    let mut engine = Engine::new(config).unwrap();
    let result = engine.run(RuntimeFilters::default()).await.unwrap();

    assert_eq!(result.success_rate, 100.0);

    server.shutdown().await;
}

// Dry-run: discovery + ordering, no HTTP calls are made.
#[tokio::test]
async fn dry_run_plan_orders_suites_without_requests() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        &dir,
        "setup.test.yaml",
        "node_id: setup\nsuite_name: Setup\nsteps: []\n",
    );
    write_file(
        &dir,
        "api.test.yaml",
        "node_id: api\nsuite_name: Api\ndepends:\n  - node_id: setup\nsteps: []\n",
    );

    let config = base_config(dir.path().to_path_buf(), "http://unused.invalid");
    let engine = Engine::new(config).unwrap();
    let order = engine.plan(&RuntimeFilters::default()).unwrap();

    let setup_pos = order.iter().position(|n| n == "setup").unwrap();
    let api_pos = order.iter().position(|n| n == "api").unwrap();
    assert!(setup_pos < api_pos);
}

// Runtime filters restrict which suites execute.
#[tokio::test]
async fn node_id_filter_restricts_execution_to_matched_suite() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();

    write_file(
        &dir,
        "setup.test.yaml",
        "node_id: setup\nsuite_name: Setup\nsteps:\n  - name: Login\n    request:\n      method: GET\n      url: /setup\n",
    );
    write_file(
        &dir,
        "unrelated.test.yaml",
        "node_id: unrelated\nsuite_name: Unrelated\nsteps:\n  - name: Root\n    request:\n      method: GET\n      url: /root\n",
    );

    let config = base_config(dir.path().to_path_buf(), &server.base_url);
    let mut engine = Engine::new(config).unwrap();
    let filters = RuntimeFilters {
        node_ids: vec!["setup".to_string()],
        ..Default::default()
    };
    let result = engine.run(filters).await.unwrap();

    assert_eq!(result.suites_results.len(), 1);
    assert_eq!(result.suites_results[0].node_id, "setup");

    server.shutdown().await;
}

// Configured priority order (not the Priority enum's natural order) breaks
// ties between independent suites.
#[tokio::test]
async fn configured_priority_order_overrides_enum_default_for_independent_suites() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        &dir,
        "low.test.yaml",
        "node_id: low\nsuite_name: Low\nmetadata:\n  priority: low\nsteps: []\n",
    );
    write_file(
        &dir,
        "critical.test.yaml",
        "node_id: critical\nsuite_name: Critical\nmetadata:\n  priority: critical\nsteps: []\n",
    );

    let mut config = base_config(dir.path().to_path_buf(), "http://unused.invalid");
    // Reversed from the enum's derived/default order: low runs before critical.
    config.priorities = PrioritiesConfig {
        levels: vec![Priority::Low, Priority::Medium, Priority::High, Priority::Critical],
        required: vec![Priority::Critical],
    };

    let engine = Engine::new(config).unwrap();
    let order = engine.plan(&RuntimeFilters::default()).unwrap();

    assert_eq!(order, vec!["low".to_string(), "critical".to_string()]);
}

// `priorities.required` is the fail-fast set: a failing suite whose priority
// is in it aborts the remaining run instead of continuing on to independent
// suites that have no dependency relationship to it.
#[tokio::test]
async fn required_priority_failure_aborts_remaining_suites() {
    let server = TestServer::spawn().await;
    let dir = tempfile::tempdir().unwrap();

    write_file(
        &dir,
        "boom.test.yaml",
        "node_id: boom\nsuite_name: Boom\nmetadata:\n  priority: critical\nsteps:\n  - name: Unreachable\n    request:\n      method: GET\n      url: \"http://127.0.0.1:1/\"\n",
    );
    // Lower priority than `boom` so it is guaranteed to be ordered after it
    // regardless of filesystem directory-listing order, exercising the
    // fail-fast abort independent of suite-to-suite dependency edges.
    write_file(
        &dir,
        "never.test.yaml",
        "node_id: never\nsuite_name: Never\nmetadata:\n  priority: low\nsteps:\n  - name: Root\n    request:\n      method: GET\n      url: /root\n",
    );

    let mut config = base_config(dir.path().to_path_buf(), &server.base_url);
    config.priorities = PrioritiesConfig {
        levels: vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low],
        required: vec![Priority::Critical],
    };

    let mut engine = Engine::new(config).unwrap();
    let result = engine.run(RuntimeFilters::default()).await.unwrap();

    assert_eq!(result.suites_results.len(), 2);
    let boom = result.suites_results.iter().find(|s| s.node_id == "boom").unwrap();
    assert_eq!(boom.status, suiteflow::result::SuiteStatus::Failure);
    let never = result.suites_results.iter().find(|s| s.node_id == "never").unwrap();
    assert_eq!(never.status, suiteflow::result::SuiteStatus::Failure);
    assert!(never
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("aborted"));
    assert!(never.steps_results.is_empty());

    server.shutdown().await;
}
