//! Suiteflow CLI - declarative HTTP flow test execution tool.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use suiteflow::engine::{parse_priority_filters, Engine, RuntimeFilters};
use suiteflow::{AggregatedResult, Config};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Suiteflow - declarative HTTP flow test execution tool.
#[derive(Parser, Debug)]
#[command(name = "suiteflow", version, about)]
struct Cli {
    /// Config file path (YAML or JSON).
    #[arg(short = 'c', long = "config", default_value = "suiteflow.yaml")]
    config_path: PathBuf,

    /// Suite directory to scan, overriding config.test_directory.
    #[arg(short = 'p', long = "path")]
    test_path: Option<PathBuf>,

    /// Filter suites by exact name.
    #[arg(long = "suite-name")]
    suite_names: Vec<String>,

    /// Filter suites by node id.
    #[arg(long = "node-id")]
    node_ids: Vec<String>,

    /// Filter suites by priority (repeatable).
    #[arg(long = "priority")]
    priorities: Vec<String>,

    /// Filter suites by tag.
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Filter suites by file glob pattern.
    #[arg(long = "file-pattern")]
    file_patterns: Vec<String>,

    /// Restrict execution to specific step ids within matched suites.
    #[arg(long = "step-id")]
    step_ids: Vec<String>,

    /// Run suites whose dependencies allow it in parallel.
    #[arg(long = "parallel")]
    parallel: bool,

    /// Cap on concurrently executing suites in parallel mode.
    #[arg(long = "max-parallel")]
    max_parallel: Option<usize>,

    /// Discover and print suites without executing any requests.
    #[arg(long = "dry-run")]
    dry_run: bool,

    /// Directory to save the aggregated report.
    #[arg(short = 'r', long = "report-dir")]
    report_dir: Option<PathBuf>,

    /// Report output format.
    #[arg(long = "report-format", default_value = "json")]
    report_format: ReportFormat,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Yaml,
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

fn print_summary(result: &AggregatedResult) {
    for suite in &result.suites_results {
        let status = if suite.status == suiteflow::result::SuiteStatus::Success {
            "\x1b[32mPASS\x1b[0m"
        } else {
            "\x1b[31mFAIL\x1b[0m"
        };
        info!("{} {} ({} ms)", status, suite.suite_name, suite.duration_ms);

        for step in &suite.steps_results {
            let step_status = match step.status {
                suiteflow::result::StepStatus::Success => "\x1b[32m✓\x1b[0m",
                suiteflow::result::StepStatus::Failure => "\x1b[31m✗\x1b[0m",
                suiteflow::result::StepStatus::Skipped => "\x1b[33m-\x1b[0m",
            };
            info!("  {} {} ({} ms)", step_status, step.name, step.duration_ms);
            if let Some(error) = &step.error {
                error!("     \x1b[31m{}\x1b[0m", error);
            }
        }
    }

    info!(
        "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m\n  Skipped: {}\n  Success rate: {:.1}%\n  Duration: {} ms",
        result.total_tests,
        result.successful_tests,
        result.failed_tests,
        result.skipped_tests,
        result.success_rate,
        result.total_duration_ms
    );
}

fn save_report(result: &AggregatedResult, report_dir: &Path, format: ReportFormat) -> Result<PathBuf> {
    if !report_dir.exists() {
        fs::create_dir_all(report_dir)?;
    }

    let timestamp = Utc::now().timestamp();
    let (filename, content) = match format {
        ReportFormat::Json => (
            format!("{}-{timestamp}.json", result.project_name),
            serde_json::to_string_pretty(result)?,
        ),
        ReportFormat::Yaml => (
            format!("{}-{timestamp}.yaml", result.project_name),
            serde_yaml::to_string(result)?,
        ),
    };

    let file_path = report_dir.join(filename);
    let mut file = File::create(&file_path)?;
    file.write_all(content.as_bytes())?;
    Ok(file_path)
}

async fn wait_for_termination() -> i32 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => 130,
            _ = sigterm.recv() => 143,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        130
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let mut config = Config::load(&args.config_path)
        .context(format!("failed to load config: {}", args.config_path.display()))?;

    if let Some(path) = &args.test_path {
        config.test_directory = path.clone();
    }
    if args.parallel {
        config.execution.mode = suiteflow::config::ExecutionModeWrapper(
            suiteflow::config::ExecutionMode::Parallel,
        );
    }
    if let Some(max_parallel) = args.max_parallel {
        config.execution.max_parallel = max_parallel;
    }

    let mut engine = Engine::new(config)?;

    let filters = RuntimeFilters {
        priority: parse_priority_filters(&args.priorities),
        suite_names: args.suite_names,
        node_ids: args.node_ids,
        tags: args.tags,
        file_patterns: args.file_patterns,
        step_ids: args.step_ids,
    };

    if args.dry_run {
        let order = engine.plan(&filters)?;
        info!("dry-run: {} suite(s) would execute in this order:", order.len());
        for (i, node_id) in order.iter().enumerate() {
            info!("  {}. {}", i + 1, node_id);
        }
        return Ok(());
    }

    let run_future = engine.run(filters);
    tokio::pin!(run_future);

    let result = tokio::select! {
        result = &mut run_future => result?,
        code = wait_for_termination() => {
            error!("execution interrupted");
            exit(code);
        }
    };

    print_summary(&result);

    if let Some(dir) = &args.report_dir {
        match save_report(&result, dir, args.report_format) {
            Ok(path) => info!("report saved: {}", path.display()),
            Err(e) => error!("failed to save report: {}", e),
        }
    }

    exit(result.exit_code());
}
