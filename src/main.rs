//! Scan coordinator.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                  COORDINATOR                     │
//!  worker process    │  ┌──────────┐   ┌──────────┐   ┌─────────────┐   │
//!  ──(authkey)───────┼─▶│ listener │──▶│  routes  │──▶│  registry   │   │
//!                    │  └──────────┘   └──────────┘   └──────┬──────┘   │
//!                    │                                       ▼          │
//!                    │             captcha_queue / extra_queue /        │
//!                    │             worker_dict (BoundedQueue, table)    │
//!                    │                                                  │
//!  SIGINT/SIGTERM ───┼─▶ signals ──▶ root token ──▶ drain orchestrator  │
//!                    │     cancel → await → persist → drain writes      │
//!                    │     → close sessions, server, scheduler → done   │
//!                    └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgAction, Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use scan_coordinator::collab::{LaunchOptions, Supervisor};
use scan_coordinator::config::load_config;
use scan_coordinator::lifecycle::signals::SignalListener;
use scan_coordinator::lifecycle::Coordinator;
use scan_coordinator::observability::logging::{init_logging, LOG_FILE_NAME};
use scan_coordinator::observability::metrics::init_metrics;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "scan-coordinator")]
#[command(about = "Coordinates scan workers and drains them on shutdown", long_about = None)]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log to console instead of displaying status bar
    #[arg(long = "no-status-bar", action = ArgAction::SetFalse)]
    status_bar: bool,

    /// Overrides `observability.log_level`.
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Bootstrap even if spawns are known.
    #[arg(long)]
    bootstrap: bool,

    /// Do not load spawns from pickle
    #[arg(long = "no-pickle", action = ArgAction::SetFalse)]
    pickle: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)?;

    let level = args
        .log_level
        .map(|level| level.as_str().to_string())
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_file = args
        .status_bar
        .then(|| config.directory().join(LOG_FILE_NAME));
    init_logging(&level, log_file.as_deref())?;
    if args.status_bar {
        tracing::info!("{}", "-".repeat(37));
        tracing::info!("Starting up!");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Before binding, so an early signal cannot kill us with the socket claimed.
    let signals = SignalListener::register()?;

    let hash_key = config.scan.hash_key.clone();
    let coordinator = Coordinator::start(config).await?;
    let _signals = signals.spawn(Arc::clone(coordinator.scheduler()));
    tracing::info!(endpoint = %coordinator.endpoint(), "Shared state server listening");

    let (supervisor, collaborators) = coordinator.standalone(args.pickle).await;
    supervisor.start(args.status_bar);

    let scheduler = Arc::clone(coordinator.scheduler());
    let root = scheduler.root_token();
    let launcher_done = CancellationToken::new();
    let options = LaunchOptions {
        bootstrap: args.bootstrap,
        use_pickle: args.pickle,
    };

    let launcher = Arc::clone(&supervisor);
    let done = launcher_done.clone();
    scheduler.spawn("launcher", move |token| async move {
        let _done = done.drop_guard();
        launcher.launch(options, token).await
    })?;

    if let Err(e) = collaborators
        .sessions
        .activate_hash_service(hash_key.as_deref())
        .await
    {
        tracing::warn!(error = %e, "Hash service activation failed");
    }

    tokio::select! {
        _ = root.cancelled() => {}
        _ = launcher_done.cancelled() => tracing::info!("Supervisor finished on its own"),
    }

    let report = coordinator.orchestrator(collaborators).drain().await;

    if let Some(tasks) = &report.tasks {
        tracing::info!(
            finished = tasks.finished.len(),
            cancelled = tasks.cancelled.len(),
            failed = tasks.failed.len(),
            abandoned = tasks.abandoned.len(),
            deadline_exceeded = tasks.deadline_exceeded,
            "Task summary"
        );
    }
    if !report.is_clean() {
        let failed = report.failed_steps();
        if !failed.is_empty() {
            eprintln!("Some shutdown steps failed: {}", failed.join(", "));
        }
        if report.writes_left > 0 {
            eprintln!("{} database writes were not drained", report.writes_left);
        }
    }

    Ok(())
}
