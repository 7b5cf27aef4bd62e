//! Drain orchestration.
//!
//! # Sequence
//! ```text
//! Running → Cancelling        clear running flag, exit progress, cancel root
//!         → AwaitingTasks     await scheduled units up to the deadline
//!         → Persisting        refresh accounting, persist each artifact
//!         → DrainingWrites    stop db writer, flush spawns, poll pending
//!         → ClosingResources  sessions, shared state server, scheduler
//!         → Done
//! ```
//!
//! # Design Decisions
//! - Every step before ClosingResources is best-effort: failures are logged
//!   with their kind, recorded in the report, and the sequence moves on
//! - ClosingResources always runs, even if an earlier step panicked
//! - The await deadline is informational; abandoned units are aborted on close

use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::Serialize;

use crate::collab::{Collaborators, RunningFlag};
use crate::config::ShutdownConfig;
use crate::error::CoordinatorError;
use crate::lifecycle::scheduler::{AwaitReport, Scheduler};
use crate::lifecycle::state::DrainState;
use crate::lifecycle::step::{contain, panic_message};
use crate::server::SharedStateServer;

/// Timing knobs for the drain.
#[derive(Debug, Clone, Copy)]
pub struct DrainSettings {
    /// How long to wait for scheduled units.
    pub deadline: Duration,
    /// Cadence of the pending-writes progress line.
    pub poll_interval: Duration,
    /// Give up on the write backlog after this long. `None` waits until empty.
    pub drain_writes_timeout: Option<Duration>,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(40),
            poll_interval: Duration::from_millis(500),
            drain_writes_timeout: None,
        }
    }
}

impl From<&ShutdownConfig> for DrainSettings {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            deadline: saturating_secs(config.deadline_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            drain_writes_timeout: config.drain_writes_timeout_secs.map(saturating_secs),
        }
    }
}

/// Seconds to a `Duration`, clamping what validation would have rejected.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// Outcome of persisting one artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactOutcome {
    pub name: String,
    /// Error text if the write failed.
    pub error: Option<String>,
}

/// What the drain did, for the exit summary.
#[derive(Debug, Default, Serialize)]
pub struct DrainReport {
    /// States entered, in order.
    pub visited: Vec<DrainState>,
    pub tasks: Option<AwaitReport>,
    pub artifacts: Vec<ArtifactOutcome>,
    /// Database write jobs still queued when the drain gave up on them.
    pub writes_left: usize,
    /// Contained step failures.
    #[serde(skip)]
    pub failures: Vec<CoordinatorError>,
    pub final_state: Option<DrainState>,
}

impl DrainReport {
    pub fn failed_steps(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter_map(|failure| match failure {
                CoordinatorError::TeardownStepFailed { step, .. } => Some(step.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
            && self.writes_left == 0
            && !self.tasks.as_ref().is_some_and(|tasks| tasks.deadline_exceeded)
    }
}

/// Ordered, fault-contained shutdown of the coordinator.
pub struct DrainOrchestrator {
    state: DrainState,
    running: RunningFlag,
    scheduler: Arc<Scheduler>,
    server: Arc<SharedStateServer>,
    collaborators: Collaborators,
    settings: DrainSettings,
    report: DrainReport,
}

impl DrainOrchestrator {
    pub fn new(
        running: RunningFlag,
        scheduler: Arc<Scheduler>,
        server: Arc<SharedStateServer>,
        collaborators: Collaborators,
        settings: DrainSettings,
    ) -> Self {
        Self {
            state: DrainState::Running,
            running,
            scheduler,
            server,
            collaborators,
            settings,
            report: DrainReport {
                visited: vec![DrainState::Running],
                ..DrainReport::default()
            },
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    /// Run the whole sequence to `Done`.
    pub async fn drain(mut self) -> DrainReport {
        tracing::info!("Drain started");
        let started = Instant::now();

        let best_effort = AssertUnwindSafe(self.best_effort()).catch_unwind().await;
        if let Err(panic) = best_effort {
            let message = panic_message(&*panic);
            tracing::error!(state = %self.state, error = %message, "Drain step panicked");
            self.report.failures.push(CoordinatorError::TeardownStepFailed {
                step: self.state.to_string(),
                kind: "panic".to_string(),
                message,
            });
        }

        self.close_resources().await;

        self.advance(DrainState::Done);
        progress("Done.");
        tracing::info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            failures = self.report.failures.len(),
            "Drain finished"
        );

        self.report.final_state = Some(self.state);
        self.report
    }

    /// Steps 1 to 4.
    async fn best_effort(&mut self) {
        self.cancel();
        self.await_tasks().await;
        self.persist().await;
        self.drain_writes().await;
    }

    fn cancel(&mut self) {
        self.advance(DrainState::Cancelling);
        self.running.stop();
        progress("Exiting, please wait until all tasks finish");

        let supervisor = Arc::clone(&self.collaborators.supervisor);
        if let Err(e) = self
            .scheduler
            .spawn_detached("exit_progress", async move { supervisor.exit_progress().await })
        {
            tracing::warn!(error = %e, "Could not schedule exit progress");
        }

        if !self.scheduler.cancel_root() {
            tracing::debug!("Root task already cancelled");
        }
    }

    async fn await_tasks(&mut self) {
        self.advance(DrainState::AwaitingTasks);
        progress("Finishing tasks...");

        let tasks = self.scheduler.await_all(self.settings.deadline).await;
        if tasks.deadline_exceeded {
            progress("Coroutine completion timed out, moving on.");
        }
        self.report.tasks = Some(tasks);
    }

    async fn persist(&mut self) {
        self.advance(DrainState::Persisting);

        let supervisor = Arc::clone(&self.collaborators.supervisor);
        self.record(contain("refresh_accounting", supervisor.refresh_accounting()).await);

        progress("Dumping pickles...");
        let artifacts = self.collaborators.artifacts.clone();
        for artifact in artifacts {
            let step = format!("persist:{}", artifact.name());
            let result = contain(&step, artifact.persist()).await;
            self.report.artifacts.push(ArtifactOutcome {
                name: artifact.name().to_string(),
                error: result.as_ref().err().map(ToString::to_string),
            });
            self.record(result);
        }
    }

    async fn drain_writes(&mut self) {
        self.advance(DrainState::DrainingWrites);

        let db = Arc::clone(&self.collaborators.db);
        self.record(contain("db_stop", db.stop()).await);

        progress("Updating spawns pickle...");
        let spawns = Arc::clone(&self.collaborators.spawns);
        self.record(contain("spawns_flush", spawns.flush()).await);

        let started = Instant::now();
        let mut printed = false;
        while !db.is_empty() {
            let pending = db.pending();
            // Trailing spaces wipe the previous, possibly longer, count.
            print!("{} DB items pending     \r", pending);
            let _ = std::io::stdout().flush();
            printed = true;
            tracing::debug!(pending, "Waiting for database writes");

            if let Some(limit) = self.settings.drain_writes_timeout {
                if started.elapsed() >= limit {
                    tracing::warn!(
                        pending,
                        timeout_secs = limit.as_secs_f64(),
                        "Database writes did not drain in time"
                    );
                    self.report.writes_left = pending;
                    break;
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
        if printed {
            println!();
        }
    }

    /// Step 5. Runs regardless of how the earlier steps went.
    async fn close_resources(&mut self) {
        self.advance(DrainState::ClosingResources);
        progress("Closing pipes, sessions, and event loop...");

        let sessions = Arc::clone(&self.collaborators.sessions);
        let closed = contain("close_sessions", sessions.close_all()).await;
        self.record(closed);

        self.server.shutdown().await;

        let aborted = self.scheduler.close();
        if aborted > 0 {
            tracing::info!(aborted, "Aborted units still running at close");
        }
    }

    fn advance(&mut self, next: DrainState) {
        if next <= self.state {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "Drain state");
        self.state = next;
        self.report.visited.push(next);
    }

    fn record<T>(&mut self, result: Result<T, CoordinatorError>) {
        if let Err(e) = result {
            self.report.failures.push(e);
        }
    }
}

/// Operator-facing progress line, mirrored to the log.
fn progress(message: &str) {
    println!("{}", message);
    tracing::info!("{}", message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShutdownConfig;

    #[test]
    fn settings_from_config() {
        let config = ShutdownConfig {
            deadline_secs: 2.5,
            poll_interval_ms: 100,
            drain_writes_timeout_secs: Some(3.0),
        };
        let settings = DrainSettings::from(&config);

        assert_eq!(settings.deadline, Duration::from_millis(2500));
        assert_eq!(settings.poll_interval, Duration::from_millis(100));
        assert_eq!(settings.drain_writes_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn unrepresentable_seconds_do_not_panic() {
        let config = ShutdownConfig {
            deadline_secs: 1e20,
            poll_interval_ms: 100,
            drain_writes_timeout_secs: Some(-2.0),
        };
        let settings = DrainSettings::from(&config);

        assert_eq!(settings.deadline, Duration::MAX);
        assert_eq!(settings.drain_writes_timeout, Some(Duration::ZERO));
    }

    #[test]
    fn default_settings_wait_forty_seconds() {
        let settings = DrainSettings::default();
        assert_eq!(settings.deadline, Duration::from_secs(40));
        assert!(settings.drain_writes_timeout.is_none());
    }
}
