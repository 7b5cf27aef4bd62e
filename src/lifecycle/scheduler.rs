//! Tracked task scheduler.
//!
//! # Responsibilities
//! - Spawn units of work onto the runtime, each with a child of the root token
//! - Await every scheduled unit up to a deadline and classify the outcome
//! - Abort whatever is left when the engine closes
//!
//! # Design Decisions
//! - Units are tracked in a `JoinSet` so they can be enumerated and aborted
//! - Panics are caught inside the unit so the report keeps the unit's name
//! - A missed deadline is informational: the report flags it, nothing fails

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{describe_kind, BoxError, CoordinatorError, CoordinatorResult};

/// How a unit of work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Finished,
    Cancelled,
    Failed { kind: String, message: String },
}

struct UnitResult {
    seq: u64,
    name: String,
    outcome: Outcome,
}

/// Running units plus their names, keyed by spawn order.
#[derive(Default)]
struct Units {
    set: JoinSet<UnitResult>,
    names: BTreeMap<u64, String>,
}

/// Result of awaiting every scheduled unit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AwaitReport {
    /// Units that ran to completion.
    pub finished: Vec<String>,
    /// Units that returned after observing cancellation, or were aborted.
    pub cancelled: Vec<String>,
    /// Units that returned an error or panicked, with the error kind.
    pub failed: Vec<(String, String)>,
    /// Units still running when the deadline elapsed.
    pub abandoned: Vec<String>,
    pub deadline_exceeded: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl AwaitReport {
    pub fn total(&self) -> usize {
        self.finished.len() + self.cancelled.len() + self.failed.len() + self.abandoned.len()
    }
}

/// Cooperative scheduler over the tokio runtime.
pub struct Scheduler {
    root: CancellationToken,
    root_cancelled: AtomicBool,
    units: Mutex<Units>,
    /// Units left behind by a missed deadline, aborted on close.
    abandoned: Mutex<Vec<JoinSet<UnitResult>>>,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            root_cancelled: AtomicBool::new(false),
            units: Mutex::new(Units::default()),
            abandoned: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Top-level cancellation token. Signal handlers and the orchestrator cancel it.
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Schedule a unit that receives a child of the root token.
    ///
    /// A unit that returns after its token was cancelled is reported as cancelled.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, unit: F) -> CoordinatorResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let token = self.root.child_token();
        let future = unit(token.clone());
        self.track(name.into(), Some(token), future)
    }

    /// Schedule a unit that does not observe cancellation.
    pub fn spawn_detached<Fut>(&self, name: impl Into<String>, unit: Fut) -> CoordinatorResult<()>
    where
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.track(name.into(), None, unit)
    }

    fn track<Fut>(
        &self,
        name: String,
        token: Option<CancellationToken>,
        unit: Fut,
    ) -> CoordinatorResult<()>
    where
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        if self.is_closed() {
            return Err(CoordinatorError::EngineClosed);
        }

        tracing::debug!(unit = %name, detached = token.is_none(), "Unit scheduled");
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut units = self.units.lock();
        units.names.insert(seq, name.clone());
        units.set.spawn(async move {
            let outcome = match AssertUnwindSafe(unit).catch_unwind().await {
                Ok(Ok(())) if token.as_ref().is_some_and(|t| t.is_cancelled()) => Outcome::Cancelled,
                Ok(Ok(())) => Outcome::Finished,
                Ok(Err(e)) => Outcome::Failed {
                    kind: describe_kind(&*e),
                    message: e.to_string(),
                },
                Err(_) => Outcome::Failed {
                    kind: "panic".to_string(),
                    message: "unit panicked".to_string(),
                },
            };
            UnitResult { seq, name, outcome }
        });
        Ok(())
    }

    /// Cancel the root token. Returns `false` if it was already cancelled.
    pub fn cancel_root(&self) -> bool {
        if self.root_cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.root.cancel();
        true
    }

    /// Units scheduled and not yet collected by `await_all`.
    pub fn pending(&self) -> usize {
        self.units.lock().set.len()
    }

    /// Wait for every scheduled unit, giving up after `deadline`.
    ///
    /// Units that already completed are collected even with a zero deadline.
    pub async fn await_all(&self, deadline: Duration) -> AwaitReport {
        let Units {
            set: mut units,
            mut names,
        } = std::mem::take(&mut *self.units.lock());
        let started = Instant::now();
        let mut report = AwaitReport::default();

        let completed = tokio::time::timeout(deadline, async {
            while let Some(joined) = units.join_next().await {
                match joined {
                    Ok(result) => {
                        names.remove(&result.seq);
                        classify(&mut report, result);
                    }
                    Err(e) => tracing::debug!(error = %e, "Unit ended without a result"),
                }
            }
        })
        .await;

        if completed.is_err() {
            report.deadline_exceeded = true;
            // Pick up anything that finished right at the deadline.
            while let Some(joined) = units.try_join_next() {
                if let Ok(result) = joined {
                    names.remove(&result.seq);
                    classify(&mut report, result);
                }
            }
            report.abandoned = names.into_values().collect();
            tracing::info!(
                abandoned = report.abandoned.len(),
                deadline_secs = deadline.as_secs_f64(),
                "Task await deadline exceeded"
            );
            self.abandoned.lock().push(units);
        } else {
            // Aborted from outside: no result, so count them as cancelled.
            report.cancelled.extend(names.into_values());
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            finished = report.finished.len(),
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            "Scheduled units awaited"
        );
        report
    }

    /// Stop accepting units and abort everything still running.
    /// Returns the number of aborted units.
    pub fn close(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.root_cancelled.store(true, Ordering::SeqCst);
        self.root.cancel();

        let mut aborted = 0;
        {
            let mut units = self.units.lock();
            aborted += units.set.len();
            units.set.abort_all();
        }
        for mut set in self.abandoned.lock().drain(..) {
            aborted += set.len();
            set.abort_all();
        }

        tracing::debug!(aborted, "Scheduler closed");
        aborted
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(report: &mut AwaitReport, result: UnitResult) {
    match result.outcome {
        Outcome::Finished => report.finished.push(result.name),
        Outcome::Cancelled => report.cancelled.push(result.name),
        Outcome::Failed { kind, message } => {
            tracing::warn!(unit = %result.name, kind = %kind, error = %message, "Unit failed");
            report.failed.push((result.name, kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn classifies_finished_cancelled_and_failed() {
        let scheduler = Scheduler::new();
        scheduler.spawn("quick", |_| async { Ok(()) }).unwrap();
        scheduler
            .spawn("listener", |token| async move {
                token.cancelled().await;
                Ok(())
            })
            .unwrap();
        scheduler
            .spawn("broken", |_| async { Err::<(), BoxError>("boom".into()) })
            .unwrap();

        assert!(scheduler.cancel_root());
        let report = scheduler.await_all(Duration::from_secs(5)).await;

        assert_eq!(report.finished, vec!["quick".to_string()]);
        assert_eq!(report.cancelled, vec!["listener".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.deadline_exceeded);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn zero_deadline_abandons_in_flight_units() {
        let scheduler = Scheduler::new();
        scheduler
            .spawn_detached("stuck", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .unwrap();

        let report = scheduler.await_all(Duration::ZERO).await;
        assert!(report.deadline_exceeded);
        assert_eq!(report.abandoned, vec!["stuck".to_string()]);
        assert!(report.finished.is_empty());

        assert_eq!(scheduler.close(), 1);
    }

    #[tokio::test]
    async fn panicking_unit_is_reported_as_failed() {
        let scheduler = Scheduler::new();
        scheduler
            .spawn_detached("panics", async {
                if true {
                    panic!("unit exploded");
                }
                Ok(())
            })
            .unwrap();

        let report = scheduler.await_all(Duration::from_secs(5)).await;
        assert_eq!(report.failed, vec![("panics".to_string(), "panic".to_string())]);
    }

    #[tokio::test]
    async fn root_cancel_is_idempotent_and_close_rejects_work() {
        let scheduler = Scheduler::new();
        assert!(scheduler.cancel_root());
        assert!(!scheduler.cancel_root());
        assert!(scheduler.root_token().is_cancelled());

        scheduler.close();
        let err = scheduler.spawn("late", |_| async { Ok(()) }).err().unwrap();
        assert!(matches!(err, CoordinatorError::EngineClosed));
    }
}
