//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGINT and SIGTERM handlers (Ctrl-C where those do not exist)
//! - Cancel the root token on the first signal
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Repeated signals are logged and ignored; the drain is already under way
//!   and has its own deadline
//! - Handlers are registered before the endpoint is bound; the listener
//!   task starts once the scheduler exists
//! - Only this listener reacts to interrupts. Shared state connections run
//!   with `ignore_interrupts` and stop through the server instead.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::lifecycle::scheduler::Scheduler;

/// Termination signal handlers, registered but not yet acted on.
///
/// Register before binding anything: from then on a signal no longer kills
/// the process outright. Signals that arrive before [`SignalListener::spawn`]
/// are held by the streams and delivered once the listener runs.
pub struct SignalListener {
    signals: Signals,
}

impl SignalListener {
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {
            signals: Signals::register()?,
        })
    }

    /// Start reacting: the first signal cancels the scheduler's root token.
    pub fn spawn(self, scheduler: Arc<Scheduler>) -> JoinHandle<()> {
        let mut signals = self.signals;
        tokio::spawn(async move {
            loop {
                let Some(name) = signals.recv().await else {
                    break;
                };
                if scheduler.cancel_root() {
                    tracing::info!(signal = name, "Termination signal received, draining");
                } else {
                    tracing::debug!(signal = name, "Signal ignored, drain already requested");
                }
                if scheduler.is_closed() {
                    break;
                }
            }
        })
    }
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            received = self.interrupt.recv() => received.map(|_| "SIGINT"),
            received = self.terminate.recv() => received.map(|_| "SIGTERM"),
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|_| "ctrl-c")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_before_spawn_cancels_root_once_listening() {
        let listener = SignalListener::register().unwrap();

        let status = std::process::Command::new("kill")
            .arg("-TERM")
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let scheduler = Arc::new(Scheduler::new());
        let root = scheduler.root_token();
        let handle = listener.spawn(Arc::clone(&scheduler));

        tokio::time::timeout(Duration::from_secs(2), root.cancelled())
            .await
            .unwrap();
        assert!(!scheduler.cancel_root());
        handle.abort();
    }
}
