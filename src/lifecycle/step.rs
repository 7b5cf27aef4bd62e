//! Log-and-continue adapter for drain steps.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use crate::error::{describe_kind, BoxError, CoordinatorError};
use crate::observability::metrics;

/// Run one best-effort step, turning errors and panics into `TeardownStepFailed`.
///
/// The failure is logged with its originating kind; the caller records it and
/// moves on to the next step.
pub async fn contain<F, T>(step: &str, work: F) -> Result<T, CoordinatorError>
where
    F: Future<Output = Result<T, BoxError>>,
{
    let (kind, message) = match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(value)) => {
            metrics::record_drain_step(step, true);
            return Ok(value);
        }
        Ok(Err(e)) => (describe_kind(&*e), e.to_string()),
        Err(panic) => ("panic".to_string(), panic_message(&*panic)),
    };

    metrics::record_drain_step(step, false);
    tracing::warn!(step, kind = %kind, error = %message, "Teardown step failed, continuing");
    Err(CoordinatorError::TeardownStepFailed {
        step: step.to_string(),
        kind,
        message,
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_passes_through() {
        let value = contain("flush", async { Ok::<_, BoxError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn error_keeps_its_kind() {
        let err = contain("persist:accounts", async {
            Err::<(), BoxError>(Box::new(std::io::Error::from(
                std::io::ErrorKind::PermissionDenied,
            )))
        })
        .await
        .unwrap_err();

        match err {
            CoordinatorError::TeardownStepFailed { step, kind, .. } => {
                assert_eq!(step, "persist:accounts");
                assert_eq!(kind, "io::PermissionDenied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let err = contain("refresh_accounting", async {
            if true {
                panic!("ledger corrupted");
            }
            Ok::<(), BoxError>(())
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("ledger corrupted"));
    }
}
