//! Deadline and cancellation helpers for upstream attempts

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a guarded future did not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Operation cancelled by caller")]
    Cancelled,
}

impl Interrupted {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Interrupted::TimedOut(_))
    }
}

/// Run `future` until it completes, `timeout` elapses, or `cancel` fires.
///
/// Cancellation wins over a simultaneous timeout. The future is dropped
/// in both interrupted cases.
pub async fn run_guarded<T>(
    timeout: Duration,
    cancel: &CancellationToken,
    future: impl Future<Output = T>,
) -> Result<T, Interrupted> {
    if cancel.is_cancelled() {
        return Err(Interrupted::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        result = tokio::time::timeout(timeout, future) => {
            result.map_err(|_| Interrupted::TimedOut(timeout))
        }
    }
}
