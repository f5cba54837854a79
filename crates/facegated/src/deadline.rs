//! Timeouts for every await on an external collaborator.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{what} timed out after {after:?}")]
pub struct Elapsed {
    pub what: &'static str,
    pub after: Duration,
}

/// Await `fut` for at most `limit`.
pub async fn within<F: Future>(limit: Duration, what: &'static str, fut: F) -> Result<F::Output, Elapsed> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        tracing::warn!(what, timeout_ms = limit.as_millis() as u64, "operation timed out");
        Elapsed { what, after: limit }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_within_completes() {
        let value = within(Duration::from_secs(1), "fast", async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_within_times_out() {
        let result = within(Duration::from_millis(50), "never", std::future::pending::<()>()).await;
        let err = result.unwrap_err();
        assert_eq!(err.what, "never");
        assert_eq!(err.after, Duration::from_millis(50));
        assert_eq!(err.to_string(), "never timed out after 50ms");
    }
}
