//! Deadlines and bounded retries for network calls.
//!
//! Every remote call goes through `with_timeout`, so a hung store or node
//! always surfaces as `Transport(Timeout)`. `retry` re-runs an operation only
//! while it keeps failing with a retriable (transport) error, backing off
//! exponentially up to `max_backoff`.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MedledgerError, TransportKind};

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retries.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Backoff before the given retry (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Run `fut`, mapping an elapsed deadline to `Transport(Timeout)`.
pub async fn with_timeout<T, F>(deadline: Duration, what: &str, fut: F) -> Result<T, MedledgerError>
where
    F: Future<Output = Result<T, MedledgerError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(MedledgerError::transport(
            TransportKind::Timeout,
            format!("{} timed out after {:?}", what, deadline),
        )),
    }
}

/// Run `op` until it succeeds, fails terminally, or attempts run out.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, MedledgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MedledgerError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retriable() && attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(operation = what, attempt, error = %err, ?delay, "retrying after transport error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(80), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transport_errors_only() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry(&RetryPolicy::default(), "flaky", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(MedledgerError::transport(TransportKind::Unreachable, "down"))
        })
        .await;
        assert!(result.unwrap_err().is_retriable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = retry(&RetryPolicy::default(), "denied", || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(MedledgerError::AccessDenied("nope".into()))
        })
        .await;
        assert!(matches!(result, Err(MedledgerError::AccessDenied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_transport() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(50), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(result.unwrap_err().is_timeout());
    }
}
