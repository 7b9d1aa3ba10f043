//! Bounded exponential backoff for backend calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{RagError, Result};

/// Retry schedule: `max_attempts` total tries with exponential backoff,
/// doubling from `initial_backoff` and capped at `max_backoff`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }

    /// Single-attempt policy, for callers that manage retries themselves.
    pub fn none() -> Self {
        RetryPolicy::new(1)
    }

    /// Backoff delay before attempt `attempt` (1-based; attempt 1 has none).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exp);
        delay.min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails non-transiently, or the attempt
    /// budget is exhausted. The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<RagError> = None;
        for attempt in 1..=self.max_attempts {
            let delay = self.backoff_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "transient failure, retrying"
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        // Unreachable when max_attempts >= 1, but be explicit.
        Err(last_err.unwrap_or_else(|| RagError::Index(format!("{label}: no attempts made"))))
    }
}
