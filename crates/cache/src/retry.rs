//! Bounded exponential-backoff retry for async operations.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `0` is treated as `1`.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max_backoff.as_secs_f64()))
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` is used up; the last
/// error is returned on exhaustion.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(v) => {
                if attempt > 1 {
                    info!(op = op_name, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) if attempt < attempts => {
                let delay = policy.backoff(attempt);
                warn!(op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %e, "attempt failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(op = op_name, attempt, error = %e, "retries exhausted");
                return Err(e);
            }
        }
    }
}
