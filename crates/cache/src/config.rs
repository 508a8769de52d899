use std::time::Duration;

use crate::retry::RetryPolicy;

/// Batching and retry knobs for a [`CoalescingCache`](crate::CoalescingCache).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// How long the first key of a batch waits for company.
    pub batch_window: Duration,
    /// Flush as soon as this many distinct keys are queued.
    pub max_batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { batch_window: Duration::from_millis(50), max_batch_size: 100, retry: RetryPolicy::default() }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<u64>().ok())
}

impl CacheConfig {
    /// Defaults overridden by `FEEDS_BATCH_WINDOW_MS`, `FEEDS_BATCH_MAX_KEYS`,
    /// `FEEDS_RETRY_MAX_ATTEMPTS`, `FEEDS_RETRY_BASE_MS` and `FEEDS_RETRY_MAX_MS`.
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(ms) = env_u64("FEEDS_BATCH_WINDOW_MS") { cfg.batch_window = Duration::from_millis(ms); }
        if let Some(n) = env_u64("FEEDS_BATCH_MAX_KEYS") { cfg.max_batch_size = (n as usize).max(1); }
        if let Some(n) = env_u64("FEEDS_RETRY_MAX_ATTEMPTS") { cfg.retry.max_attempts = n.clamp(1, u32::MAX as u64) as u32; }
        if let Some(ms) = env_u64("FEEDS_RETRY_BASE_MS") { cfg.retry.initial_backoff = Duration::from_millis(ms); }
        if let Some(ms) = env_u64("FEEDS_RETRY_MAX_MS") { cfg.retry.max_backoff = Duration::from_millis(ms); }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_and_ignores_garbage() {
        std::env::set_var("FEEDS_BATCH_WINDOW_MS", "5");
        std::env::set_var("FEEDS_BATCH_MAX_KEYS", "not-a-number");
        std::env::set_var("FEEDS_RETRY_MAX_ATTEMPTS", "7");
        let cfg = CacheConfig::from_env();
        std::env::remove_var("FEEDS_BATCH_WINDOW_MS");
        std::env::remove_var("FEEDS_BATCH_MAX_KEYS");
        std::env::remove_var("FEEDS_RETRY_MAX_ATTEMPTS");
        assert_eq!(cfg.batch_window, Duration::from_millis(5));
        assert_eq!(cfg.max_batch_size, 100);
        assert_eq!(cfg.retry.max_attempts, 7);
        assert_eq!(cfg.retry.initial_backoff, RetryPolicy::default().initial_backoff);
    }
}
