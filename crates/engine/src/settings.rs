//! Tunables for retries and the job queue.
//!
//! Both structs deserialize with defaults for every missing field, so the
//! binary can embed them in its own configuration file.

use std::time::Duration;

use serde::Deserialize;

/// Retry policy of [`Engine::create_transaction_with_retry`].
///
/// [`Engine::create_transaction_with_retry`]: crate::Engine::create_transaction_with_retry
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_retry_delay_ms: 50,
        }
    }
}

impl RetrySettings {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        exponential_backoff(self.initial_retry_delay_ms, retry)
    }
}

/// Job queue and worker pool configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Total number of runs a job gets, the first one included.
    pub attempts: u32,
    pub backoff_delay_ms: u64,
    /// Forget completed jobs right away (their status becomes `not_found`).
    pub remove_on_complete: bool,
    /// Forget failed jobs right away (their status becomes `not_found`).
    pub remove_on_fail: bool,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    /// How long a job may stay `active` before a starting worker treats its
    /// owner as gone and puts it back to `waiting`.
    pub lease_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_delay_ms: 1000,
            remove_on_complete: false,
            remove_on_fail: false,
            concurrency: 4,
            poll_interval_ms: 200,
            lease_ms: 300_000,
        }
    }
}

impl QueueSettings {
    /// Delay before the run following attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        exponential_backoff(self.backoff_delay_ms, attempt)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }
}

fn exponential_backoff(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_backoff_doubles_per_attempt() {
        let settings = QueueSettings::default();
        assert_eq!(settings.backoff(1), Duration::from_millis(1000));
        assert_eq!(settings.backoff(2), Duration::from_millis(2000));
        assert_eq!(settings.backoff(3), Duration::from_millis(4000));
    }

    #[test]
    fn retry_delay_is_capped() {
        let settings = RetrySettings {
            max_retries: 100,
            initial_retry_delay_ms: 1,
        };
        assert_eq!(settings.delay(1), Duration::from_millis(1));
        assert_eq!(settings.delay(60), Duration::from_millis(1 << 16));
    }

    #[test]
    fn partial_settings_fall_back_to_defaults() {
        let settings: QueueSettings = serde_json::from_str(r#"{"attempts": 5}"#).unwrap();
        assert_eq!(settings.attempts, 5);
        assert_eq!(settings.backoff_delay_ms, 1000);
        assert!(!settings.remove_on_complete);
    }
}
