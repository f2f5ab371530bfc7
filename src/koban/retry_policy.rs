//! Retry policy for individual Koban calls.
//!
//! Implements exponential backoff of `backoff_base_secs^attempt` seconds
//! between attempts of the same request.

use std::time::Duration;

use crate::config::KobanSettings;

use super::error::KobanError;

#[derive(Debug, Clone)]
pub struct RequestRetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// Base of the exponential delay, in seconds.
    pub backoff_base_secs: f64,
    /// Cap for a single delay.
    pub max_backoff_secs: u64,
}

impl RequestRetryPolicy {
    pub fn new(settings: &KobanSettings) -> Self {
        Self {
            max_attempts: settings.request_max_attempts.max(1),
            backoff_base_secs: settings.backoff_base_secs,
            max_backoff_secs: settings.max_backoff_secs,
        }
    }

    /// Whether a call that failed on attempt `attempt` (1-based) gets another try.
    pub fn should_retry(&self, error: &KobanError, attempt: u32) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Delay to wait after the failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self
            .backoff_base_secs
            .max(0.0)
            .powi(attempt as i32)
            .min(self.max_backoff_secs as f64);
        Duration::from_secs_f64(secs)
    }
}

impl Default for RequestRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 2.0,
            max_backoff_secs: 30,
        }
    }
}
