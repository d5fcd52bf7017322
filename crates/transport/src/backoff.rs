//! Delay between retries of a failing accept loop.
//!
//! Errors such as `EMFILE` make `accept()` fail again immediately until
//! resources free up.

use std::time::Duration;

/// Exponential backoff for consecutive accept failures.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for each further consecutive failure.
    pub backoff_factor: f64,
    failures: u32,
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            failures: 0,
        }
    }
}

impl AcceptBackoff {
    /// Records one failure and returns how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let exp = self.failures.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Clears the failure streak after a successful accept.
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
