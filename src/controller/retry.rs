//! Bounded retry for optimistic-concurrency updates
//!
//! [`retry_on_conflict`] re-runs a read-modify-write attempt whenever the API
//! server rejects it with a conflict, sleeping with exponential backoff and
//! jitter between attempts. Any other error ends the loop immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    /// Fraction of the delay added or removed at random, e.g. 0.1 for ±10%
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    /// Un-jittered delay before retry number `attempt` (1-based)
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.initial_delay.as_secs_f64() * factor)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(base);
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((base * (1.0 + spread)).max(0.0))
    }
}

/// Run `attempt` until it succeeds, fails with a non-conflict error, or
/// `config.max_attempts` conflicts have been seen.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries = 0u32;
    loop {
        tries += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_conflict() => {
                if tries >= config.max_attempts {
                    error!(operation, attempts = tries, error = %e, "Conflict retries exhausted");
                    return Err(Error::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: tries,
                        last_error: e.to_string(),
                    });
                }
                let delay = config.jittered_delay(tries);
                warn!(
                    operation,
                    attempt = tries,
                    delay_ms = delay.as_millis() as u64,
                    "Update conflicted with a concurrent writer, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
