//! Bounded exponential backoff for transient external failures.

use std::future::Future;

use rand::Rng;
use tokio::time::Duration;
use tracing::{debug, warn};

use rowboat_shared::config::LimitsConfig;
use rowboat_shared::Result;

/// Retry parameters, resolved once from the job limits.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total calls per operation invocation (first try + retries).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_limits(limits: &LimitsConfig) -> Self {
        Self {
            max_attempts: limits.max_attempts.max(1),
            base_delay: Duration::from_millis(limits.retry_base_ms),
            multiplier: limits.retry_multiplier,
            max_delay: Duration::from_millis(limits.retry_max_delay_ms),
        }
    }

    /// Run `operation`, retrying transient errors with backoff and jitter.
    /// Permanent errors are surfaced immediately. The attempt budget applies
    /// per invocation of `execute`, never globally.
    pub async fn execute<T, F, Fut>(&self, op_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(
                        op = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!(op = op_name, attempts = attempt, error = %err, "retries exhausted");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Exponential delay for the given attempt, jittered to half-to-full of
    /// the nominal value so concurrent rows don't retry in lockstep.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let nominal = self.base_delay.as_secs_f64() * exp;
        let capped = nominal.min(self.max_delay.as_secs_f64());
        let jittered = capped * rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_secs_f64(jittered)
    }
}
