use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::{CollaboratorError, Stage};
use crate::config::RetryConfig;

/// Retry with exponential backoff and a per-call timeout, applied uniformly
/// around every collaborator call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
    call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig, call_timeout: Duration) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
            call_timeout,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Un-jittered delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let anchor = self.backoff(attempt);
        if self.jitter_ratio == 0.0 || anchor.is_zero() {
            return anchor;
        }
        let span = anchor.as_secs_f64() * self.jitter_ratio;
        let lower = (anchor.as_secs_f64() - span).max(0.0);
        let upper = anchor.as_secs_f64() + span;
        Duration::from_secs_f64(rand::thread_rng().gen_range(lower..=upper))
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of
    /// attempts. A call exceeding the timeout counts as a transient failure.
    pub async fn run<T, F, Fut>(&self, stage: Stage, mut op: F) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(CollaboratorError::Timeout {
                    stage,
                    after: self.call_timeout,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.jittered(attempt);
                    tracing::warn!(
                        stage = %stage,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient collaborator failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
