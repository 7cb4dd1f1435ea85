use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

use super::error::ProductionError;
use crate::config::RetrySection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub error: ProductionError,
}

impl RetryPolicy {
    pub fn from_config(config: &RetrySection) -> Self {
        Self {
            attempts: config.max_attempts.max(1),
            delay: Duration::from_secs(config.delay_seconds),
        }
    }

    /// Runs `operation` until it succeeds, fails deterministically, or the
    /// attempt budget is spent. The delay is fixed between attempts.
    pub async fn run<F, Fut, T>(&self, stage: &str, mut operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProductionError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => {
                    error!(attempt, stage, error = %err, "deterministic failure, not retrying");
                    return Err(RetryFailure {
                        attempts: attempt,
                        error: err,
                    });
                }
                Err(err) if attempt >= attempts => {
                    error!(attempt, stage, error = %err, "retries exhausted");
                    return Err(RetryFailure {
                        attempts: attempt,
                        error: err,
                    });
                }
                Err(err) => {
                    warn!(attempt, wait = ?self.delay, stage, error = %err, "retrying operation");
                    if !self.delay.is_zero() {
                        sleep(self.delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
