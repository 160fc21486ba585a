use std::{future::Future, time::Duration};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::BrokerError;
use crate::config::BrokerConfig;

/// Fixed delay plus uniform jitter between attempts. Only transient errors
/// are retried; anything else is returned on the first failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &BrokerConfig) -> Self {
        Self {
            max_attempts: cfg.max_connect_attempts,
            base_delay: Duration::from_millis(cfg.retry_delay_ms),
            jitter_min: Duration::from_millis(cfg.retry_jitter_min_ms),
            jitter_max: Duration::from_millis(cfg.retry_jitter_max_ms),
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: Option<u32>) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    pub fn next_delay(&self) -> Duration {
        let lo = self.jitter_min.as_millis() as u64;
        let hi = (self.jitter_max.as_millis() as u64).max(lo);
        let jitter = rand::rng().random_range(lo..=hi);
        self.base_delay + Duration::from_millis(jitter)
    }

    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        shutdown: &CancellationToken,
        mut op: F,
    ) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if shutdown.is_cancelled() {
                return Err(BrokerError::Cancelled);
            }
            attempt += 1;

            match op().await {
                Ok(v) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "{what} succeeded after retrying");
                    }
                    return Ok(v);
                }
                Err(e) if e.is_transient() && self.max_attempts.map_or(true, |max| attempt < max) => {
                    let delay = self.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "{what} failed, retrying"
                    );
                    metrics::counter!("broker_retry_total").increment(1);

                    tokio::select! {
                        _ = shutdown.cancelled() => return Err(BrokerError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "{what} failed, giving up");
                    return Err(e);
                }
            }
        }
    }
}
