//! Bounded exponential backoff for initial connections.

use std::future::Future;
use std::time::Duration;

use regsync_types::error::ConnectionError;

use crate::config::RetryConfig;
use crate::error::PollerError;

/// `max_attempts` tries, waiting `base_delay * 2^(attempt-1)` after each
/// failed one. The last failure is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_secs(config.base_delay_secs),
        }
    }

    /// Delay scheduled after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Full delay schedule, one entry per attempt.
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).map(|a| self.delay(a)).collect()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Run `connect` until it succeeds or the policy is exhausted.
///
/// # Errors
///
/// Returns [`PollerError::ConnectExhausted`] carrying the last
/// [`ConnectionError`] once `max_attempts` attempts have failed.
pub async fn connect_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    target: &str,
    mut connect: F,
) -> Result<T, PollerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectionError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match connect().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(target_name = target, attempt, "Connected after retry");
                }
                return Ok(value);
            }
            Err(err) if attempt < max_attempts => {
                let delay = policy.delay(attempt);
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                tracing::warn!(
                    target_name = target,
                    attempt,
                    max_retries = max_attempts,
                    delay_ms,
                    error = %err,
                    "Connection attempt failed, will retry"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                tracing::error!(
                    target_name = target,
                    attempt,
                    max_retries = max_attempts,
                    error = %err,
                    "Max connection attempts exhausted"
                );
                return Err(PollerError::ConnectExhausted {
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}
