//! Retry engine: exponential backoff with jitter, a deadline ceiling,
//! and a single out-of-budget auth-retry.
//!
//! Transport failures and 429/500/502/503/504 re-enter the loop until
//! the budget runs out. A 401 gets exactly one extra attempt after a
//! short fixed delay, independent of the budget, to absorb transient
//! token-validation hiccups; a second 401 surfaces as `AuthFailed`.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::ProviderError;

/// Fixed pause before the single auth-retry.
pub const AUTH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Backoff parameters for one provider.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    #[serde(with = "crate::duration_serde")]
    pub initial_delay: Duration,
    #[serde(with = "crate::duration_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry `attempt` (1-based), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw = self.initial_delay.mul_f64(self.multiplier.powi(exponent as i32));
        raw.min(self.max_delay)
    }
}

/// Drive `operation` to completion under `config`, never sleeping past
/// `deadline`.
///
/// The operation is an `FnMut` closure so the marshaled request body is
/// built once by the caller and reused across attempts.
pub async fn execute<F, Fut, T>(
    config: &RetryConfig,
    deadline: Option<Instant>,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;
    let mut auth_retried = false;

    loop {
        check_deadline(deadline)?;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_auth() && !auth_retried => {
                // One extra attempt outside the normal budget.
                auth_retried = true;
                debug!("401 from provider, retrying once after auth delay");
                sleep_within_deadline(AUTH_RETRY_DELAY, deadline).await?;
            }
            Err(error) => {
                attempt += 1;
                if attempt > config.max_retries || !error.is_retryable() {
                    return Err(error);
                }

                let base = config.delay_for_attempt(attempt);
                let jitter = base.mul_f64(rand::random::<f64>() * 0.1);
                debug!(
                    attempt,
                    delay_ms = (base + jitter).as_millis() as u64,
                    "retrying after {error}"
                );
                sleep_within_deadline(base + jitter, deadline).await?;
            }
        }
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<(), ProviderError> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(ProviderError::Timeout),
        _ => Ok(()),
    }
}

/// Sleep for `duration`, failing fast when the sleep would cross the
/// caller's deadline instead of wasting the remaining budget.
async fn sleep_within_deadline(
    duration: Duration,
    deadline: Option<Instant>,
) -> Result<(), ProviderError> {
    if let Some(deadline) = deadline {
        if Instant::now() + duration >= deadline {
            return Err(ProviderError::Timeout);
        }
    }
    tokio::time::sleep(duration).await;
    Ok(())
}
