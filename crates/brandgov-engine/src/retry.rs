use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigurationError, ModelError};

/// Attempt, backoff and timeout settings shared by every stage that calls a
/// model. Calls are numbered from 0.
///
/// - delay before call `n` (n ≥ 1) is `base_delay × 2^(n-1)`, capped at `max_delay`
/// - call `n` gets `initial_timeout + n × timeout_step`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub initial_timeout_ms: u64,
    pub timeout_step_ms: u64,
}

/// Outcome of a policy run that never succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: ModelError,
}

impl RetryPolicy {
    pub fn generation_default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            initial_timeout_ms: 60_000,
            timeout_step_ms: 30_000,
        }
    }

    pub fn audit_default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 500,
            max_delay_ms: 4_000,
            initial_timeout_ms: 45_000,
            timeout_step_ms: 15_000,
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), ConfigurationError> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::Invalid(format!(
                "{name}.max_attempts must be at least 1"
            )));
        }
        if self.initial_timeout_ms == 0 {
            return Err(ConfigurationError::Invalid(format!(
                "{name}.initial_timeout_ms must be positive"
            )));
        }
        if self.max_attempts > 1 && self.timeout_step_ms == 0 {
            return Err(ConfigurationError::Invalid(format!(
                "{name}.timeout_step_ms must be positive so retries get longer timeouts"
            )));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigurationError::Invalid(format!(
                "{name}.max_delay_ms must not be below base_delay_ms"
            )));
        }
        Ok(())
    }

    pub fn delay_before(&self, call: u32) -> Duration {
        if call == 0 {
            return Duration::ZERO;
        }
        let exponent = (call - 1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn timeout_for(&self, call: u32) -> Duration {
        Duration::from_millis(
            self.initial_timeout_ms
                .saturating_add(self.timeout_step_ms.saturating_mul(u64::from(call))),
        )
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. `op` receives the call index and its timeout. A
    /// rate-limit `retry_after` raises the next delay but never past the cap.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32, Duration) -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut call = 0u32;
        loop {
            match op(call, self.timeout_for(call)).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let attempts = call + 1;
                    if !err.is_retryable() || attempts >= max_attempts {
                        return Err(RetryExhausted {
                            attempts,
                            last_error: err,
                        });
                    }
                    let mut delay = self.delay_before(attempts);
                    if let Some(retry_after) = err.retry_after() {
                        delay = delay
                            .max(retry_after)
                            .min(Duration::from_millis(self.max_delay_ms));
                    }
                    warn!(
                        operation,
                        attempt = attempts,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "model call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    call = attempts;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::generation_default()
    }
}
