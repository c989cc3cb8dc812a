//! Retry logic for generation-backend calls.
//!
//! Bounded exponential backoff with deterministic jitter for transient
//! failures; `Retry-After` is honored when the backend sends one. Exhaustion
//! never hangs a request: the caller gets an error to resolve per the
//! policy's failure mode.

use std::time::Duration;

use crate::error::{ShieldError, ShieldResult};

/// Configuration for backend retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt (0 = single attempt).
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Cap on a single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

/// HTTP status codes that warrant a retry.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 529];

impl RetryConfig {
    /// Delay for a 0-indexed attempt: `base * 2^attempt`, capped, with a
    /// deterministic jitter of ±25% keyed on the attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp_delay = self.base_delay_ms.saturating_mul(1u64 << attempt.min(10));
        let capped = exp_delay.min(self.max_delay_ms);

        let jitter_range = capped / 4;
        let jittered = if jitter_range > 0 {
            let jitter_offset = (u64::from(attempt) * 7 + 3) % (jitter_range * 2 + 1);
            capped - jitter_range + jitter_offset
        } else {
            capped
        };

        Duration::from_millis(jittered)
    }

    /// Parse a `Retry-After` header value (integer or decimal seconds).
    /// Values outside (0, 300] are ignored.
    pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
        let value = header_value?.trim();
        if let Ok(seconds) = value.parse::<f64>() {
            if seconds > 0.0 && seconds <= 300.0 {
                return Some(Duration::from_secs_f64(seconds));
            }
        }
        None
    }
}

/// Outcome of a single backend attempt, used by the retry loop.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    /// Call succeeded.
    Success(T),
    /// Transient failure worth another attempt.
    Retryable {
        error: String,
        retry_after: Option<Duration>,
    },
    /// Non-transient failure; bail immediately.
    Fatal(String),
}

/// Execute an async operation with bounded retry.
///
/// The closure runs once per attempt (0-indexed) and reports an
/// [`AttemptOutcome`]. Retryable failures wait with exponential backoff,
/// preferring the backend's `Retry-After` when present. Exhausted retries
/// surface as [`ShieldError::BackendUnavailable`], which the policy's
/// failure mode resolves; fatal failures surface as
/// [`ShieldError::ExternalService`] and are never retried.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: F) -> ShieldResult<T>
where
    F: Fn(u32) -> Fut,
    Fut: std::future::Future<Output = AttemptOutcome<T>>,
{
    let mut last_error = String::new();

    for attempt in 0..=config.max_retries {
        match operation(attempt).await {
            AttemptOutcome::Success(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Backend call succeeded after retrying");
                }
                return Ok(value);
            }
            AttemptOutcome::Fatal(error) => {
                return Err(ShieldError::ExternalService(error));
            }
            AttemptOutcome::Retryable { error, retry_after } => {
                last_error = error;

                if attempt < config.max_retries {
                    let delay = retry_after.unwrap_or_else(|| config.delay_for_attempt(attempt));
                    tracing::warn!(
                        attempt = attempt + 1,
                        attempts_total = config.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "Backend call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(ShieldError::BackendUnavailable(format!(
        "backend call failed after {} attempts: {}",
        config.max_retries + 1,
        last_error
    )))
}
