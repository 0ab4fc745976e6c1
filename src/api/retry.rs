//! Retry logic with exponential backoff shared by every API call.
//!
//! When a call fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - the resource is gone or the response shape is wrong
//! - [`FailureType::NeedsAuth`] - the credential was rejected
//! - [`FailureType::RateLimited`] - server rate limiting (retries with backoff)
//!
//! [`RetryPolicy::execute`] drives an async operation through that
//! classification, sleeping between attempts.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use chat_backup_core::api::{ApiError, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::default();
//! let error = ApiError::http_status("conversations", 503, "Service Unavailable");
//!
//! match policy.should_retry(&error, 0) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(attempt, 1);
//!         assert!(delay >= Duration::from_secs(1));
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::ApiError;

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (60 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Jitter is drawn from `[0, JITTER_RATIO * exponential_delay)`.
const JITTER_RATIO: f64 = 0.3;

/// Maximum Retry-After value honored (1 hour).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Callback invoked before each retry with the error, the 1-based number of
/// the attempt that failed, and the delay about to be slept.
pub type RetryObserver = dyn Fn(&ApiError, u32, Duration) + Send + Sync;

/// Classification of API failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    Transient,

    /// The resource is gone, or the response can never decode.
    Permanent,

    /// The credential was rejected.
    NeedsAuth,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

impl FailureType {
    /// Returns whether failures of this type are worth another attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Decision on whether to retry a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Index of the next attempt (0 is the initial attempt).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Delay Calculation
///
/// ```text
/// exponential = base_delay * 2^attempt
/// delay       = min(exponential + jitter, max_delay),  jitter in [0, 0.3 * exponential)
/// ```
///
/// A rate-limit error carrying a Retry-After hint waits at least that long
/// when `honor_retry_after` is enabled.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    max_retries: u32,

    /// Delay before the first retry.
    base_delay: Duration,

    /// Maximum delay cap.
    max_delay: Duration,

    /// Whether a Retry-After hint can lengthen the backoff delay.
    honor_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            honor_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy with custom settings.
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            honor_retry_after: true,
        }
    }

    /// Creates a policy with a custom retry count, using defaults for other settings.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Returns a copy of this policy with a different retry count.
    #[must_use]
    pub fn reduced_to(&self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self.clone()
        }
    }

    /// Enables or disables honoring Retry-After hints.
    #[must_use]
    pub fn honor_retry_after(mut self, honor: bool) -> Self {
        self.honor_retry_after = honor;
        self
    }

    /// Returns the number of retries after the initial attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Runs `operation` until it succeeds, fails permanently, or runs out of retries.
    ///
    /// # Errors
    ///
    /// Returns the last [`ApiError`] once retries are exhausted, or the first
    /// non-retryable error immediately.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.run(operation, None).await
    }

    /// Like [`execute`](Self::execute), notifying `observer` before each retry.
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute).
    pub async fn execute_with_observer<T, F, Fut>(
        &self,
        operation: F,
        observer: &RetryObserver,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.run(operation, Some(observer)).await
    }

    async fn run<T, F, Fut>(
        &self,
        mut operation: F,
        observer: Option<&RetryObserver>,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0u32;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.should_retry(&error, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying API call"
                    );
                    if let Some(observer) = observer {
                        observer(&error, attempt + 1, delay);
                    }
                    tokio::time::sleep(delay).await;
                    attempt = next_attempt;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, error = %error, "not retrying API call");
                    return Err(error);
                }
            }
        }
    }

    /// Determines whether to retry after `attempt` (0-based) failed with `error`.
    #[must_use]
    pub fn should_retry(&self, error: &ApiError, attempt: u32) -> RetryDecision {
        match classify_error(error) {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "credential rejected - retry would not help".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_retries {
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({}) exhausted", self.max_retries),
            };
        }

        let mut delay = self.calculate_delay(attempt);
        if self.honor_retry_after
            && let Some(hint) = error.retry_after()
        {
            delay = delay.max(hint.min(MAX_RETRY_AFTER));
        }

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Returns the delay before jitter: `min(base_delay * 2^attempt, max_delay)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.exponential_ms(attempt).min(self.max_delay_ms()) as u64)
    }

    #[allow(clippy::cast_precision_loss)]
    fn exponential_ms(&self, attempt: u32) -> f64 {
        let base_ms = self.base_delay.as_millis() as f64;
        base_ms * 2f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX))
    }

    #[allow(clippy::cast_precision_loss)]
    fn max_delay_ms(&self) -> f64 {
        self.max_delay.as_millis() as f64
    }

    /// Calculates the jittered delay for a 0-based attempt.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponential = self.exponential_ms(attempt);
        let jitter = calculate_jitter(exponential);
        let capped = (exponential + jitter).min(self.max_delay_ms());
        Duration::from_millis(capped as u64)
    }
}

/// Random jitter in `[0, JITTER_RATIO * exponential_ms)`.
fn calculate_jitter(exponential_ms: f64) -> f64 {
    let upper = exponential_ms * JITTER_RATIO;
    if !upper.is_finite() || upper <= 0.0 {
        return 0.0;
    }
    rand::thread_rng().gen_range(0.0..upper)
}

/// Classifies an API error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Authentication (401/403) | NeedsAuth |
/// | RateLimited (429) | RateLimited |
/// | Network 404 / 410 | Permanent |
/// | Network, any other status or no response | Transient |
/// | Validation | Permanent |
#[must_use]
pub fn classify_error(error: &ApiError) -> FailureType {
    match error {
        ApiError::Authentication { .. } => FailureType::NeedsAuth,
        ApiError::RateLimited { .. } => FailureType::RateLimited,
        ApiError::Network { status, .. } => match status {
            Some(404 | 410) => FailureType::Permanent,
            Some(_) | None => FailureType::Transient,
        },
        ApiError::Validation { .. } => FailureType::Permanent,
    }
}
