//! Exponential backoff retry for activity attempts.
//!
//! The host applies this policy underneath an activity dispatch. The lifecycle
//! state machine only ever sees the final outcome of all attempts.

use std::time::Duration;

use crate::WorkflowError;

/// Configuration for retry behavior.
///
/// The delay between attempts grows exponentially up to `max_delay`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use subscription_workflow::reliability::RetryPolicy;
///
/// // Default policy: 3 attempts, 100ms initial delay, 5s max delay
/// let policy = RetryPolicy::default();
///
/// // A single attempt: failures surface to the workflow immediately
/// let no_retries = RetryPolicy::with_max_attempts(1);
/// assert_eq!(no_retries.max_attempts, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one (default: 3)
    pub max_attempts: u32,
    /// Delay before the second attempt (default: 100ms)
    pub initial_delay: Duration,
    /// Upper bound for any single delay (default: 5s)
    pub max_delay: Duration,
    /// Growth factor between consecutive delays (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with custom maximum attempts and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    /// Delay after the zero-based `attempt` failed.
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "delay_ms is finite, non-negative and below max_delay when converted"
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts.
///
/// # Examples
///
/// ```
/// use std::sync::{
///     Arc,
///     atomic::{AtomicU32, Ordering},
/// };
///
/// use subscription_workflow::{
///     WorkflowError,
///     reliability::{RetryPolicy, is_retryable, retry_with_backoff},
/// };
///
/// # async fn example() -> Result<(), WorkflowError> {
/// let attempts = Arc::new(AtomicU32::new(0));
///
/// retry_with_backoff(&RetryPolicy::default(), is_retryable, || {
///     let attempts = Arc::clone(&attempts);
///     async move {
///         if attempts.fetch_add(1, Ordering::Relaxed) < 1 {
///             Err(WorkflowError::activity_failed("sendWelcomeEmail", "mail server busy"))
///         } else {
///             Ok(())
///         }
///     }
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or the first
/// non-retryable error immediately.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    should_retry: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "Activity succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let retryable = should_retry(&error);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    retryable,
                    error = %error,
                    "Activity attempt failed"
                );

                if !retryable || attempt + 1 >= max_attempts {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(delay_ms = delay.as_millis(), "Sleeping before retry");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Determines whether the host may re-attempt after this error.
///
/// Only activity failures flagged retryable and attempt timeouts are retried.
/// Everything else reflects bad input, shutdown, or a programming error.
///
/// # Examples
///
/// ```
/// use subscription_workflow::{WorkflowError, reliability::is_retryable};
///
/// assert!(is_retryable(&WorkflowError::activity_failed("charge", "gateway timeout")));
/// assert!(!is_retryable(&WorkflowError::Validation("negative amount".to_string())));
/// assert!(!is_retryable(&WorkflowError::ProcessCancelled));
/// ```
#[must_use]
pub fn is_retryable(error: &WorkflowError) -> bool {
    match error {
        WorkflowError::ActivityFailed { retryable, .. } => *retryable,
        WorkflowError::ActivityTimeout { .. } => true,
        WorkflowError::Validation(_)
        | WorkflowError::ProcessCancelled
        | WorkflowError::InvalidTransition(_)
        | WorkflowError::ChargeNotRecorded(_)
        | WorkflowError::SignalRejected { .. }
        | WorkflowError::QueryNotFound(_)
        | WorkflowError::QueryFailed(_)
        | WorkflowError::InstanceNotFound(_)
        | WorkflowError::InstanceAlreadyStarted(_)
        | WorkflowError::InstanceClosed(_)
        | WorkflowError::Config(_) => false,
    }
}
