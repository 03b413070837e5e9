//! Error types for subscription workflows.
//!
//! All errors implement the standard [`std::error::Error`] trait via [`thiserror::Error`].
//!
//! # Error Categories
//!
//! - **Validation Errors** ([`WorkflowError::Validation`]): bad customer or plan input,
//!   rejected before an instance starts
//! - **Activity Errors** ([`WorkflowError::ActivityFailed`], [`WorkflowError::ActivityTimeout`]):
//!   a notification or charge did not complete; fatal to the instance
//! - **Billing Errors** ([`WorkflowError::ChargeNotRecorded`]): a completed charge
//!   cannot be booked; fatal to the instance
//! - **Process Errors** ([`WorkflowError::ProcessCancelled`]): the host shut the instance down
//! - **Gateway Errors** ([`WorkflowError::SignalRejected`], [`WorkflowError::QueryNotFound`],
//!   [`WorkflowError::QueryFailed`]): a signal or query was refused; never fatal to the instance
//! - **Host Errors** ([`WorkflowError::InstanceNotFound`],
//!   [`WorkflowError::InstanceAlreadyStarted`], [`WorkflowError::InstanceClosed`],
//!   [`WorkflowError::Config`])
//!
//! # Examples
//!
//! ```
//! use subscription_workflow::error::{Result, WorkflowError};
//!
//! fn validate_customer_id(id: &str) -> Result<&str> {
//!     if id.is_empty() {
//!         return Err(WorkflowError::Validation("customer id must not be empty".to_owned()));
//!     }
//!     Ok(id)
//! }
//!
//! assert!(validate_customer_id("").is_err());
//! ```

use std::time::Duration;

use thiserror::Error;

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors that can occur while running or talking to a subscription workflow.
///
/// The type is `Clone` so a terminal error can be handed to every
/// [`InstanceHandle`](crate::gateway::InstanceHandle) waiting on the result.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    /// Customer or plan input failed validation.
    ///
    /// Raised before the instance is started; retrying with the same input
    /// fails the same way.
    #[error("Invalid subscription input: {0}")]
    Validation(String),

    /// An activity reported a failure.
    ///
    /// `retryable` tells the host whether another attempt may succeed.
    #[error("Activity {activity} failed: {reason}")]
    ActivityFailed {
        /// Activity name.
        activity: String,
        /// Failure description from the activity implementation.
        reason: String,
        /// Whether the host retry policy may re-attempt the call.
        retryable: bool,
    },

    /// An activity attempt exceeded its start-to-close timeout.
    #[error("Activity {activity} exceeded its start-to-close timeout of {timeout:?}")]
    ActivityTimeout {
        /// Activity name.
        activity: String,
        /// Allotted time for one attempt.
        timeout: Duration,
    },

    /// A successful charge could not be added to the instance's books.
    ///
    /// Fatal to the instance: the charge activity already ran, so the
    /// instance stops rather than report a total that omits it.
    #[error("Charge could not be recorded: {0}")]
    ChargeNotRecorded(String),

    /// The hosting process cancelled the instance.
    ///
    /// This is infrastructure-level cancellation, distinct from a customer
    /// cancelling their subscription.
    #[error("Workflow process was cancelled by the host")]
    ProcessCancelled,

    /// The lifecycle state machine received an event that does not fit its phase.
    #[error("Invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    /// A signal was refused by its handler or has no handler.
    #[error("Signal {signal} rejected: {reason}")]
    SignalRejected {
        /// Signal name.
        signal: String,
        /// Rejection reason.
        reason: String,
    },

    /// No query handler is registered under this name.
    #[error("Query handler not found: {0}")]
    QueryNotFound(String),

    /// A query handler could not produce an answer.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// No instance with this workflow id is known to the host.
    #[error("Workflow instance not found: {0}")]
    InstanceNotFound(String),

    /// An instance with this workflow id is still running.
    #[error("Workflow instance already started: {0}")]
    InstanceAlreadyStarted(String),

    /// The instance no longer accepts messages.
    #[error("Workflow instance closed: {0}")]
    InstanceClosed(String),

    /// Worker configuration is invalid.
    #[error("Invalid worker configuration: {0}")]
    Config(String),
}

impl WorkflowError {
    /// Creates a retryable activity failure.
    #[must_use]
    pub fn activity_failed(activity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ActivityFailed { activity: activity.into(), reason: reason.into(), retryable: true }
    }

    /// Creates an activity failure that the host must not retry.
    #[must_use]
    pub fn activity_failed_permanently(
        activity: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ActivityFailed { activity: activity.into(), reason: reason.into(), retryable: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let error = WorkflowError::Validation("negative charge".into());
        assert_eq!(error.to_string(), "Invalid subscription input: negative charge");
    }

    #[test]
    fn test_activity_failed_display() {
        let error =
            WorkflowError::activity_failed("chargeCustomerForBillingPeriod", "card declined");
        assert_eq!(
            error.to_string(),
            "Activity chargeCustomerForBillingPeriod failed: card declined"
        );
        assert!(matches!(error, WorkflowError::ActivityFailed { retryable: true, .. }));
    }

    #[test]
    fn test_permanent_activity_failure_is_not_retryable() {
        let error = WorkflowError::activity_failed_permanently("sendWelcomeEmail", "bounced");
        assert!(matches!(error, WorkflowError::ActivityFailed { retryable: false, .. }));
    }

    #[test]
    fn test_activity_timeout_display() {
        let error = WorkflowError::ActivityTimeout {
            activity: "sendWelcomeEmail".to_owned(),
            timeout: Duration::from_secs(5),
        };
        assert!(error.to_string().contains("5s"));
    }

    #[test]
    fn test_errors_are_comparable_after_clone() {
        let error = WorkflowError::InstanceClosed("subscription-ABC123".to_owned());
        assert_eq!(error.clone(), error);
    }
}
