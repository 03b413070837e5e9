//! Activity invocation port.
//!
//! Activities are the side-effecting calls a subscription makes: notification
//! emails and billing-period charges. The workflow never calls an
//! implementation directly. It hands an [`ActivityRequest`] to [`dispatch`],
//! which bounds each attempt by a start-to-close timeout and applies the
//! host's [`RetryPolicy`].
//!
//! # Examples
//!
//! ```
//! use rust_decimal::Decimal;
//! use subscription_workflow::activity::{
//!     ActivityOptions, ActivityRequest, LoggingActivities, dispatch,
//! };
//! # use subscription_workflow::models::{Customer, SubscriptionPlan};
//! # use std::time::Duration;
//!
//! # async fn example() -> subscription_workflow::error::Result<()> {
//! # let customer = Customer {
//! #     id: "ABC123".to_owned(),
//! #     first_name: "Grant".to_owned(),
//! #     last_name: "Fleming".to_owned(),
//! #     email: "email-1@customer.com".to_owned(),
//! #     subscription: SubscriptionPlan {
//! #         trial_period: Duration::from_secs(2),
//! #         billing_period: Duration::from_secs(2),
//! #         max_billing_periods: 12,
//! #         initial_billing_period_charge: Decimal::from(100),
//! #     },
//! # };
//! let request = ActivityRequest::ChargeCustomer { amount: Decimal::from(100) };
//! dispatch(&LoggingActivities, &customer, &request, &ActivityOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use crate::{
    error::{Result, WorkflowError},
    models::Customer,
    reliability::{RetryPolicy, is_retryable, retry_with_backoff},
};

/// Default budget for one activity attempt.
pub const DEFAULT_START_TO_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Side effects a subscription workflow can request.
///
/// Implementations must be safe to share between instances. Return
/// [`WorkflowError::ActivityFailed`] on failure; set `retryable` to `false`
/// when another attempt cannot succeed.
#[async_trait]
pub trait SubscriptionActivities: Send + Sync {
    /// Greets a new subscriber.
    async fn send_welcome_email(&self, customer: &Customer) -> Result<()>;

    /// Confirms a cancellation that happened during the trial.
    async fn send_cancellation_email_during_trial(&self, customer: &Customer) -> Result<()>;

    /// Confirms a cancellation that happened after billing started.
    async fn send_subscription_finished_email(&self, customer: &Customer) -> Result<()>;

    /// Tells the customer every billing period has been used.
    async fn send_subscription_over_email(&self, customer: &Customer) -> Result<()>;

    /// Charges one billing period.
    async fn charge_customer_for_billing_period(
        &self,
        customer: &Customer,
        amount: Decimal,
    ) -> Result<()>;
}

/// One activity call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityRequest {
    /// Welcome notification.
    SendWelcomeEmail,
    /// Trial cancellation notification.
    SendCancellationEmailDuringTrial,
    /// Post-billing cancellation notification.
    SendSubscriptionFinishedEmail,
    /// Subscription-over notification.
    SendSubscriptionOverEmail,
    /// Billing-period charge. `amount` is the charge amount at dispatch time.
    ChargeCustomer {
        /// Amount to charge.
        amount: Decimal,
    },
}

impl ActivityRequest {
    /// Activity name as it appears in logs and history.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendWelcomeEmail => "sendWelcomeEmail",
            Self::SendCancellationEmailDuringTrial => "sendCancellationEmailDuringTrialPeriod",
            Self::SendSubscriptionFinishedEmail => "sendSubscriptionFinishedEmail",
            Self::SendSubscriptionOverEmail => "sendSubscriptionOverEmail",
            Self::ChargeCustomer { .. } => "chargeCustomerForBillingPeriod",
        }
    }

    /// Rejects requests no implementation should ever see.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Validation`] for a negative charge.
    pub fn validate(&self) -> Result<()> {
        if let Self::ChargeCustomer { amount } = self
            && *amount < Decimal::ZERO
        {
            return Err(WorkflowError::Validation(format!(
                "charge amount must not be negative, got {amount}"
            )));
        }
        Ok(())
    }

    async fn invoke(
        &self,
        activities: &dyn SubscriptionActivities,
        customer: &Customer,
    ) -> Result<()> {
        match self {
            Self::SendWelcomeEmail => activities.send_welcome_email(customer).await,
            Self::SendCancellationEmailDuringTrial => {
                activities.send_cancellation_email_during_trial(customer).await
            }
            Self::SendSubscriptionFinishedEmail => {
                activities.send_subscription_finished_email(customer).await
            }
            Self::SendSubscriptionOverEmail => {
                activities.send_subscription_over_email(customer).await
            }
            Self::ChargeCustomer { amount } => {
                activities.charge_customer_for_billing_period(customer, *amount).await
            }
        }
    }
}

/// Per-call execution options applied by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityOptions {
    /// Budget for a single attempt (default: 5s).
    pub start_to_close_timeout: Duration,
    /// Retry policy across attempts.
    pub retry_policy: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close_timeout: DEFAULT_START_TO_CLOSE_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Runs one activity request to a single final outcome.
///
/// # Errors
///
/// - [`WorkflowError::Validation`] if the request is malformed (never attempted)
/// - [`WorkflowError::ActivityTimeout`] if the last attempt ran out of time
/// - [`WorkflowError::ActivityFailed`] if the last attempt failed
pub async fn dispatch(
    activities: &dyn SubscriptionActivities,
    customer: &Customer,
    request: &ActivityRequest,
    options: &ActivityOptions,
) -> Result<()> {
    request.validate()?;
    let timeout = options.start_to_close_timeout;

    retry_with_backoff(&options.retry_policy, is_retryable, || async move {
        match tokio::time::timeout(timeout, request.invoke(activities, customer)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(WorkflowError::ActivityTimeout {
                activity: request.name().to_owned(),
                timeout,
            }),
        }
    })
    .await
}

/// Activities that only log what they would do.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingActivities;

#[async_trait]
impl SubscriptionActivities for LoggingActivities {
    async fn send_welcome_email(&self, customer: &Customer) -> Result<()> {
        info!(email = %customer.email, name = %customer.full_name(), "Sending welcome email");
        Ok(())
    }

    async fn send_cancellation_email_during_trial(&self, customer: &Customer) -> Result<()> {
        info!(email = %customer.email, "Sending trial cancellation email");
        Ok(())
    }

    async fn send_subscription_finished_email(&self, customer: &Customer) -> Result<()> {
        info!(email = %customer.email, "Sending subscription completed email");
        Ok(())
    }

    async fn send_subscription_over_email(&self, customer: &Customer) -> Result<()> {
        info!(email = %customer.email, "Sending subscription over email");
        Ok(())
    }

    async fn charge_customer_for_billing_period(
        &self,
        customer: &Customer,
        amount: Decimal,
    ) -> Result<()> {
        info!(email = %customer.email, %amount, "Charging customer for billing period");
        Ok(())
    }
}
