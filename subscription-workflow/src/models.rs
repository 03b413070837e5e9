//! Customer, plan, and per-instance state.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Maximum length of a customer identifier.
const MAX_CUSTOMER_ID_LEN: usize = 64;

/// Largest per-period charge accepted, in whole currency units.
pub const MAX_CHARGE_AMOUNT: i64 = 1_000_000_000_000;

/// Terms of a subscription.
///
/// Durations are relative intervals, not wall-clock timestamps. On the wire
/// they are integer milliseconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use rust_decimal::Decimal;
/// use subscription_workflow::models::SubscriptionPlan;
///
/// let plan: SubscriptionPlan = serde_json::from_str(
///     r#"{"trialPeriod":2000,"billingPeriod":2000,
///         "maxBillingPeriods":3,"initialBillingPeriodCharge":100}"#,
/// )
/// .unwrap();
///
/// assert_eq!(plan.trial_period, Duration::from_secs(2));
/// assert_eq!(plan.initial_billing_period_charge, Decimal::from(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    /// Length of the free trial.
    #[serde(with = "duration_ms")]
    pub trial_period: Duration,
    /// Length of one billing period.
    #[serde(with = "duration_ms")]
    pub billing_period: Duration,
    /// Number of billing periods before the subscription runs out.
    pub max_billing_periods: u32,
    /// Charge for each period until changed by a signal.
    pub initial_billing_period_charge: Decimal,
}

impl SubscriptionPlan {
    /// Validates plan terms.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Validation`] if the initial charge is negative
    /// or above [`MAX_CHARGE_AMOUNT`].
    pub fn validate(&self) -> Result<()> {
        check_charge_amount(self.initial_billing_period_charge)
            .map_err(|reason| WorkflowError::Validation(format!("initial {reason}")))
    }
}

fn check_charge_amount(amount: Decimal) -> std::result::Result<(), String> {
    if amount < Decimal::ZERO {
        return Err(format!("billing period charge must not be negative, got {amount}"));
    }
    if amount > Decimal::from(MAX_CHARGE_AMOUNT) {
        return Err(format!(
            "billing period charge must not exceed {MAX_CHARGE_AMOUNT}, got {amount}"
        ));
    }
    Ok(())
}

/// Subscriber identity, contact details, and plan.
///
/// Immutable for the lifetime of one workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    /// Customer identifier.
    pub id: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Address notifications are sent to.
    pub email: String,
    /// Subscription terms.
    pub subscription: SubscriptionPlan,
}

impl Customer {
    /// Validates identity, contact details, and plan.
    ///
    /// Customer IDs must be 1-64 characters of letters, digits, hyphens, or
    /// underscores. Emails need a non-empty local part and domain.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.len() > MAX_CUSTOMER_ID_LEN {
            return Err(WorkflowError::Validation(format!(
                "customer id must be 1-{MAX_CUSTOMER_ID_LEN} characters"
            )));
        }
        if !self.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(WorkflowError::Validation(format!(
                "customer id {:?} contains invalid characters",
                self.id
            )));
        }
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(WorkflowError::Validation("customer name must not be empty".to_owned()));
        }
        match self.email.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {}
            _ => {
                return Err(WorkflowError::Validation(format!(
                    "customer email {:?} is not a valid address",
                    self.email
                )));
            }
        }
        self.subscription.validate()
    }

    /// Returns "first last", as used to address notifications.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Conventional workflow id for this customer's subscription.
    #[must_use]
    pub fn workflow_id(&self) -> String {
        format!("subscription-{}", self.id)
    }
}

/// Mutable state of one running subscription instance.
///
/// Owned by the instance's single logical thread. Fields change only through
/// the lifecycle state machine and the registered signal handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceState {
    cancelled: bool,
    billing_period_number: u32,
    billing_period_charge_amount: Decimal,
    total_charged: Decimal,
}

impl InstanceState {
    /// Creates the initial state for a plan: period 1, nothing charged.
    #[must_use]
    pub fn new(plan: &SubscriptionPlan) -> Self {
        Self {
            cancelled: false,
            billing_period_number: 1,
            billing_period_charge_amount: plan.initial_billing_period_charge,
            total_charged: Decimal::ZERO,
        }
    }

    /// Whether the customer asked to cancel.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Current billing period counter, starting at 1.
    #[must_use]
    pub fn billing_period_number(&self) -> u32 {
        self.billing_period_number
    }

    /// Amount the next charge will use.
    #[must_use]
    pub fn billing_period_charge_amount(&self) -> Decimal {
        self.billing_period_charge_amount
    }

    /// Sum of all successful charges.
    #[must_use]
    pub fn total_charged(&self) -> Decimal {
        self.total_charged
    }

    /// Marks the subscription cancelled. Returns `false` if it already was.
    pub fn cancel(&mut self) -> bool {
        !std::mem::replace(&mut self.cancelled, true)
    }

    /// Replaces the per-period charge for future charges.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Validation`] for a negative amount or one above
    /// [`MAX_CHARGE_AMOUNT`]; the state is unchanged.
    pub fn update_charge_amount(&mut self, amount: Decimal) -> Result<()> {
        check_charge_amount(amount).map_err(WorkflowError::Validation)?;
        self.billing_period_charge_amount = amount;
        Ok(())
    }

    /// Books a successful charge of the amount captured at dispatch and moves
    /// to the next period.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::ChargeNotRecorded`] if the running total or the
    /// period counter would overflow. The state is unchanged.
    pub(crate) fn record_charge(&mut self, amount: Decimal) -> Result<()> {
        let total = self.total_charged.checked_add(amount).ok_or_else(|| {
            WorkflowError::ChargeNotRecorded(format!(
                "total {} plus charge {amount} overflows",
                self.total_charged
            ))
        })?;
        let period = self.billing_period_number.checked_add(1).ok_or_else(|| {
            WorkflowError::ChargeNotRecorded("billing period counter overflows".to_owned())
        })?;
        self.total_charged = total;
        self.billing_period_number = period;
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).map_err(serde::ser::Error::custom)?;
        serializer.serialize_u64(millis)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
