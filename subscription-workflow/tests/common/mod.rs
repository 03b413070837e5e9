//! Shared fixtures for subscription workflow integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use subscription_workflow::{
    activity::SubscriptionActivities,
    config::WorkerConfig,
    error::{Result, WorkflowError},
    host::WorkflowHost,
    models::{Customer, SubscriptionPlan},
};

/// One activity call as seen by [`RecordingActivities`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Welcome,
    TrialCancellation,
    SubscriptionFinished,
    SubscriptionOver,
    Charge(Decimal),
}

/// How charges misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargeBehavior {
    #[default]
    Succeed,
    FailPermanently,
    Hang,
}

/// Activities that record every successful call.
#[derive(Debug, Default)]
pub struct RecordingActivities {
    calls: Mutex<Vec<Call>>,
    charge_behavior: ChargeBehavior,
}

impl RecordingActivities {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_charges(charge_behavior: ChargeBehavior) -> Arc<Self> {
        Arc::new(Self { charge_behavior, ..Self::default() })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn charges(&self) -> Vec<Decimal> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Charge(amount) => Some(amount),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SubscriptionActivities for RecordingActivities {
    async fn send_welcome_email(&self, _: &Customer) -> Result<()> {
        self.push(Call::Welcome);
        Ok(())
    }

    async fn send_cancellation_email_during_trial(&self, _: &Customer) -> Result<()> {
        self.push(Call::TrialCancellation);
        Ok(())
    }

    async fn send_subscription_finished_email(&self, _: &Customer) -> Result<()> {
        self.push(Call::SubscriptionFinished);
        Ok(())
    }

    async fn send_subscription_over_email(&self, _: &Customer) -> Result<()> {
        self.push(Call::SubscriptionOver);
        Ok(())
    }

    async fn charge_customer_for_billing_period(
        &self,
        _: &Customer,
        amount: Decimal,
    ) -> Result<()> {
        match self.charge_behavior {
            ChargeBehavior::Succeed => {
                self.push(Call::Charge(amount));
                Ok(())
            }
            ChargeBehavior::FailPermanently => Err(WorkflowError::activity_failed_permanently(
                "chargeCustomerForBillingPeriod",
                "card declined",
            )),
            ChargeBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

/// Plan `{trial: 2000ms, billing: 2000ms, max: 3, charge: 100}`.
pub fn customer() -> Customer {
    Customer {
        id: "ABC123".to_owned(),
        first_name: "Grant".to_owned(),
        last_name: "Fleming".to_owned(),
        email: "email-1@customer.com".to_owned(),
        subscription: SubscriptionPlan {
            trial_period: Duration::from_millis(2000),
            billing_period: Duration::from_millis(2000),
            max_billing_periods: 3,
            initial_billing_period_charge: Decimal::from(100),
        },
    }
}

pub fn host(activities: Arc<RecordingActivities>) -> WorkflowHost {
    WorkflowHost::new(WorkerConfig::default(), activities).unwrap()
}

/// Sleeps until `millis` after `start` in virtual time.
pub async fn at(start: tokio::time::Instant, millis: u64) {
    tokio::time::sleep_until(start + Duration::from_millis(millis)).await;
}
