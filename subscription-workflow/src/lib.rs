//! Subscription Workflow: Durable Subscription Lifecycle Orchestration
//!
//! A Rust library that runs customer subscriptions as long-lived workflow
//! instances: a free trial, a fixed number of billing periods, and customer
//! cancellation or price changes arriving at any time.
//!
//! # What does an instance do?
//!
//! - **Welcome**: notify the customer when the subscription starts
//! - **Trial**: wait out the trial period unless the customer cancels first
//! - **Billing**: charge once per billing period until the plan runs out or the
//!   customer cancels
//! - **Wrap-up**: send a final notification and return a summary string
//!
//! While it runs, an instance accepts signals (`cancelSubscription`,
//! `updateBillingChargeAmount`) and answers queries (`customerIdNameQuery`,
//! `billingPeriodNumberQuery`, `totalChargedAmountQuery`).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ InstanceHandle  │  signal / query / result
//! └────────┬────────┘
//!          │ mpsc mailbox
//! ┌────────▼────────────────────────────────────────┐
//! │          Instance task (one per workflow)       │
//! │  ┌─────────────────┐    ┌────────────────────┐  │
//! │  │ WorkflowContext │────│ LifecycleMachine   │  │
//! │  │ (await_until,   │    │ (pure transitions) │  │
//! │  │  activities)    │    └────────────────────┘  │
//! │  └───────┬─────────┘                            │
//! └──────────┼──────────────────────────────────────┘
//!            │ dispatch (timeout + retry)
//! ┌──────────▼──────────────┐
//! │ SubscriptionActivities  │  email and billing side effects
//! └─────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use rust_decimal::Decimal;
//! use subscription_workflow::{
//!     activity::LoggingActivities,
//!     config::WorkerConfig,
//!     host::WorkflowHost,
//!     models::{Customer, SubscriptionPlan},
//! };
//!
//! # async fn example() -> subscription_workflow::Result<()> {
//! let customer = Customer {
//!     id: "ABC123".to_owned(),
//!     first_name: "Grant".to_owned(),
//!     last_name: "Fleming".to_owned(),
//!     email: "email-1@customer.com".to_owned(),
//!     subscription: SubscriptionPlan {
//!         trial_period: Duration::from_secs(2),
//!         billing_period: Duration::from_secs(2),
//!         max_billing_periods: 12,
//!         initial_billing_period_charge: Decimal::from(100),
//!     },
//! };
//!
//! let host = WorkflowHost::new(WorkerConfig::default(), Arc::new(LoggingActivities))?;
//! let handle = host.start(customer.workflow_id(), customer).await?;
//!
//! handle.update_charge_amount(Decimal::from(150)).await?;
//! println!("billing period: {}", handle.billing_period_number().await?);
//! println!("{}", handle.result().await?);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`lifecycle`]: pure state machine deciding the next step
//! - [`wait`]: instance context with the `await_until` race and activity suspension
//! - [`activity`]: activity port, request dispatch, bundled logging activities
//! - [`gateway`]: signal and query handler registry, client handle
//! - [`workflow`]: handler registration and the driver loop
//! - [`host`]: in-process host that starts and shuts down instances
//! - [`history`]: per-instance execution journal
//! - [`reliability`]: retry policy for activity attempts
//! - [`config`]: TOML worker configuration
//!
//! # Cancellation
//!
//! Two unrelated things are called cancellation:
//!
//! - A customer **cancelling the subscription** is a signal. It sets a flag the
//!   workflow checks at its suspension points and ends with a normal result.
//! - The host **cancelling the process** ([`host::WorkflowHost::shutdown`]) aborts
//!   every pending suspension with [`WorkflowError::ProcessCancelled`].

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod activity;
pub mod config;
pub mod error;
pub mod gateway;
pub mod history;
pub mod host;
pub mod lifecycle;
pub mod models;
pub mod reliability;
pub mod wait;
pub mod workflow;

pub use error::{Result, WorkflowError};
pub use gateway::InstanceHandle;
pub use host::WorkflowHost;
pub use models::{Customer, SubscriptionPlan};
