//! Subscription lifecycle state machine.
//!
//! The machine decides what a subscription does next and performs no I/O. A
//! driver feeds it [`Event`]s (an activity finished, a wait resolved) and
//! executes the [`Command`] it answers with. The machine never retries and
//! never sleeps, which makes every transition testable without a runtime.
//!
//! # State Machine
//!
//! ```text
//! Created ──► Starting ──► AwaitingTrialDecision ──┬─► TrialCancelled ──► Finished
//!            (welcome)       (race: trial period)  │   (trial email)
//!                                                  │
//!                                                  ▼
//!                      ┌──────────────── billing iteration ◄────────────┐
//!                      │                      │                         │
//!                      ▼                      ▼                         │
//!              BillingExhausted        Charging { amount } ──► AwaitingNextPeriod
//!              (over email)                   │                 (race: billing period)
//!                      │                      ▼
//!                      │              BillingCancelled
//!                      │              (finished email)
//!                      ▼                      │
//!                   Finished ◄────────────────┘
//! ```
//!
//! A billing iteration checks, in order: periods exhausted, cancelled,
//! otherwise charge. Cancellation wins a race that resolves at the same time
//! as its timer.

use std::time::Duration;

use rust_decimal::Decimal;

use crate::{
    activity::ActivityRequest,
    error::{Result, WorkflowError},
    models::{InstanceState, SubscriptionPlan},
};

/// Which timer a cancellation race is bounded by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Free trial.
    TrialPeriod,
    /// Gap between two billing periods.
    BillingPeriod,
}

/// Input to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The instance began executing.
    Started,
    /// The last requested activity finished successfully.
    ActivityCompleted,
    /// The last requested race resolved; `cancelled` is its outcome.
    WaitResolved {
        /// Whether the cancellation predicate won.
        cancelled: bool,
    },
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run an activity, then report [`Event::ActivityCompleted`].
    Invoke(ActivityRequest),
    /// Race the cancellation flag against a timer, then report
    /// [`Event::WaitResolved`].
    AwaitCancellation {
        /// Timer length.
        timeout: Duration,
        /// Which period the timer covers.
        reason: WaitReason,
    },
    /// Finish with this result.
    Complete(String),
}

/// Where the subscription is. Each phase other than `Created` and `Finished`
/// has exactly one outstanding command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing dispatched yet.
    Created,
    /// Welcome email in flight.
    Starting,
    /// Trial race in flight.
    AwaitingTrialDecision,
    /// Cancelled during the trial; notification in flight.
    TrialCancelled,
    /// Charge in flight for the captured amount.
    Charging {
        /// Amount captured when the charge was dispatched.
        amount: Decimal,
    },
    /// Billing-period race in flight.
    AwaitingNextPeriod,
    /// Cancelled after billing started; notification in flight.
    BillingCancelled,
    /// All billing periods used; notification in flight.
    BillingExhausted,
    /// Result returned.
    Finished,
}

/// Pure decision logic for one subscription.
#[derive(Debug, Clone)]
pub struct LifecycleMachine {
    workflow_id: String,
    customer_id: String,
    plan: SubscriptionPlan,
    phase: Phase,
}

impl LifecycleMachine {
    /// Creates a machine in [`Phase::Created`].
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        customer_id: impl Into<String>,
        plan: SubscriptionPlan,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            customer_id: customer_id.into(),
            plan,
            phase: Phase::Created,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the result has been produced.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Applies an event and returns the next command.
    ///
    /// State changes the machine owns (recording a charge) are applied to
    /// `state` here; signal-driven changes happen outside.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InvalidTransition`] if `event` does not fit the
    /// current phase, or [`WorkflowError::ChargeNotRecorded`] if a completed
    /// charge cannot be booked. The machine is left unchanged.
    pub fn resume(&mut self, state: &mut InstanceState, event: Event) -> Result<Command> {
        let (phase, command) = match (self.phase, event) {
            (Phase::Created, Event::Started) => {
                (Phase::Starting, Command::Invoke(ActivityRequest::SendWelcomeEmail))
            }
            (Phase::Starting, Event::ActivityCompleted) => (
                Phase::AwaitingTrialDecision,
                Command::AwaitCancellation {
                    timeout: self.plan.trial_period,
                    reason: WaitReason::TrialPeriod,
                },
            ),
            (Phase::AwaitingTrialDecision, Event::WaitResolved { cancelled }) => {
                if cancelled || state.is_cancelled() {
                    (
                        Phase::TrialCancelled,
                        Command::Invoke(ActivityRequest::SendCancellationEmailDuringTrial),
                    )
                } else {
                    self.billing_iteration(state)
                }
            }
            (Phase::Charging { amount }, Event::ActivityCompleted) => {
                state.record_charge(amount)?;
                (
                    Phase::AwaitingNextPeriod,
                    Command::AwaitCancellation {
                        timeout: self.plan.billing_period,
                        reason: WaitReason::BillingPeriod,
                    },
                )
            }
            (Phase::AwaitingNextPeriod, Event::WaitResolved { .. }) => {
                self.billing_iteration(state)
            }
            (Phase::TrialCancelled, Event::ActivityCompleted) => (
                Phase::Finished,
                Command::Complete(format!("Subscription finished for: {}", self.customer_id)),
            ),
            (Phase::BillingCancelled, Event::ActivityCompleted) => (
                Phase::Finished,
                Command::Complete(format!(
                    "Subscription finished for: {}, Total Charged: {}",
                    self.customer_id,
                    state.total_charged()
                )),
            ),
            (Phase::BillingExhausted, Event::ActivityCompleted) => (
                Phase::Finished,
                Command::Complete(format!(
                    "Completed {}, Total Charged: {}",
                    self.workflow_id,
                    state.total_charged()
                )),
            ),
            (phase, event) => {
                return Err(WorkflowError::InvalidTransition(format!(
                    "{event:?} in phase {phase:?}"
                )));
            }
        };

        tracing::debug!(
            workflow_id = %self.workflow_id,
            from = ?self.phase,
            to = ?phase,
            "Lifecycle transition"
        );
        self.phase = phase;
        Ok(command)
    }

    fn billing_iteration(&self, state: &InstanceState) -> (Phase, Command) {
        if state.billing_period_number() > self.plan.max_billing_periods {
            return (
                Phase::BillingExhausted,
                Command::Invoke(ActivityRequest::SendSubscriptionOverEmail),
            );
        }
        if state.is_cancelled() {
            return (
                Phase::BillingCancelled,
                Command::Invoke(ActivityRequest::SendSubscriptionFinishedEmail),
            );
        }
        let amount = state.billing_period_charge_amount();
        (Phase::Charging { amount }, Command::Invoke(ActivityRequest::ChargeCustomer { amount }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(max_billing_periods: u32) -> SubscriptionPlan {
        SubscriptionPlan {
            trial_period: Duration::from_secs(2),
            billing_period: Duration::from_secs(2),
            max_billing_periods,
            initial_billing_period_charge: Decimal::from(100),
        }
    }

    fn machine(max_billing_periods: u32) -> (LifecycleMachine, InstanceState) {
        let plan = plan(max_billing_periods);
        let state = InstanceState::new(&plan);
        (LifecycleMachine::new("subscription-ABC123", "ABC123", plan), state)
    }

    fn charge(amount: i64) -> Command {
        Command::Invoke(ActivityRequest::ChargeCustomer { amount: Decimal::from(amount) })
    }

    fn billing_wait() -> Command {
        Command::AwaitCancellation {
            timeout: Duration::from_secs(2),
            reason: WaitReason::BillingPeriod,
        }
    }

    const TIMER: Event = Event::WaitResolved { cancelled: false };
    const CANCELLED: Event = Event::WaitResolved { cancelled: true };

    #[test]
    fn test_full_term_without_signals() {
        let (mut m, mut s) = machine(3);

        assert_eq!(
            m.resume(&mut s, Event::Started).unwrap(),
            Command::Invoke(ActivityRequest::SendWelcomeEmail)
        );
        assert_eq!(
            m.resume(&mut s, Event::ActivityCompleted).unwrap(),
            Command::AwaitCancellation {
                timeout: Duration::from_secs(2),
                reason: WaitReason::TrialPeriod,
            }
        );
        assert_eq!(m.resume(&mut s, TIMER).unwrap(), charge(100));
        for _ in 0..2 {
            assert_eq!(m.resume(&mut s, Event::ActivityCompleted).unwrap(), billing_wait());
            assert_eq!(m.resume(&mut s, TIMER).unwrap(), charge(100));
        }
        assert_eq!(m.resume(&mut s, Event::ActivityCompleted).unwrap(), billing_wait());
        assert_eq!(
            m.resume(&mut s, TIMER).unwrap(),
            Command::Invoke(ActivityRequest::SendSubscriptionOverEmail)
        );
        assert_eq!(
            m.resume(&mut s, Event::ActivityCompleted).unwrap(),
            Command::Complete("Completed subscription-ABC123, Total Charged: 300".to_owned())
        );

        assert!(m.is_finished());
        assert_eq!(s.billing_period_number(), 4);
        assert_eq!(s.total_charged(), Decimal::from(300));
    }

    #[test]
    fn test_cancel_during_trial() {
        let (mut m, mut s) = machine(3);
        m.resume(&mut s, Event::Started).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        s.cancel();

        assert_eq!(
            m.resume(&mut s, CANCELLED).unwrap(),
            Command::Invoke(ActivityRequest::SendCancellationEmailDuringTrial)
        );
        assert_eq!(
            m.resume(&mut s, Event::ActivityCompleted).unwrap(),
            Command::Complete("Subscription finished for: ABC123".to_owned())
        );
        assert_eq!(s.total_charged(), Decimal::ZERO);
    }

    #[test]
    fn test_flag_wins_over_timer_outcome() {
        let (mut m, mut s) = machine(3);
        m.resume(&mut s, Event::Started).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        s.cancel();

        assert_eq!(m.phase(), Phase::AwaitingTrialDecision);
        assert_eq!(
            m.resume(&mut s, TIMER).unwrap(),
            Command::Invoke(ActivityRequest::SendCancellationEmailDuringTrial)
        );
    }

    #[test]
    fn test_cancel_after_first_charge() {
        let (mut m, mut s) = machine(3);
        m.resume(&mut s, Event::Started).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        m.resume(&mut s, TIMER).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        s.cancel();

        assert_eq!(
            m.resume(&mut s, CANCELLED).unwrap(),
            Command::Invoke(ActivityRequest::SendSubscriptionFinishedEmail)
        );
        assert_eq!(
            m.resume(&mut s, Event::ActivityCompleted).unwrap(),
            Command::Complete("Subscription finished for: ABC123, Total Charged: 100".to_owned())
        );
    }

    #[test]
    fn test_charge_uses_amount_captured_at_dispatch() {
        let (mut m, mut s) = machine(3);
        m.resume(&mut s, Event::Started).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        assert_eq!(m.resume(&mut s, TIMER).unwrap(), charge(100));

        // Update lands while the charge is in flight.
        s.update_charge_amount(Decimal::from(150)).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        assert_eq!(s.total_charged(), Decimal::from(100));

        assert_eq!(m.resume(&mut s, TIMER).unwrap(), charge(150));
    }

    #[test]
    fn test_unbookable_charge_fails_without_advancing() {
        let (mut m, mut s) = machine(3);
        m.resume(&mut s, Event::Started).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        assert_eq!(m.resume(&mut s, TIMER).unwrap(), charge(100));
        s.record_charge(Decimal::MAX).unwrap();

        let result = m.resume(&mut s, Event::ActivityCompleted);

        assert!(matches!(result, Err(WorkflowError::ChargeNotRecorded(_))));
        assert_eq!(m.phase(), Phase::Charging { amount: Decimal::from(100) });
        assert_eq!(s.total_charged(), Decimal::MAX);
    }

    #[test]
    fn test_exhaustion_checked_before_cancellation() {
        let (mut m, mut s) = machine(1);
        m.resume(&mut s, Event::Started).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        m.resume(&mut s, TIMER).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        s.cancel();

        assert_eq!(
            m.resume(&mut s, CANCELLED).unwrap(),
            Command::Invoke(ActivityRequest::SendSubscriptionOverEmail)
        );
    }

    #[test]
    fn test_zero_billing_periods_skips_charging() {
        let (mut m, mut s) = machine(0);
        m.resume(&mut s, Event::Started).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();

        assert_eq!(
            m.resume(&mut s, TIMER).unwrap(),
            Command::Invoke(ActivityRequest::SendSubscriptionOverEmail)
        );
        assert_eq!(
            m.resume(&mut s, Event::ActivityCompleted).unwrap(),
            Command::Complete("Completed subscription-ABC123, Total Charged: 0".to_owned())
        );
    }

    #[test]
    fn test_unexpected_event_is_invalid_transition() {
        let (mut m, mut s) = machine(3);

        let result = m.resume(&mut s, Event::ActivityCompleted);

        assert!(matches!(result, Err(WorkflowError::InvalidTransition(_))));
        assert_eq!(m.phase(), Phase::Created);
    }

    #[test]
    fn test_finished_rejects_further_events() {
        let (mut m, mut s) = machine(0);
        m.resume(&mut s, Event::Started).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();
        m.resume(&mut s, TIMER).unwrap();
        m.resume(&mut s, Event::ActivityCompleted).unwrap();

        assert!(m.resume(&mut s, Event::Started).is_err());
        assert!(m.is_finished());
    }
}
