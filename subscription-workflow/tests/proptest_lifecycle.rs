//! Property tests for the lifecycle state machine.
//!
//! Drives the pure machine through randomly generated plans and signal
//! schedules. Wait `0` is the trial; wait `k` follows the `k`-th charge.

use std::time::Duration;

use proptest::prelude::*;
use rust_decimal::Decimal;
use subscription_workflow::{
    activity::ActivityRequest,
    lifecycle::{Command, Event, LifecycleMachine},
    models::{InstanceState, SubscriptionPlan},
};

#[derive(Debug)]
struct Schedule {
    /// New charge amount delivered during wait `k`.
    updates: Vec<Option<u32>>,
    /// Wait during which the customer cancels.
    cancel_at: Option<usize>,
}

struct Run {
    charges: Vec<Decimal>,
    result: String,
    state: InstanceState,
}

fn plan(max_billing_periods: u32, initial: u32) -> SubscriptionPlan {
    SubscriptionPlan {
        trial_period: Duration::from_secs(2),
        billing_period: Duration::from_secs(2),
        max_billing_periods,
        initial_billing_period_charge: Decimal::from(initial),
    }
}

fn simulate(plan: SubscriptionPlan, schedule: &Schedule) -> Run {
    let mut state = InstanceState::new(&plan);
    let mut machine = LifecycleMachine::new("subscription-P1", "P1", plan);
    let mut charges = Vec::new();
    let mut waits = 0;

    let mut command = machine.resume(&mut state, Event::Started).unwrap();
    let result = loop {
        let event = match command {
            Command::Invoke(ActivityRequest::ChargeCustomer { amount }) => {
                charges.push(amount);
                Event::ActivityCompleted
            }
            Command::Invoke(_) => Event::ActivityCompleted,
            Command::AwaitCancellation { .. } => {
                if let Some(Some(amount)) = schedule.updates.get(waits) {
                    state.update_charge_amount(Decimal::from(*amount)).unwrap();
                }
                if schedule.cancel_at == Some(waits) {
                    state.cancel();
                }
                waits += 1;
                Event::WaitResolved { cancelled: state.is_cancelled() }
            }
            Command::Complete(result) => break result,
        };
        command = machine.resume(&mut state, event).unwrap();
    };

    assert!(machine.is_finished());
    Run { charges, result, state }
}

/// Amount in effect before charge `k` (1-based): the last update delivered
/// during waits `0..k`.
fn expected_amount(initial: u32, updates: &[Option<u32>], charge: usize) -> Decimal {
    let latest = updates.iter().take(charge).flatten().last().copied();
    Decimal::from(latest.unwrap_or(initial))
}

fn schedule_strategy() -> impl Strategy<Value = Schedule> {
    (
        prop::collection::vec(prop::option::of(0u32..500), 0..12),
        prop::option::of(0usize..12),
    )
        .prop_map(|(updates, cancel_at)| Schedule { updates, cancel_at })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn test_charge_count_matches_cancellation_point(
        max in 0u32..8,
        initial in 0u32..500,
        schedule in schedule_strategy(),
    ) {
        let run = simulate(plan(max, initial), &schedule);
        let max_charges = max as usize;

        let expected = match schedule.cancel_at {
            Some(0) => 0,
            Some(wait) if wait < max_charges => wait,
            _ => max_charges,
        };
        prop_assert_eq!(run.charges.len(), expected);
        prop_assert_eq!(run.state.billing_period_number() as usize, expected + 1);
    }

    #[test]
    fn test_total_is_sum_of_amounts_in_effect(
        max in 0u32..8,
        initial in 0u32..500,
        schedule in schedule_strategy(),
    ) {
        let run = simulate(plan(max, initial), &schedule);

        for (index, amount) in run.charges.iter().enumerate() {
            prop_assert_eq!(*amount, expected_amount(initial, &schedule.updates, index + 1));
        }
        let total: Decimal = run.charges.iter().sum();
        prop_assert_eq!(run.state.total_charged(), total);
    }

    #[test]
    fn test_result_string_matches_outcome(
        max in 0u32..8,
        initial in 0u32..500,
        schedule in schedule_strategy(),
    ) {
        let run = simulate(plan(max, initial), &schedule);
        let total = run.state.total_charged();

        let expected = match schedule.cancel_at {
            Some(0) => "Subscription finished for: P1".to_owned(),
            Some(wait) if wait < max as usize => {
                format!("Subscription finished for: P1, Total Charged: {total}")
            }
            _ => format!("Completed subscription-P1, Total Charged: {total}"),
        };
        prop_assert_eq!(run.result, expected);
    }
}
