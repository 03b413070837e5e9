//! Subscription workflow: handler registration and the driver loop.
//!
//! The driver connects the pure [`LifecycleMachine`] to the runtime. It runs
//! each [`Command`] through the [`WorkflowContext`] suspension points and feeds
//! the outcome back as the next [`Event`]. Activity failures and host shutdown
//! end the workflow with an error; signal problems never do.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::{
    activity::{self, ActivityOptions, SubscriptionActivities},
    error::{Result, WorkflowError},
    gateway::{
        BILLING_PERIOD_NUMBER_QUERY, CANCEL_SIGNAL, CUSTOMER_ID_QUERY, HandlerRegistry,
        TOTAL_CHARGED_QUERY, UPDATE_CHARGE_AMOUNT_SIGNAL,
    },
    lifecycle::{Command, Event, LifecycleMachine},
    models::{Customer, InstanceState},
    wait::WorkflowContext,
};

/// Registers the subscription's signal and query handlers.
///
/// Called once, before the first suspension point.
pub fn register_handlers(handlers: &mut HandlerRegistry<InstanceState>, customer_id: &str) {
    handlers.set_signal_handler(CANCEL_SIGNAL, |state: &mut InstanceState, _payload| {
        if !state.cancel() {
            debug!("Subscription already cancelled");
        }
        Ok(())
    });

    handlers.set_signal_handler(UPDATE_CHARGE_AMOUNT_SIGNAL, |state: &mut InstanceState, payload| {
        let amount = parse_amount(&payload).map_err(|reason| WorkflowError::SignalRejected {
            signal: UPDATE_CHARGE_AMOUNT_SIGNAL.to_owned(),
            reason,
        })?;
        state.update_charge_amount(amount).map_err(|e| WorkflowError::SignalRejected {
            signal: UPDATE_CHARGE_AMOUNT_SIGNAL.to_owned(),
            reason: e.to_string(),
        })?;
        info!(%amount, "Updating billing period charge amount");
        Ok(())
    });

    let customer_id = customer_id.to_owned();
    handlers.set_query_handler(CUSTOMER_ID_QUERY, move |_: &InstanceState| customer_id.clone());
    handlers.set_query_handler(BILLING_PERIOD_NUMBER_QUERY, InstanceState::billing_period_number);
    handlers.set_query_handler(TOTAL_CHARGED_QUERY, |state: &InstanceState| {
        NumericAmount(state.total_charged())
    });
}

/// Query answer that renders an amount as a JSON number.
#[derive(Serialize)]
struct NumericAmount(#[serde(with = "rust_decimal::serde::float")] Decimal);

/// Reads a charge amount from a signal payload.
///
/// Accepts a JSON number, a decimal string, or a one-element argument list
/// holding either.
fn parse_amount(payload: &Value) -> std::result::Result<Decimal, String> {
    match payload {
        Value::Array(args) if args.len() == 1 => parse_amount(&args[0]),
        Value::Number(number) => {
            let text = number.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|e| format!("{text} is not a valid amount: {e}"))
        }
        Value::String(text) => Decimal::from_str(text.trim())
            .map_err(|e| format!("{text:?} is not a valid amount: {e}")),
        other => Err(format!("expected an amount, got {other}")),
    }
}

/// Runs one subscription from welcome email to final result.
///
/// Returns one of:
/// - `"Subscription finished for: {id}"` when cancelled during the trial
/// - `"Subscription finished for: {id}, Total Charged: {total}"` when cancelled
///   after billing started
/// - `"Completed {workflow_id}, Total Charged: {total}"` when every billing
///   period was charged
///
/// # Errors
///
/// Returns the final activity error once the host's retry policy gives up,
/// [`WorkflowError::ProcessCancelled`] on host shutdown, or
/// [`WorkflowError::InvalidTransition`] if the driver and machine disagree.
#[instrument(
    skip(ctx, customer, activities, options),
    fields(workflow_id = %ctx.workflow_id(), customer_id = %customer.id)
)]
pub async fn subscription_workflow(
    ctx: &mut WorkflowContext<InstanceState>,
    customer: &Customer,
    activities: &dyn SubscriptionActivities,
    options: &ActivityOptions,
) -> Result<String> {
    register_handlers(ctx.handlers_mut(), &customer.id);
    let mut machine = LifecycleMachine::new(
        ctx.workflow_id(),
        customer.id.as_str(),
        customer.subscription.clone(),
    );
    let mut event = Event::Started;

    loop {
        event = match machine.resume(ctx.state_mut(), event)? {
            Command::Invoke(request) => {
                if let activity::ActivityRequest::ChargeCustomer { amount } = &request {
                    let period = ctx.state().billing_period_number();
                    info!(%amount, period, "Charging customer");
                }
                let call = activity::dispatch(activities, customer, &request, options);
                ctx.execute_activity(request.name(), call).await?;
                Event::ActivityCompleted
            }
            Command::AwaitCancellation { timeout, reason } => {
                debug!(
                    ?reason,
                    timeout_ms = timeout.as_millis(),
                    "Waiting for cancellation or timer"
                );
                let cancelled = ctx.await_until(InstanceState::is_cancelled, timeout).await?;
                Event::WaitResolved { cancelled }
            }
            Command::Complete(result) => {
                info!(%result, "Subscription workflow finished");
                return Ok(result);
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::models::SubscriptionPlan;

    fn registry() -> (HandlerRegistry<InstanceState>, InstanceState) {
        let mut handlers = HandlerRegistry::new();
        register_handlers(&mut handlers, "ABC123");
        let state = InstanceState::new(&SubscriptionPlan {
            trial_period: Duration::from_secs(2),
            billing_period: Duration::from_secs(2),
            max_billing_periods: 3,
            initial_billing_period_charge: Decimal::from(100),
        });
        (handlers, state)
    }

    #[test]
    fn test_parse_amount_shapes() {
        assert_eq!(parse_amount(&json!(150)), Ok(Decimal::from(150)));
        assert_eq!(parse_amount(&json!("12.50")), Ok(Decimal::new(1250, 2)));
        assert_eq!(parse_amount(&json!([200])), Ok(Decimal::from(200)));
        assert_eq!(parse_amount(&json!(99.5)), Ok(Decimal::new(995, 1)));
        assert!(parse_amount(&json!(null)).is_err());
        assert!(parse_amount(&json!("abc")).is_err());
        assert!(parse_amount(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_cancel_signal_is_idempotent() {
        let (handlers, mut state) = registry();

        handlers.apply_signal(&mut state, CANCEL_SIGNAL, Value::Null).unwrap();
        handlers.apply_signal(&mut state, CANCEL_SIGNAL, Value::Null).unwrap();

        assert!(state.is_cancelled());
    }

    #[test]
    fn test_update_amount_signal() {
        let (handlers, mut state) = registry();

        handlers.apply_signal(&mut state, UPDATE_CHARGE_AMOUNT_SIGNAL, json!(150)).unwrap();

        assert_eq!(state.billing_period_charge_amount(), Decimal::from(150));
    }

    #[test]
    fn test_update_amount_rejects_negative_and_malformed() {
        let (handlers, mut state) = registry();

        for payload in [json!(-5), json!({"amount": 5}), json!("ten")] {
            let result = handlers.apply_signal(&mut state, UPDATE_CHARGE_AMOUNT_SIGNAL, payload);
            assert!(matches!(result, Err(WorkflowError::SignalRejected { .. })));
        }
        assert_eq!(state.billing_period_charge_amount(), Decimal::from(100));
    }

    #[test]
    fn test_queries_read_state() {
        let (handlers, state) = registry();

        assert_eq!(handlers.answer_query(&state, CUSTOMER_ID_QUERY).unwrap(), json!("ABC123"));
        assert_eq!(handlers.answer_query(&state, BILLING_PERIOD_NUMBER_QUERY).unwrap(), json!(1));
        assert_eq!(handlers.answer_query(&state, TOTAL_CHARGED_QUERY).unwrap(), json!(0.0));
    }

    #[test]
    fn test_total_charged_answers_with_a_number() {
        let (handlers, mut state) = registry();
        state.record_charge(Decimal::new(1250, 2)).unwrap();

        let answer = handlers.answer_query(&state, TOTAL_CHARGED_QUERY).unwrap();

        assert!(answer.is_number());
        assert_eq!(answer, json!(12.5));
    }
}
