//! Signal and query gateway.
//!
//! The only way the outside world touches a running instance:
//!
//! - **Signals** mutate instance state asynchronously. They are queued in the
//!   instance mailbox and applied, in receipt order, at the next suspension
//!   point.
//! - **Queries** read a snapshot of instance state synchronously from the
//!   caller's point of view. They never mutate.
//!
//! Handlers live in a [`HandlerRegistry`] owned by one instance, so two
//! instances never share a handler table.

use std::{collections::HashMap, fmt};

use rust_decimal::Decimal;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::{
    error::{Result, WorkflowError},
    history::HistoryEvent,
};

/// Signal that cancels the subscription.
pub const CANCEL_SIGNAL: &str = "cancelSubscription";
/// Signal that changes the per-period charge for future charges.
pub const UPDATE_CHARGE_AMOUNT_SIGNAL: &str = "updateBillingChargeAmount";
/// Query returning the customer id.
pub const CUSTOMER_ID_QUERY: &str = "customerIdNameQuery";
/// Query returning the current billing period number.
pub const BILLING_PERIOD_NUMBER_QUERY: &str = "billingPeriodNumberQuery";
/// Query returning the total charged so far.
pub const TOTAL_CHARGED_QUERY: &str = "totalChargedAmountQuery";
/// Reserved query answered by the instance runtime with its execution history.
pub const HISTORY_QUERY: &str = "__history";

type SignalHandler<S> = Box<dyn Fn(&mut S, Value) -> Result<()> + Send>;
type QueryHandler<S> = Box<dyn Fn(&S) -> Result<Value> + Send>;

/// Per-instance table of named signal and query handlers.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use subscription_workflow::gateway::HandlerRegistry;
///
/// let mut registry = HandlerRegistry::<u32>::new();
/// registry.set_signal_handler("increment", |count, _payload| {
///     *count += 1;
///     Ok(())
/// });
/// registry.set_query_handler("count", |count| *count);
///
/// let mut state = 0;
/// registry.apply_signal(&mut state, "increment", json!(null)).unwrap();
/// assert_eq!(registry.answer_query(&state, "count").unwrap(), json!(1));
/// ```
pub struct HandlerRegistry<S> {
    signals: HashMap<String, SignalHandler<S>>,
    queries: HashMap<String, QueryHandler<S>>,
}

impl<S> HandlerRegistry<S> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { signals: HashMap::new(), queries: HashMap::new() }
    }

    /// Registers (or replaces) the handler for a signal name.
    pub fn set_signal_handler<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&mut S, Value) -> Result<()> + Send + 'static,
    {
        self.signals.insert(name.into(), Box::new(handler));
    }

    /// Registers (or replaces) the handler for a query name.
    ///
    /// The handler's return value is serialized to JSON for the caller.
    pub fn set_query_handler<F, T>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&S) -> T + Send + 'static,
        T: Serialize,
    {
        let name = name.into();
        let query = name.clone();
        self.queries.insert(
            name,
            Box::new(move |state| {
                serde_json::to_value(handler(state))
                    .map_err(|e| WorkflowError::QueryFailed(format!("{query}: {e}")))
            }),
        );
    }

    /// Runs the named signal handler against `state`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::SignalRejected`] if no handler is registered,
    /// or whatever the handler returns.
    pub fn apply_signal(&self, state: &mut S, name: &str, payload: Value) -> Result<()> {
        let handler = self.signals.get(name).ok_or_else(|| WorkflowError::SignalRejected {
            signal: name.to_owned(),
            reason: "no handler registered".to_owned(),
        })?;
        handler(state, payload)
    }

    /// Runs the named query handler against `state`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::QueryNotFound`] if no handler is registered,
    /// or [`WorkflowError::QueryFailed`] if the answer cannot be serialized.
    pub fn answer_query(&self, state: &S, name: &str) -> Result<Value> {
        let handler =
            self.queries.get(name).ok_or_else(|| WorkflowError::QueryNotFound(name.to_owned()))?;
        handler(state)
    }

    /// Registered signal names, sorted.
    #[must_use]
    pub fn signal_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.signals.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Registered query names, sorted.
    #[must_use]
    pub fn query_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.queries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<S> Default for HandlerRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for HandlerRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("signals", &self.signal_names())
            .field("queries", &self.query_names())
            .finish()
    }
}

/// Message delivered to an instance mailbox.
#[derive(Debug)]
pub enum Message {
    /// Fire-and-forget state mutation.
    Signal {
        /// Signal name.
        name: String,
        /// Signal arguments.
        payload: Value,
    },
    /// Read request; the answer goes back over `reply`.
    Query {
        /// Query name.
        name: String,
        /// Channel for the answer.
        reply: oneshot::Sender<Result<Value>>,
    },
}

/// Final outcome slot shared between an instance and its handles.
pub type OutcomeReceiver = watch::Receiver<Option<Result<String>>>;

/// Client-side handle to one workflow instance.
///
/// Cheap to clone; every clone talks to the same instance.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    workflow_id: String,
    run_id: Uuid,
    mailbox: mpsc::Sender<Message>,
    outcome: OutcomeReceiver,
}

impl InstanceHandle {
    /// Creates a handle over an instance's mailbox and outcome slot.
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: Uuid,
        mailbox: mpsc::Sender<Message>,
        outcome: OutcomeReceiver,
    ) -> Self {
        Self { workflow_id: workflow_id.into(), run_id, mailbox, outcome }
    }

    /// Workflow id of the instance.
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Identifier of this particular run.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Whether the instance has produced its final outcome.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Queues a signal for the instance.
    ///
    /// Returns once the signal is queued, not when it is applied.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InstanceClosed`] if the instance no longer has a mailbox.
    pub async fn signal(&self, name: &str, payload: Value) -> Result<()> {
        self.mailbox
            .send(Message::Signal { name: name.to_owned(), payload })
            .await
            .map_err(|_| self.closed())
    }

    /// Asks the instance a query and waits for the answer.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::QueryNotFound`] for unknown names and
    /// [`WorkflowError::InstanceClosed`] if the instance is gone.
    pub async fn query(&self, name: &str) -> Result<Value> {
        let (reply, answer) = oneshot::channel();
        self.mailbox
            .send(Message::Query { name: name.to_owned(), reply })
            .await
            .map_err(|_| self.closed())?;
        answer.await.map_err(|_| self.closed())?
    }

    /// Asks a query and deserializes the answer.
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query), plus [`WorkflowError::QueryFailed`] if the
    /// answer does not have the expected shape.
    pub async fn query_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.query(name).await?;
        serde_json::from_value(value)
            .map_err(|e| WorkflowError::QueryFailed(format!("{name}: {e}")))
    }

    /// Sends the cancellation signal.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InstanceClosed`] if the instance is gone.
    pub async fn cancel(&self) -> Result<()> {
        self.signal(CANCEL_SIGNAL, Value::Null).await
    }

    /// Sends a new per-period charge amount.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InstanceClosed`] if the instance is gone.
    pub async fn update_charge_amount(&self, amount: Decimal) -> Result<()> {
        let payload = serde_json::to_value(amount)
            .map_err(|e| WorkflowError::Validation(format!("unserializable amount: {e}")))?;
        self.signal(UPDATE_CHARGE_AMOUNT_SIGNAL, payload).await
    }

    /// Customer id of the instance.
    ///
    /// # Errors
    ///
    /// See [`query_as`](Self::query_as).
    pub async fn customer_id(&self) -> Result<String> {
        self.query_as(CUSTOMER_ID_QUERY).await
    }

    /// Current billing period number.
    ///
    /// # Errors
    ///
    /// See [`query_as`](Self::query_as).
    pub async fn billing_period_number(&self) -> Result<u32> {
        self.query_as(BILLING_PERIOD_NUMBER_QUERY).await
    }

    /// Total charged so far.
    ///
    /// # Errors
    ///
    /// See [`query_as`](Self::query_as).
    pub async fn total_charged(&self) -> Result<Decimal> {
        self.query_as(TOTAL_CHARGED_QUERY).await
    }

    /// Execution history recorded so far.
    ///
    /// # Errors
    ///
    /// See [`query_as`](Self::query_as).
    pub async fn history(&self) -> Result<Vec<HistoryEvent>> {
        self.query_as(HISTORY_QUERY).await
    }

    /// Waits for the instance to finish and returns its result string.
    ///
    /// # Errors
    ///
    /// Returns the instance's terminal error, or [`WorkflowError::InstanceClosed`]
    /// if the instance vanished without producing an outcome.
    pub async fn result(&self) -> Result<String> {
        let mut outcome = self.outcome.clone();
        let settled = outcome.wait_for(Option::is_some).await.map_err(|_| self.closed())?;
        settled.clone().unwrap_or_else(|| Err(self.closed()))
    }

    fn closed(&self) -> WorkflowError {
        WorkflowError::InstanceClosed(self.workflow_id.clone())
    }
}
