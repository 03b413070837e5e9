//! Durable wait primitive and the instance's suspension points.
//!
//! A [`WorkflowContext`] owns one instance's state, its handler registry, and
//! its mailbox. The workflow suspends in exactly two places:
//!
//! - [`WorkflowContext::await_until`]: race a predicate over the state against
//!   a timer
//! - [`WorkflowContext::execute_activity`]: wait for an activity to finish
//!
//! While suspended, the context keeps draining the mailbox: signals are applied
//! to the state and queries are answered, all on the instance's own task. No
//! other code ever touches the state, so it needs no lock.
//!
//! Every suspension is ordered the same way (`tokio::select!` with `biased`):
//!
//! ```text
//! 1. host shutdown        -> Err(ProcessCancelled), nothing else runs
//! 2. queued mailbox input -> apply / answer, re-check the predicate
//! 3. timer or activity    -> resolve the wait
//! ```
//!
//! Because queued signals always win over an expired timer, and the predicate
//! is evaluated once more when the timer fires, a cancellation that arrives in
//! the same instant as the timer is observed as cancellation.

use std::{fmt, time::Duration};

use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    time::Instant,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{Result, WorkflowError},
    gateway::{HISTORY_QUERY, HandlerRegistry, Message},
    history::{History, HistoryEventKind},
};

/// Runtime context of one workflow instance.
pub struct WorkflowContext<S> {
    workflow_id: String,
    state: S,
    handlers: HandlerRegistry<S>,
    mailbox: mpsc::Receiver<Message>,
    mailbox_open: bool,
    shutdown: watch::Receiver<bool>,
    history: History,
}

impl<S> WorkflowContext<S> {
    /// Creates a context around freshly created instance state.
    ///
    /// `shutdown` flips to `true` when the host cancels the process.
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        run_id: Uuid,
        state: S,
        mailbox: mpsc::Receiver<Message>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let workflow_id = workflow_id.into();
        Self {
            history: History::new(workflow_id.clone(), run_id),
            workflow_id,
            state,
            handlers: HandlerRegistry::new(),
            mailbox,
            mailbox_open: true,
            shutdown,
        }
    }

    /// Workflow id of the instance.
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Read access to instance state.
    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Write access to instance state for the workflow's own transitions.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Handler table for signals and queries.
    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry<S> {
        &mut self.handlers
    }

    /// Execution history so far.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Appends to the execution history.
    pub fn record(&mut self, kind: HistoryEventKind) {
        self.history.record(kind);
    }

    /// Suspends until `predicate` holds or `timeout` elapses.
    ///
    /// Returns `Ok(true)` if the predicate held first (or at the same time as
    /// the timer), `Ok(false)` if only the timer fired. The timeout counts from
    /// this call, so each call arms a fresh timer. The timer is dropped as soon
    /// as the predicate wins.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::ProcessCancelled`] as soon as the host shuts down.
    pub async fn await_until<P>(&mut self, predicate: P, timeout: Duration) -> Result<bool>
    where
        P: Fn(&S) -> bool,
    {
        self.ensure_running()?;
        self.drain_mailbox();
        if predicate(&self.state) {
            self.record(HistoryEventKind::WaitSatisfied);
            return Ok(true);
        }

        let deadline = Instant::now() + timeout;
        self.record(HistoryEventKind::TimerStarted {
            duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        });
        debug!(workflow_id = %self.workflow_id, timeout_ms = timeout.as_millis(), "Timer armed");

        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown) => {
                    return Err(WorkflowError::ProcessCancelled);
                }
                message = self.mailbox.recv(), if self.mailbox_open => {
                    self.accept(message);
                    if predicate(&self.state) {
                        self.record(HistoryEventKind::WaitSatisfied);
                        return Ok(true);
                    }
                }
                () = &mut timer => {
                    self.drain_mailbox();
                    if predicate(&self.state) {
                        self.record(HistoryEventKind::WaitSatisfied);
                        return Ok(true);
                    }
                    self.record(HistoryEventKind::TimerFired);
                    return Ok(false);
                }
            }
        }
    }

    /// Suspends until `operation` finishes, serving the mailbox meanwhile.
    ///
    /// The operation must own or borrow everything it needs apart from the
    /// context; in particular it must carry its own snapshot of any state it
    /// depends on, because signals may change the state while it runs.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or [`WorkflowError::ProcessCancelled`]
    /// (dropping the operation) as soon as the host shuts down.
    pub async fn execute_activity<T, F>(&mut self, activity: &str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_running()?;
        self.record(HistoryEventKind::ActivityScheduled { activity: activity.to_owned() });
        tokio::pin!(operation);

        let outcome = loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown) => {
                    return Err(WorkflowError::ProcessCancelled);
                }
                message = self.mailbox.recv(), if self.mailbox_open => {
                    self.accept(message);
                }
                outcome = &mut operation => break outcome,
            }
        };

        match &outcome {
            Ok(_) => self.record(HistoryEventKind::ActivityCompleted {
                activity: activity.to_owned(),
            }),
            Err(error) => self.record(HistoryEventKind::ActivityFailed {
                activity: activity.to_owned(),
                error: error.to_string(),
            }),
        }
        self.drain_mailbox();
        outcome
    }

    /// Keeps answering queries after the workflow returned, for at most
    /// `retention`.
    ///
    /// Signals are refused. Ends when `retention` elapses, the host shuts
    /// down, or every handle and the host have dropped their mailbox senders.
    /// Queries still queued at that point are answered with
    /// [`WorkflowError::InstanceClosed`] by their callers.
    pub async fn serve_closed(&mut self, retention: Duration) {
        let expiry = tokio::time::sleep(retention);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown) => return,
                message = self.mailbox.recv() => match message {
                    Some(Message::Query { name, reply }) => {
                        let answer = self.answer(&name);
                        if reply.send(answer).is_err() {
                            debug!(query = %name, "Query caller went away");
                        }
                    }
                    Some(Message::Signal { name, .. }) => {
                        warn!(
                            workflow_id = %self.workflow_id,
                            signal = %name,
                            "Signal ignored, workflow already closed"
                        );
                    }
                    None => return,
                },
                () = &mut expiry => {
                    debug!(workflow_id = %self.workflow_id, "Closed instance retention elapsed");
                    return;
                }
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(WorkflowError::ProcessCancelled);
        }
        Ok(())
    }

    /// Processes everything already queued without waiting.
    fn drain_mailbox(&mut self) {
        while self.mailbox_open {
            match self.mailbox.try_recv() {
                Ok(message) => self.dispatch(message),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.mailbox_open = false,
            }
        }
    }

    fn accept(&mut self, message: Option<Message>) {
        match message {
            Some(message) => self.dispatch(message),
            None => self.mailbox_open = false,
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::Signal { name, payload } => self.apply_signal(name, payload),
            Message::Query { name, reply } => {
                let answer = self.answer(&name);
                if reply.send(answer).is_err() {
                    debug!(query = %name, "Query caller went away");
                }
            }
        }
    }

    fn apply_signal(&mut self, name: String, payload: Value) {
        match self.handlers.apply_signal(&mut self.state, &name, payload) {
            Ok(()) => self.record(HistoryEventKind::SignalReceived { signal: name }),
            Err(error) => {
                warn!(
                    workflow_id = %self.workflow_id,
                    signal = %name,
                    error = %error,
                    "Signal rejected"
                );
                self.record(HistoryEventKind::SignalRejected {
                    signal: name,
                    reason: error.to_string(),
                });
            }
        }
    }

    fn answer(&self, name: &str) -> Result<Value> {
        if name == HISTORY_QUERY {
            return serde_json::to_value(self.history.events())
                .map_err(|e| WorkflowError::QueryFailed(format!("{name}: {e}")));
        }
        self.handlers.answer_query(&self.state, name)
    }
}

impl<S: fmt::Debug> fmt::Debug for WorkflowContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("workflow_id", &self.workflow_id)
            .field("state", &self.state)
            .field("handlers", &self.handlers)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

/// Resolves once the host requests shutdown; never resolves if the host went
/// away without requesting it.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}
