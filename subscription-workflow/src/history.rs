//! Execution history of a workflow instance.
//!
//! Every suspension, activity, signal, and terminal outcome is appended to an
//! ordered journal and mirrored to `tracing` with target `"history"`, so the
//! entries can be routed separately from regular logs.
//!
//! The journal is readable from outside through the reserved
//! [`HISTORY_QUERY`](crate::gateway::HISTORY_QUERY). How a durable host
//! persists it is not defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEventKind {
    /// Instance began executing.
    WorkflowStarted {
        /// Customer the instance bills.
        customer_id: String,
    },
    /// Activity dispatched.
    ActivityScheduled {
        /// Activity name.
        activity: String,
    },
    /// Activity reported success.
    ActivityCompleted {
        /// Activity name.
        activity: String,
    },
    /// Activity reported failure after the host gave up.
    ActivityFailed {
        /// Activity name.
        activity: String,
        /// Error message.
        error: String,
    },
    /// Race wait armed a timer.
    TimerStarted {
        /// Timer length in milliseconds.
        duration_ms: u64,
    },
    /// Timer elapsed before the predicate became true.
    TimerFired,
    /// Predicate became true; any pending timer was dropped.
    WaitSatisfied,
    /// Signal applied to instance state.
    SignalReceived {
        /// Signal name.
        signal: String,
    },
    /// Signal refused without touching instance state.
    SignalRejected {
        /// Signal name.
        signal: String,
        /// Rejection reason.
        reason: String,
    },
    /// Instance returned a result.
    WorkflowCompleted {
        /// Result string.
        result: String,
    },
    /// Instance ended with an error.
    WorkflowFailed {
        /// Error message.
        error: String,
    },
}

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Position in the journal, starting at 1.
    pub sequence: u64,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Entry payload.
    #[serde(flatten)]
    pub kind: HistoryEventKind,
}

/// Append-only journal for one run of one workflow.
#[derive(Debug, Clone)]
pub struct History {
    workflow_id: String,
    run_id: Uuid,
    events: Vec<HistoryEvent>,
}

impl History {
    /// Creates an empty journal.
    #[must_use]
    pub fn new(workflow_id: impl Into<String>, run_id: Uuid) -> Self {
        Self { workflow_id: workflow_id.into(), run_id, events: Vec::new() }
    }

    /// Appends an entry and logs it.
    pub fn record(&mut self, kind: HistoryEventKind) {
        let event = HistoryEvent {
            sequence: self.events.len() as u64 + 1,
            timestamp: Utc::now(),
            kind,
        };
        tracing::debug!(
            target: "history",
            workflow_id = %self.workflow_id,
            run_id = %self.run_id,
            sequence = event.sequence,
            event = ?event.kind,
            "HISTORY"
        );
        self.events.push(event);
    }

    /// Entries in recording order.
    #[must_use]
    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Workflow id the journal belongs to.
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Run id the journal belongs to.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of entries matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&HistoryEventKind) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(&event.kind)).count()
    }
}
