//! In-process workflow host.
//!
//! [`WorkflowHost`] plays the part of a durable execution worker: it starts
//! subscription instances on its task queue, one tokio task each, hands out
//! [`InstanceHandle`]s by workflow id, and performs process-level cancellation
//! on [`shutdown`](WorkflowHost::shutdown).
//!
//! Finished instances stay registered and keep answering queries for the
//! configured `closed_retention_ms`; the host then drops the entry and the
//! instance's task ends with it. [`InstanceHandle::result`] keeps returning
//! the outcome after that. Starting an id whose previous run has finished
//! replaces that run.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use subscription_workflow::{
//!     activity::LoggingActivities, config::WorkerConfig, host::WorkflowHost, models::Customer,
//! };
//!
//! # async fn example(customer: Customer) -> subscription_workflow::error::Result<()> {
//! let host = WorkflowHost::new(WorkerConfig::default(), Arc::new(LoggingActivities))?;
//! let handle = host.start(customer.workflow_id(), customer).await?;
//!
//! handle.cancel().await?;
//! println!("{}", handle.result().await?);
//!
//! host.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use tokio::{
    sync::{RwLock, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    activity::{ActivityOptions, SubscriptionActivities},
    config::WorkerConfig,
    error::{Result, WorkflowError},
    gateway::InstanceHandle,
    history::HistoryEventKind,
    models::{Customer, InstanceState},
    wait::WorkflowContext,
    workflow::subscription_workflow,
};

struct InstanceEntry {
    handle: InstanceHandle,
    task: JoinHandle<()>,
}

type Registry = Arc<RwLock<HashMap<String, InstanceEntry>>>;

/// Runs subscription workflow instances inside this process.
pub struct WorkflowHost {
    config: WorkerConfig,
    options: ActivityOptions,
    activities: Arc<dyn SubscriptionActivities>,
    shutdown: watch::Sender<bool>,
    instances: Registry,
}

impl WorkflowHost {
    /// Creates a host with validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Config`] if `config` is out of bounds.
    pub fn new(
        config: WorkerConfig,
        activities: Arc<dyn SubscriptionActivities>,
    ) -> Result<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            options: config.activity_options(),
            config,
            activities,
            shutdown,
            instances: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Task queue this host serves.
    #[must_use]
    pub fn task_queue(&self) -> &str {
        &self.config.task_queue
    }

    /// Starts a subscription instance.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::Validation`] if the customer is invalid
    /// - [`WorkflowError::InstanceAlreadyStarted`] if `workflow_id` is still running
    /// - [`WorkflowError::ProcessCancelled`] if the host is shutting down
    pub async fn start(
        &self,
        workflow_id: impl Into<String>,
        customer: Customer,
    ) -> Result<InstanceHandle> {
        let workflow_id = workflow_id.into();
        customer.validate()?;
        if *self.shutdown.borrow() {
            return Err(WorkflowError::ProcessCancelled);
        }

        let mut instances = self.instances.write().await;
        if let Some(existing) = instances.get(&workflow_id)
            && !existing.handle.is_closed()
        {
            return Err(WorkflowError::InstanceAlreadyStarted(workflow_id));
        }

        let run_id = Uuid::new_v4();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(self.config.mailbox_capacity);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let handle = InstanceHandle::new(workflow_id.clone(), run_id, mailbox_tx, outcome_rx);

        let mut ctx = WorkflowContext::new(
            workflow_id.clone(),
            run_id,
            InstanceState::new(&customer.subscription),
            mailbox_rx,
            self.shutdown.subscribe(),
        );
        let activities = Arc::clone(&self.activities);
        let options = self.options.clone();
        let registry = Arc::clone(&self.instances);
        let retention = self.config.closed_retention();

        let task = tokio::spawn(async move {
            ctx.record(HistoryEventKind::WorkflowStarted { customer_id: customer.id.clone() });
            let outcome =
                subscription_workflow(&mut ctx, &customer, activities.as_ref(), &options).await;
            match &outcome {
                Ok(result) => {
                    ctx.record(HistoryEventKind::WorkflowCompleted { result: result.clone() });
                }
                Err(WorkflowError::ProcessCancelled) => {
                    warn!(workflow_id = %ctx.workflow_id(), "Workflow cancelled by host shutdown");
                    ctx.record(HistoryEventKind::WorkflowFailed {
                        error: WorkflowError::ProcessCancelled.to_string(),
                    });
                }
                Err(e) => {
                    error!(workflow_id = %ctx.workflow_id(), error = %e, "Workflow failed");
                    ctx.record(HistoryEventKind::WorkflowFailed { error: e.to_string() });
                }
            }
            outcome_tx.send_replace(Some(outcome));
            ctx.serve_closed(retention).await;
            evict(&registry, ctx.workflow_id(), run_id).await;
        });

        info!(
            workflow_id = %workflow_id,
            run_id = %run_id,
            task_queue = %self.config.task_queue,
            "Workflow instance started"
        );
        if let Some(previous) =
            instances.insert(workflow_id, InstanceEntry { handle: handle.clone(), task })
        {
            previous.task.abort();
        }
        Ok(handle)
    }

    /// Returns a handle to a known instance, running or finished within its
    /// retention window.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::InstanceNotFound`] for unknown ids.
    pub async fn get_handle(&self, workflow_id: &str) -> Result<InstanceHandle> {
        self.instances
            .read()
            .await
            .get(workflow_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| WorkflowError::InstanceNotFound(workflow_id.to_owned()))
    }

    /// Workflow ids of instances that have not finished, sorted.
    pub async fn running_instances(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .instances
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.handle.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Cancels every instance and waits for their tasks to end.
    ///
    /// Running instances finish with [`WorkflowError::ProcessCancelled`]. The
    /// host refuses new starts afterwards.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let entries: Vec<(String, InstanceEntry)> = self.instances.write().await.drain().collect();
        info!(instances = entries.len(), "Shutting down workflow host");

        for (workflow_id, entry) in entries {
            if let Err(e) = entry.task.await {
                error!(workflow_id = %workflow_id, error = %e, "Workflow task ended abnormally");
            }
        }
    }
}

/// Drops the registry entry for `run_id`, unless a newer run took the id.
async fn evict(registry: &Registry, workflow_id: &str, run_id: Uuid) {
    let mut instances = registry.write().await;
    if instances.get(workflow_id).is_some_and(|entry| entry.handle.run_id() == run_id) {
        instances.remove(workflow_id);
        debug!(workflow_id = %workflow_id, run_id = %run_id, "Closed workflow instance evicted");
    }
}

impl fmt::Debug for WorkflowHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowHost")
            .field("config", &self.config)
            .field("shutting_down", &*self.shutdown.borrow())
            .finish_non_exhaustive()
    }
}
