//! Worker configuration.
//!
//! TOML-deserializable settings for a [`WorkflowHost`](crate::host::WorkflowHost).
//! Every field has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! task_queue = "subscriptions"
//! mailbox_capacity = 64
//! closed_retention_ms = 60000
//!
//! [activity]
//! start_to_close_timeout_ms = 5000
//!
//! [activity.retry]
//! max_attempts = 3
//! initial_delay_ms = 100
//! max_delay_ms = 5000
//! backoff_multiplier = 2.0
//! ```

use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    activity::ActivityOptions,
    error::{Result, WorkflowError},
    reliability::RetryPolicy,
};

/// Longest allowed activity attempt budget.
const MAX_START_TO_CLOSE_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Longest a finished instance may stay queryable.
const MAX_CLOSED_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

/// Root worker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Task queue the worker serves (default: "subscriptions").
    pub task_queue: String,

    /// Pending signals and queries buffered per instance (default: 64).
    pub mailbox_capacity: usize,

    /// How long a finished instance keeps answering queries before the host
    /// drops it, in milliseconds (default: 60000).
    pub closed_retention_ms: u64,

    /// Activity execution settings.
    pub activity: ActivityConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_queue: "subscriptions".to_owned(),
            mailbox_capacity: 64,
            closed_retention_ms: 60_000,
            activity: ActivityConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Config`] if the document does not parse or a
    /// value is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use subscription_workflow::config::WorkerConfig;
    ///
    /// let config = WorkerConfig::from_toml(
    ///     r#"
    ///     task_queue = "billing"
    ///
    ///     [activity]
    ///     start_to_close_timeout_ms = 2000
    ///     "#,
    /// )
    /// .unwrap();
    ///
    /// assert_eq!(config.task_queue, "billing");
    /// assert_eq!(config.activity_options().start_to_close_timeout, Duration::from_secs(2));
    /// assert_eq!(config.activity.retry.max_attempts, 3);
    /// ```
    pub fn from_toml(document: &str) -> Result<Self> {
        let config: Self = toml::from_str(document)
            .map_err(|e| WorkflowError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Config`] if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&document)
    }

    /// Checks every value against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.task_queue.trim().is_empty() {
            return Err(WorkflowError::Config("task_queue must not be empty".to_owned()));
        }
        if self.mailbox_capacity == 0 {
            return Err(WorkflowError::Config("mailbox_capacity must be at least 1".to_owned()));
        }
        if self.closed_retention_ms > MAX_CLOSED_RETENTION_MS {
            return Err(WorkflowError::Config(format!(
                "closed_retention_ms must not exceed {MAX_CLOSED_RETENTION_MS}, got {}",
                self.closed_retention_ms
            )));
        }
        self.activity.validate()
    }

    /// Time a finished instance stays registered and queryable.
    #[must_use]
    pub fn closed_retention(&self) -> Duration {
        Duration::from_millis(self.closed_retention_ms)
    }

    /// Options applied to every activity dispatch.
    #[must_use]
    pub fn activity_options(&self) -> ActivityOptions {
        ActivityOptions {
            start_to_close_timeout: Duration::from_millis(self.activity.start_to_close_timeout_ms),
            retry_policy: self.activity.retry.policy(),
        }
    }
}

/// Activity execution settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivityConfig {
    /// Budget for one attempt in milliseconds (default: 5000).
    pub start_to_close_timeout_ms: u64,

    /// Retry policy.
    pub retry: RetryConfig,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self { start_to_close_timeout_ms: 5000, retry: RetryConfig::default() }
    }
}

impl ActivityConfig {
    fn validate(&self) -> Result<()> {
        if !(1..=MAX_START_TO_CLOSE_TIMEOUT_MS).contains(&self.start_to_close_timeout_ms) {
            return Err(WorkflowError::Config(format!(
                "activity.start_to_close_timeout_ms must be between 1 and \
                 {MAX_START_TO_CLOSE_TIMEOUT_MS}, got {}",
                self.start_to_close_timeout_ms
            )));
        }
        self.retry.validate()
    }
}

/// Retry settings, mirrored into a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts including the first (default: 3).
    pub max_attempts: u32,
    /// First backoff delay in milliseconds (default: 100).
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds (default: 5000).
    pub max_delay_ms: u64,
    /// Growth factor between delays (default: 2.0).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: policy.backoff_multiplier,
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(WorkflowError::Config(
                "activity.retry.max_attempts must be at least 1".to_owned(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(WorkflowError::Config(format!(
                "activity.retry.backoff_multiplier must be a finite number >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(WorkflowError::Config(format!(
                "activity.retry.initial_delay_ms ({}) exceeds max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Converts to the runtime policy.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = WorkerConfig::from_toml("").unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.activity_options(), ActivityOptions::default());
    }

    #[test]
    fn test_full_document() {
        let config = WorkerConfig::from_toml(
            r#"
            task_queue = "subscriptions-eu"
            mailbox_capacity = 8
            closed_retention_ms = 250

            [activity]
            start_to_close_timeout_ms = 1500

            [activity.retry]
            max_attempts = 5
            initial_delay_ms = 50
            max_delay_ms = 1000
            backoff_multiplier = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.task_queue, "subscriptions-eu");
        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.closed_retention(), Duration::from_millis(250));
        let options = config.activity_options();
        assert_eq!(options.start_to_close_timeout, Duration::from_millis(1500));
        assert_eq!(options.retry_policy.max_attempts, 5);
        assert_eq!(options.retry_policy.initial_delay, Duration::from_millis(50));
        assert_eq!(options.retry_policy.max_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_out_of_bounds_values_rejected() {
        let documents = [
            "task_queue = \"  \"",
            "mailbox_capacity = 0",
            "closed_retention_ms = 86400001",
            "[activity]\nstart_to_close_timeout_ms = 0",
            "[activity]\nstart_to_close_timeout_ms = 600001",
            "[activity.retry]\nmax_attempts = 0",
            "[activity.retry]\nbackoff_multiplier = 0.5",
            "[activity.retry]\ninitial_delay_ms = 10000",
        ];
        for document in documents {
            let result = WorkerConfig::from_toml(document);
            assert!(matches!(result, Err(WorkflowError::Config(_))), "accepted: {document}");
        }
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = WorkerConfig::from_toml("namespace = \"default\"");
        assert!(matches!(result, Err(WorkflowError::Config(msg)) if msg.contains("invalid TOML")));
    }

    #[test]
    fn test_missing_file_reported() {
        let result = WorkerConfig::from_file("/nonexistent/subscription-worker.toml");
        assert!(matches!(result, Err(WorkflowError::Config(msg)) if msg.contains("cannot read")));
    }
}
