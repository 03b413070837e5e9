//! Subscription Worker - runs one subscription workflow in-process
//!
//! Starts a [`WorkflowHost`], launches a subscription for the customer read
//! from the JSON file given as the first argument (or a bundled sample
//! customer), and prints the workflow result.
//!
//! # Environment Variables
//!
//! - `SUBSCRIPTION_WORKER_CONFIG`: path to a TOML worker configuration
//! - `CANCEL_AFTER_MS`: send `cancelSubscription` after this many milliseconds
//! - `LOG_FORMAT`, `RUST_LOG`: see [`observability`]
//!
//! Ctrl+C or SIGTERM shuts the host down, which cancels the running instance.

mod observability;

use std::{
    env,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use rust_decimal::Decimal;
use subscription_workflow::{
    Result, WorkflowError,
    activity::LoggingActivities,
    config::WorkerConfig,
    host::WorkflowHost,
    models::{Customer, SubscriptionPlan},
};
use tokio::signal;
use tracing::{error, info, warn};

use crate::observability::{LogFormat, init_observability};

const CONFIG_ENV: &str = "SUBSCRIPTION_WORKER_CONFIG";
const CANCEL_AFTER_ENV: &str = "CANCEL_AFTER_MS";

#[tokio::main]
async fn main() -> ExitCode {
    init_observability(LogFormat::from_env());

    match run().await {
        Ok(result) => {
            println!("{result}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Subscription worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<String> {
    let config = match env::var_os(CONFIG_ENV) {
        Some(path) => WorkerConfig::from_file(PathBuf::from(path))?,
        None => WorkerConfig::default(),
    };
    let customer = match env::args_os().nth(1) {
        Some(path) => load_customer(Path::new(&path))?,
        None => sample_customer(),
    };
    let cancel_after = parse_cancel_after(env::var(CANCEL_AFTER_ENV).ok().as_deref())?;

    let host = WorkflowHost::new(config, Arc::new(LoggingActivities))?;
    info!(
        task_queue = host.task_queue(),
        customer_id = %customer.id,
        "Subscription worker started"
    );
    let handle = host.start(customer.workflow_id(), customer).await?;

    if let Some(delay) = cancel_after {
        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!(delay_ms = delay.as_millis(), "Sending scheduled cancellation");
            if let Err(e) = canceller.cancel().await {
                warn!(error = %e, "Scheduled cancellation not delivered");
            }
        });
    }

    tokio::select! {
        outcome = handle.result() => {
            host.shutdown().await;
            outcome
        }
        () = shutdown_signal() => {
            info!("Shutdown requested");
            host.shutdown().await;
            handle.result().await
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM. A listener that cannot be installed never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn load_customer(path: &Path) -> Result<Customer> {
    let document = std::fs::read_to_string(path).map_err(|e| {
        WorkflowError::Config(format!("cannot read customer file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&document).map_err(|e| {
        WorkflowError::Validation(format!("customer file {} is malformed: {e}", path.display()))
    })
}

fn parse_cancel_after(value: Option<&str>) -> Result<Option<Duration>> {
    value
        .map(|raw| {
            raw.trim().parse::<u64>().map(Duration::from_millis).map_err(|e| {
                WorkflowError::Config(format!("{CANCEL_AFTER_ENV}={raw:?} is not a number: {e}"))
            })
        })
        .transpose()
}

fn sample_customer() -> Customer {
    Customer {
        id: "ABC123".to_owned(),
        first_name: "Grant".to_owned(),
        last_name: "Fleming".to_owned(),
        email: "email-1@customer.com".to_owned(),
        subscription: SubscriptionPlan {
            trial_period: Duration::from_millis(2000),
            billing_period: Duration::from_millis(2000),
            max_billing_periods: 12,
            initial_billing_period_charge: Decimal::from(100),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_customer_is_valid() {
        let customer = sample_customer();
        assert!(customer.validate().is_ok());
        assert_eq!(customer.workflow_id(), "subscription-ABC123");
    }

    #[test]
    fn test_parse_cancel_after() {
        assert_eq!(parse_cancel_after(None).unwrap(), None);
        assert_eq!(parse_cancel_after(Some("3000")).unwrap(), Some(Duration::from_secs(3)));
        assert!(matches!(parse_cancel_after(Some("soon")), Err(WorkflowError::Config(_))));
    }

    #[test]
    fn test_missing_customer_file() {
        let result = load_customer(Path::new("/nonexistent/customer.json"));
        assert!(matches!(result, Err(WorkflowError::Config(_))));
    }
}
