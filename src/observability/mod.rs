//! Observability for mdsctl: logging setup and RPC metrics.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.
//! Metrics are plain `metrics` counters. No exporter is installed by default;
//! an embedding process can install its own recorder.

use crate::config::ClientConfig;
use crate::error::{CmdError, Result};
use metrics::{counter, describe_counter};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const RPC_ATTEMPTS: &str = "mdsctl_rpc_attempts_total";
pub const RPC_RETRIES: &str = "mdsctl_rpc_retries_total";
pub const RPC_FAILURES: &str = "mdsctl_rpc_failures_total";
pub const WALK_ERRORS: &str = "mdsctl_walk_errors_total";

/// Initialize logging and describe metrics. Call once per process.
pub fn init(config: &ClientConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| CmdError::internal(format!("failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| CmdError::internal(format!("failed to init logging: {}", e)))?;
    }

    describe_metrics();
    debug!(log_level = %config.log_level, "Observability initialized");
    Ok(())
}

fn describe_metrics() {
    describe_counter!(RPC_ATTEMPTS, "RPC attempts, including retries");
    describe_counter!(RPC_RETRIES, "RPC attempts that were retries");
    describe_counter!(RPC_FAILURES, "Addresses given up on after their last attempt");
    describe_counter!(WALK_ERRORS, "Tree walks that ended with an error");
}

/// Record a walk that ended with an error.
pub fn record_walk_error(operation: &'static str) {
    counter!(WALK_ERRORS, "operation" => operation).increment(1);
}
