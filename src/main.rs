//! mdsctl - main entry point.
//!
//! The process exit status is the code of the error that ended the command
//! (0 on success), so scripts can tell transport failures from rejected
//! requests.

use anyhow::Context;
use mdsctl::cli::{self, Cli};
use mdsctl::config::ClientConfig;
use mdsctl::error::{CmdError, CODE_UNKNOWN};
use mdsctl::{observability, output};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let code = e
            .downcast_ref::<CmdError>()
            .map(CmdError::exit_code)
            .unwrap_or(CODE_UNKNOWN);
        output::error(format!("{:#} (code {})", e, code));
        std::process::exit(code);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    let config = ClientConfig::load(cli.config.as_deref(), cli.overrides())
        .context("loading configuration")?;
    observability::init(&config)?;

    tracing::debug!(mds_addrs = ?config.mds_addrs, "Starting mdsctl");
    cli::execute(cli, config).await?;
    Ok(())
}
