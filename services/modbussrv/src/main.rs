//! Modbus gateway service (`modbussrv`)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use modbussrv::{load_configuration, stdout_publisher, Args, Gateway};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = common::init_logging(&args.log_config()?)
        .context("Failed to initialize logging")?;
    info!(
        "modbussrv {} starting, configuration {}",
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    let config = load_configuration(&args.config)?;

    // Validation mode: validate and exit
    if args.validate {
        info!("Validation completed successfully");
        return Ok(());
    }

    let gateway = Gateway::start(args.config.clone(), config, Arc::new(stdout_publisher())).await?;
    gateway.run(args.accept_writes).await
}
