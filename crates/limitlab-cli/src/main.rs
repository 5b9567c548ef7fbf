//! # limitlab
//!
//! Runs short-lived, resource-constrained containers that probe CPU, memory,
//! root filesystem and volume limits, and reports how each one ended.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;
mod scenario;

use clap::Parser;
use limitlab_common::config::{HarnessConfig, LogFormat};
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_tracing(&config);
    commands::execute(cli, config).await
}

/// `RUST_LOG` takes precedence over the configured level.
fn init_tracing(config: &HarnessConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
