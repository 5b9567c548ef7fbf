//! CLI command definitions and dispatch.

pub mod cpu;
pub mod memory;
pub mod rootfs;
pub mod volume;

#[cfg(test)]
mod scenario_tests;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use limitlab_common::config::{HarnessConfig, LogFormat};
use limitlab_common::constants::APP_NAME;
use limitlab_runtime::backend::ContainerRuntime;
use limitlab_runtime::backend::docker::DockerRuntime;

use crate::scenario::ScenarioContext;

/// limitlab: resource-limit experiments against a container runtime.
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Scenario to run.
    #[command(subcommand)]
    pub command: Command,

    /// YAML configuration file.
    #[arg(long, global = true, env = "LIMITLAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Docker endpoint (unix://, tcp:// or http://).
    #[arg(long, global = true)]
    pub docker_host: Option<String>,

    /// Overall deadline of the scenario, in seconds.
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Log level or filter directive, e.g. `debug` or `limitlab_runtime=trace`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format: text or json.
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Print the run summary as JSON on stdout.
    #[arg(long, global = true)]
    pub json: bool,
}

impl Cli {
    /// Loads the configuration file and environment, then applies flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or a flag
    /// holds an invalid value.
    pub fn load_config(&self) -> anyhow::Result<HarnessConfig> {
        let mut config =
            HarnessConfig::load(self.config.as_deref()).context("loading configuration")?;
        if let Some(host) = &self.docker_host {
            config.docker_host = Some(host.clone());
        }
        if let Some(secs) = self.timeout {
            config.run_timeout_secs = secs;
        }
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config.validate().context("invalid command-line option")?;
        Ok(config)
    }
}

/// Available scenarios.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Busy-loop under a CPU cap and report throttling.
    CpuLimit(cpu::CpuArgs),
    /// Allocate past a memory cap with swap disabled; expects an OOM kill.
    MemoryLimit(memory::MemoryArgs),
    /// Write past a root filesystem size cap; expects a write failure.
    RootfsLimit(rootfs::RootfsArgs),
    /// Fill a capacity-bounded volume until writes fail; expects exit 42.
    VolumeFill(volume::FillArgs),
    /// Recreate the volume larger and write into it; expects success.
    VolumeExpand(volume::ExpandArgs),
}

/// Connects to Docker and runs the selected scenario.
///
/// # Errors
///
/// Returns an error if the daemon is unreachable or the scenario fails.
pub async fn execute(cli: Cli, config: HarnessConfig) -> anyhow::Result<()> {
    let runtime = DockerRuntime::connect(&config)
        .await
        .context("connecting to the docker daemon")?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(runtime);
    let ctx = ScenarioContext::new(runtime, &config, cli.json);
    ctx.cancel_on_interrupt();
    let result = dispatch(cli.command, &ctx).await;
    if result.is_err() && ctx.cancel_token().is_cancelled() {
        return result.context("scenario cancelled by deadline or interrupt");
    }
    result
}

/// Dispatches a parsed scenario command to its driver.
///
/// # Errors
///
/// Returns an error if the scenario fails or its expectation is not met.
pub async fn dispatch(command: Command, ctx: &ScenarioContext) -> anyhow::Result<()> {
    match command {
        Command::CpuLimit(args) => cpu::execute(args, ctx).await,
        Command::MemoryLimit(args) => memory::execute(args, ctx).await,
        Command::RootfsLimit(args) => rootfs::execute(args, ctx).await,
        Command::VolumeFill(args) => volume::execute_fill(args, ctx).await,
        Command::VolumeExpand(args) => volume::execute_expand(args, ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn usage_names_the_binary() {
        use clap::CommandFactory;
        assert_eq!(Cli::command().get_name(), APP_NAME);
        assert_eq!(APP_NAME, "limitlab");
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "limitlab",
            "volume-fill",
            "--timeout",
            "30",
            "--log-format",
            "json",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Some(30));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(cli.json);
        assert!(matches!(cli.command, Command::VolumeFill(_)));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let err = Cli::try_parse_from(["limitlab", "cpu-limit", "--log-format", "xml"]);
        assert!(err.is_err());
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "limitlab",
            "cpu-limit",
            "--timeout",
            "42",
            "--log-level",
            "debug",
            "--docker-host",
            "tcp://127.0.0.1:2375",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.run_timeout_secs, 42);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.docker_host.as_deref(), Some("tcp://127.0.0.1:2375"));
    }

    #[test]
    fn zero_timeout_flag_is_rejected() {
        let cli = Cli::try_parse_from(["limitlab", "cpu-limit", "--timeout", "0"]).unwrap();
        assert!(cli.load_config().is_err());
    }
}
