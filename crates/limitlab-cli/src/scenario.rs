//! Shared scenario plumbing: deadline, image and volume preparation, the
//! controlled run itself, reporting, and the expectation check.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use limitlab_common::config::HarnessConfig;
use limitlab_common::constants::MIB;
use limitlab_common::types::{ContainerSpec, HostConfiguration, RunResult};
use limitlab_runtime::backend::ContainerRuntime;
use limitlab_runtime::engine::Engine;
use limitlab_runtime::image::ensure_image;
use limitlab_runtime::report::{RunSummary, format_bytes, log_run_result};
use limitlab_runtime::volume::{recreate_volume, remove_volume};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::output;

/// Converts a size flag from MiB to bytes.
///
/// # Errors
///
/// Returns an error naming `flag` if the byte count does not fit in a `u64`.
pub fn mib_to_bytes(mib: u64, flag: &str) -> anyhow::Result<u64> {
    mib.checked_mul(MIB)
        .with_context(|| format!("{flag} ({mib}) is too large"))
}

/// Converts a memory flag from MiB to the runtime's signed byte count.
///
/// # Errors
///
/// Returns an error naming `flag` if the byte count does not fit in an `i64`.
pub fn mib_to_limit(mib: u64, flag: &str) -> anyhow::Result<i64> {
    i64::try_from(mib_to_bytes(mib, flag)?)
        .with_context(|| format!("{flag} ({mib}) is too large"))
}

/// How a scenario's container is expected to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Exit status zero.
    Success,
    /// Any non-zero exit status.
    Failure,
}

impl Expectation {
    /// Checks `status_code` against the expectation.
    ///
    /// # Errors
    ///
    /// Returns an error describing the mismatch.
    pub fn check(self, status_code: i64) -> anyhow::Result<()> {
        match self {
            Self::Success if status_code != 0 => {
                bail!("expected the container to succeed, but it exited with {status_code}")
            }
            Self::Failure if status_code == 0 => {
                bail!("expected the container to hit its limit, but it exited with 0")
            }
            _ => Ok(()),
        }
    }
}

/// A volume recreated before the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioVolume {
    /// Volume name.
    pub name: String,
    /// Capacity in bytes.
    pub size_bytes: u64,
    /// Remove the volume once the run is over.
    pub remove_after: bool,
}

/// Everything a driver decides; the rest is common.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Label used in reports.
    pub label: &'static str,
    /// Prefix of the generated container name.
    pub name_prefix: &'static str,
    /// What to run.
    pub spec: ContainerSpec,
    /// Limits and mounts.
    pub host: HostConfiguration,
    /// Volume to recreate first, if any.
    pub volume: Option<ScenarioVolume>,
    /// Expected exit.
    pub expectation: Expectation,
}

/// Shared state of one CLI invocation.
#[derive(Debug)]
pub struct ScenarioContext {
    engine: Engine,
    cancel: CancellationToken,
    json: bool,
    _deadline: DropGuard,
}

impl ScenarioContext {
    /// Creates the context and arms the run deadline.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &HarnessConfig, json: bool) -> Self {
        let cancel = CancellationToken::new();
        spawn_deadline(cancel.clone(), config.run_timeout());
        Self {
            engine: Engine::from_config(runtime, config),
            _deadline: cancel.clone().drop_guard(),
            cancel,
            json,
        }
    }

    /// Cancels the scenario on Ctrl-C.
    pub fn cancel_on_interrupt(&self) {
        let cancel = self.cancel.clone();
        drop(tokio::spawn(async move {
            tokio::select! {
                res = tokio::signal::ctrl_c() => match res {
                    Ok(()) => {
                        tracing::warn!("interrupted, cancelling scenario");
                        cancel.cancel();
                    }
                    Err(err) => tracing::warn!(error = %err, "cannot listen for Ctrl-C"),
                },
                () = cancel.cancelled() => {}
            }
        }));
    }

    /// Token cancelled by the deadline or an interrupt.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

fn spawn_deadline(cancel: CancellationToken, timeout: Duration) {
    drop(tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(timeout) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "scenario deadline reached, cancelling");
                cancel.cancel();
            }
            () = cancel.cancelled() => {}
        }
    }));
}

/// Removes a scenario volume after the run. Runs even when the scenario
/// was cancelled, bounded by `timeout`; failures are logged.
async fn cleanup_volume(runtime: &dyn ContainerRuntime, name: &str, timeout: Duration) {
    let detached = CancellationToken::new();
    let removal = remove_volume(runtime, name, &detached);
    match tokio::time::timeout(timeout, removal).await {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => {
            let err = anyhow::Error::from(err);
            tracing::warn!(volume = name, error = %format!("{err:#}"), "volume cleanup failed");
        }
        Err(_) => tracing::warn!(
            volume = name,
            timeout_secs = timeout.as_secs(),
            "volume cleanup timed out"
        ),
    }
}

/// Runs `scenario` end to end and returns the run result once the
/// expectation holds.
///
/// # Errors
///
/// Returns an error if any step fails or the exit status does not match
/// the expectation.
pub async fn run(ctx: &ScenarioContext, scenario: Scenario) -> anyhow::Result<RunResult> {
    let Scenario {
        label,
        name_prefix,
        spec,
        host,
        volume,
        expectation,
    } = scenario;
    let runtime = ctx.engine.runtime();

    ensure_image(runtime, &spec.image, &ctx.cancel)
        .await
        .with_context(|| format!("{label}: preparing image"))?;

    if let Some(volume) = &volume {
        recreate_volume(runtime, &volume.name, volume.size_bytes, &ctx.cancel)
            .await
            .with_context(|| format!("{label}: preparing volume"))?;
        tracing::info!(
            volume = %volume.name,
            capacity = %format_bytes(volume.size_bytes),
            "volume ready"
        );
    }

    tracing::info!(scenario = label, limits = %output::describe_limits(&host), "starting run");
    let outcome = ctx
        .engine
        .run(spec, host, name_prefix, &ctx.cancel)
        .await
        .with_context(|| format!("{label}: controlled run failed"));

    if let Some(volume) = volume.filter(|v| v.remove_after) {
        cleanup_volume(runtime, &volume.name, ctx.engine.cleanup_timeout()).await;
    }

    let result = outcome?;
    log_run_result(label, &result);
    if ctx.json {
        output::print_json(&RunSummary::new(label, &result))?;
    }
    expectation
        .check(result.status_code)
        .with_context(|| format!("{label}: unexpected outcome"))?;
    Ok(result)
}
