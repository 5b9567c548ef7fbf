//! Controlled execution of a single container.
//!
//! [`Engine::run`] owns the container it creates for the whole call: the
//! container is removed before the call returns on every path, and also when
//! the returned future is dropped half-way.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use limitlab_common::config::HarnessConfig;
use limitlab_common::constants::DEFAULT_CLEANUP_TIMEOUT_SECS;
use limitlab_common::types::{ContainerId, ContainerSpec, HostConfiguration, RunResult};
use tokio_util::sync::CancellationToken;

use crate::backend::{ContainerRuntime, RemoveOptions, WaitHandle, WaitOutcome};
use crate::cancel::guarded;
use crate::demux::{DemuxError, DemuxedOutput, demultiplex};
use crate::error::{HarnessError, Result, RuntimeError};

static LAST_NAME_NANOS: AtomicI64 = AtomicI64::new(0);

/// Returns a nanosecond timestamp strictly greater than any previously
/// returned by this process.
fn monotonic_nanos() -> i64 {
    let now = chrono::Utc::now();
    let now = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros());
    let previous = match LAST_NAME_NANOS.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
        Some(now.max(last + 1))
    }) {
        Ok(prev) | Err(prev) => prev,
    };
    now.max(previous + 1)
}

/// Generates a container name `"{prefix}-{nanos}"` unique within the process.
#[must_use]
pub fn container_name(prefix: &str) -> String {
    format!("{prefix}-{}", monotonic_nanos())
}

/// Force-removes a container, bounded by its own timeout. Failures are
/// logged, never returned.
async fn remove_with_timeout(runtime: &dyn ContainerRuntime, id: &ContainerId, timeout: Duration) {
    let options = RemoveOptions {
        force: true,
        remove_volumes: false,
    };
    match tokio::time::timeout(timeout, runtime.remove_container(id, options)).await {
        Ok(Ok(())) => tracing::debug!(id = %id, "container removed"),
        Ok(Err(err)) if err.is_not_found() => tracing::debug!(id = %id, "container already gone"),
        Ok(Err(err)) => tracing::warn!(id = %id, error = %err, "container cleanup failed"),
        Err(_) => tracing::warn!(
            id = %id,
            timeout_secs = timeout.as_secs(),
            "container cleanup timed out"
        ),
    }
}

/// Removes its container when released, or on drop if never released.
struct ContainerGuard {
    runtime: Arc<dyn ContainerRuntime>,
    id: Option<ContainerId>,
    timeout: Duration,
}

impl ContainerGuard {
    fn arm(runtime: Arc<dyn ContainerRuntime>, id: ContainerId, timeout: Duration) -> Self {
        Self {
            runtime,
            id: Some(id),
            timeout,
        }
    }

    async fn release(mut self) {
        if let Some(id) = self.id.take() {
            remove_with_timeout(self.runtime.as_ref(), &id, self.timeout).await;
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let runtime = Arc::clone(&self.runtime);
        let timeout = self.timeout;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tracing::debug!(id = %id, "run abandoned, removing container in background");
            drop(handle.spawn(async move {
                remove_with_timeout(runtime.as_ref(), &id, timeout).await;
            }));
        } else {
            tracing::warn!(id = %id, "no async runtime left to remove container");
        }
    }
}

/// Runs containers to completion against a [`ContainerRuntime`].
///
/// Holds no per-run state; concurrent calls are independent.
#[derive(Clone)]
pub struct Engine {
    runtime: Arc<dyn ContainerRuntime>,
    cleanup_timeout: Duration,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("cleanup_timeout", &self.cleanup_timeout)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine with the default cleanup timeout.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            cleanup_timeout: Duration::from_secs(DEFAULT_CLEANUP_TIMEOUT_SECS),
        }
    }

    /// Creates an engine using the configured cleanup timeout.
    #[must_use]
    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &HarnessConfig) -> Self {
        Self::new(runtime).with_cleanup_timeout(config.cleanup_timeout())
    }

    /// Overrides the timeout of the teardown step.
    #[must_use]
    pub const fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    /// Timeout of the teardown step.
    #[must_use]
    pub const fn cleanup_timeout(&self) -> Duration {
        self.cleanup_timeout
    }

    /// Returns the runtime this engine drives.
    #[must_use]
    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Creates, starts and waits for a container, then collects its output.
    ///
    /// Stdio attachment and TTY allocation are always disabled; output is
    /// read from the log endpoint after the container stops. Once created,
    /// the container is force-removed (its volumes kept) before this
    /// returns, whatever the outcome, using the engine's cleanup timeout
    /// rather than `cancel`.
    ///
    /// # Errors
    ///
    /// Returns the [`HarnessError`] variant of the first step that failed.
    /// Cancellation surfaces as that step's variant wrapping
    /// [`RuntimeError::Cancelled`]; an exit status observed before the
    /// failure is discarded. A create abandoned on cancellation is followed
    /// by a removal by name, in case the runtime completed it anyway.
    pub async fn run(
        &self,
        spec: ContainerSpec,
        host: HostConfiguration,
        name_prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<RunResult> {
        let spec = spec.detached();
        let name = container_name(name_prefix);
        tracing::info!(name = %name, image = %spec.image, "creating container");

        let created = guarded(cancel, self.runtime.create_container(&spec, &host, &name)).await;
        drop(host);
        let id = match created {
            Ok(id) => id,
            Err(source) => {
                if source.is_cancelled() {
                    // The daemon may complete an abandoned create; names are
                    // accepted wherever IDs are.
                    remove_with_timeout(
                        self.runtime.as_ref(),
                        &ContainerId::new(name.clone()),
                        self.cleanup_timeout,
                    )
                    .await;
                }
                return Err(HarnessError::Create { name, source });
            }
        };

        let guard = ContainerGuard::arm(Arc::clone(&self.runtime), id.clone(), self.cleanup_timeout);
        let outcome = self.drive(&id, cancel).await;
        guard.release().await;

        let (status_code, output) = outcome?;
        tracing::info!(id = %id, name = %name, status_code, "container finished");
        Ok(RunResult {
            container_id: id,
            status_code,
            logs: output.render(),
        })
    }

    async fn drive(
        &self,
        id: &ContainerId,
        cancel: &CancellationToken,
    ) -> Result<(i64, DemuxedOutput)> {
        guarded(cancel, self.runtime.start_container(id))
            .await
            .map_err(|source| HarnessError::Start {
                id: id.to_string(),
                source,
            })?;
        tracing::debug!(id = %id, "container started");

        let status_code = self
            .wait(id, cancel)
            .await
            .map_err(|source| HarnessError::Wait {
                id: id.to_string(),
                source,
            })?;
        tracing::debug!(id = %id, status_code, "container stopped");

        let frames = guarded(cancel, self.runtime.fetch_logs(id))
            .await
            .map_err(|source| HarnessError::LogCollection {
                id: id.to_string(),
                source,
            })?;
        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DemuxError::Cancelled),
            res = demultiplex(frames) => res,
        };
        let output = output.map_err(|source| HarnessError::Demux {
            id: id.to_string(),
            source,
        })?;
        Ok((status_code, output))
    }

    /// Resolves whichever wait channel fires first. The other channel is
    /// abandoned.
    async fn wait(&self, id: &ContainerId, cancel: &CancellationToken) -> std::result::Result<i64, RuntimeError> {
        let WaitHandle {
            mut error,
            mut status,
        } = self.runtime.wait_container(id);
        let signal = async {
            tokio::select! {
                Ok(err) = &mut error => WaitOutcome::Failed(err),
                Ok(code) = &mut status => WaitOutcome::Status(code),
                else => WaitOutcome::Failed(RuntimeError::WaitClosed),
            }
        };
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => WaitOutcome::Failed(RuntimeError::Cancelled),
            outcome = signal => outcome,
        };
        outcome.into_result()
    }
}
