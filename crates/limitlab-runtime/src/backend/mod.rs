//! Container runtime abstraction.
//!
//! The harness only needs a narrow slice of a container engine: pull an
//! image, create/start/wait/remove a container, read its logs, and
//! create/remove volumes. [`ContainerRuntime`] captures exactly that slice so
//! the engine can run against Docker or against the in-memory
//! [`FakeRuntime`](fake::FakeRuntime).

pub mod docker;
pub mod fake;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use limitlab_common::constants::MIB;
use limitlab_common::types::{ContainerId, ContainerSpec, HostConfiguration};
use tokio::sync::oneshot;

use crate::error::RuntimeError;

/// One progress message of an image pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    /// Layer or image the message refers to.
    pub id: Option<String>,
    /// Status text such as `Downloading` or `Pull complete`.
    pub status: Option<String>,
}

/// Stream of pull progress messages. Must be drained for the pull to finish.
pub type ProgressStream = BoxStream<'static, Result<PullProgress, RuntimeError>>;

/// Logical channel of a log frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard input echoed back by the runtime.
    Stdin,
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
    /// Raw, unframed output of a container running with a TTY.
    Console,
}

/// One chunk of the combined log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFrame {
    /// Channel the chunk was written to.
    pub stream: StreamKind,
    /// Raw bytes of the chunk.
    pub bytes: Bytes,
}

impl LogFrame {
    /// Creates a standard-output frame.
    #[must_use]
    pub fn stdout(bytes: impl Into<Bytes>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            bytes: bytes.into(),
        }
    }

    /// Creates a standard-error frame.
    #[must_use]
    pub fn stderr(bytes: impl Into<Bytes>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            bytes: bytes.into(),
        }
    }
}

/// Combined stdout/stderr stream of a container.
pub type LogStream = BoxStream<'static, Result<LogFrame, RuntimeError>>;

/// Options for container removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Kill the container first if it is still running.
    pub force: bool,
    /// Also remove anonymous volumes attached to the container.
    pub remove_volumes: bool,
}

/// Declarative description of a volume to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Volume name.
    pub name: String,
    /// Volume driver.
    pub driver: String,
    /// Driver-specific options.
    pub driver_opts: BTreeMap<String, String>,
    /// Volume labels.
    pub labels: BTreeMap<String, String>,
}

impl VolumeSpec {
    /// Returns the capacity in bytes encoded in a tmpfs `o=size=<n>m` option.
    #[must_use]
    pub fn capacity_bytes(&self) -> Option<u64> {
        self.driver_opts
            .get("o")?
            .split(',')
            .find_map(|opt| opt.strip_prefix("size="))
            .and_then(|size| size.strip_suffix('m'))
            .and_then(|mib| mib.parse::<u64>().ok())
            .map(|mib| mib * MIB)
    }
}

/// Terminal outcome of a wait, produced by racing the two wait channels.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The container stopped with this exit status.
    Status(i64),
    /// The wait itself failed, independently of the container.
    Failed(RuntimeError),
}

impl WaitOutcome {
    /// Consumes the outcome into the exit status or the wait error.
    ///
    /// # Errors
    ///
    /// Returns the error carried by [`WaitOutcome::Failed`].
    pub fn into_result(self) -> Result<i64, RuntimeError> {
        match self {
            Self::Status(code) => Ok(code),
            Self::Failed(err) => Err(err),
        }
    }
}

/// Receiving side of a wait: one channel for a wait error, one for the
/// container's exit status. At most one of them ever delivers a value.
#[derive(Debug)]
pub struct WaitHandle {
    /// Fires if the wait operation fails.
    pub error: oneshot::Receiver<RuntimeError>,
    /// Fires with the exit status once the container stops.
    pub status: oneshot::Receiver<i64>,
}

/// Sending side of a wait, held by the backend.
#[derive(Debug)]
pub struct WaitSender {
    error: oneshot::Sender<RuntimeError>,
    status: oneshot::Sender<i64>,
}

impl WaitSender {
    /// Reports a failed wait. Closes the status channel.
    pub fn fail(self, err: RuntimeError) {
        let _ = self.error.send(err);
    }

    /// Reports the container's exit status. Closes the error channel.
    pub fn exit(self, status_code: i64) {
        let _ = self.status.send(status_code);
    }
}

impl WaitHandle {
    /// Creates a connected sender/handle pair.
    #[must_use]
    pub fn channel() -> (WaitSender, Self) {
        let (error_tx, error_rx) = oneshot::channel();
        let (status_tx, status_rx) = oneshot::channel();
        (
            WaitSender {
                error: error_tx,
                status: status_tx,
            },
            Self {
                error: error_rx,
                status: status_rx,
            },
        )
    }
}

/// Capability set of a container runtime consumed by the harness.
///
/// Implementations must be cheap to share: the engine holds them behind an
/// `Arc` and may spawn teardown work that outlives a single call.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Starts pulling `reference`. The pull completes when the returned
    /// stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull request is rejected outright.
    async fn pull_image(&self, reference: &str) -> Result<ProgressStream, RuntimeError>;

    /// Creates a container named `name` and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime refuses the configuration.
    async fn create_container(
        &self,
        spec: &ContainerSpec,
        host: &HostConfiguration,
        name: &str,
    ) -> Result<ContainerId, RuntimeError>;

    /// Starts a created container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be started.
    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError>;

    /// Begins waiting for the container to leave the running state.
    ///
    /// Must be called from within a tokio runtime.
    fn wait_container(&self, id: &ContainerId) -> WaitHandle;

    /// Opens the combined stdout/stderr log stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the log endpoint cannot be opened.
    async fn fetch_logs(&self, id: &ContainerId) -> Result<LogStream, RuntimeError>;

    /// Removes a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    async fn remove_container(
        &self,
        id: &ContainerId,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError>;

    /// Removes a volume.
    ///
    /// # Errors
    ///
    /// Returns an error satisfying [`RuntimeError::is_not_found`] if the
    /// volume does not exist, or another error if removal fails.
    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    /// Creates a volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume cannot be created.
    async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_parsed_from_size_option() {
        let mut spec = VolumeSpec::default();
        let _ = spec.driver_opts.insert("o".into(), "size=32m".into());
        assert_eq!(spec.capacity_bytes(), Some(32 * MIB));
    }

    #[test]
    fn capacity_is_found_among_other_options() {
        let mut spec = VolumeSpec::default();
        let _ = spec
            .driver_opts
            .insert("o".into(), "uid=1000,size=96m".into());
        assert_eq!(spec.capacity_bytes(), Some(96 * MIB));
    }

    #[test]
    fn capacity_absent_without_size() {
        assert_eq!(VolumeSpec::default().capacity_bytes(), None);
    }

    #[tokio::test]
    async fn exit_closes_error_channel() {
        let (tx, handle) = WaitHandle::channel();
        tx.exit(3);
        assert_eq!(handle.status.await.unwrap(), 3);
        assert!(handle.error.await.is_err());
    }

    #[tokio::test]
    async fn fail_closes_status_channel() {
        let (tx, handle) = WaitHandle::channel();
        tx.fail(RuntimeError::WaitClosed);
        assert!(matches!(handle.error.await, Ok(RuntimeError::WaitClosed)));
        assert!(handle.status.await.is_err());
    }

    #[test]
    fn failed_outcome_converts_to_error() {
        assert_eq!(WaitOutcome::Status(42).into_result().unwrap(), 42);
        assert!(WaitOutcome::Failed(RuntimeError::Cancelled).into_result().is_err());
    }
}
