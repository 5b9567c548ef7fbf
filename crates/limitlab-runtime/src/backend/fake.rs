//! In-memory runtime for tests and offline development.
//!
//! Containers do not run anything: when a container is started, a
//! caller-provided behavior decides its exit status and output from the
//! container spec, host configuration and existing volumes. Individual
//! operations can be made to fail to exercise error paths.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{StreamExt, stream};
use limitlab_common::types::{ContainerId, ContainerSpec, HostConfiguration};

use super::{
    ContainerRuntime, LogFrame, LogStream, ProgressStream, PullProgress, RemoveOptions,
    StreamKind, VolumeSpec, WaitHandle, WaitSender,
};
use crate::error::RuntimeError;

/// Operation of the fake runtime that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// `pull_image` is rejected.
    Pull,
    /// The pull progress stream breaks after the first message.
    PullStream,
    /// `create_container` fails.
    Create,
    /// `start_container` fails.
    Start,
    /// The wait reports an error instead of a status.
    Wait,
    /// `fetch_logs` fails to open the stream.
    Logs,
    /// The log stream breaks after the first frame.
    LogStream,
    /// The log stream carries unframed console output.
    ConsoleLogs,
    /// `remove_container` fails.
    Remove,
    /// `remove_volume` fails with an error other than not-found.
    VolumeRemove,
    /// `create_volume` fails.
    VolumeCreate,
}

/// What a fake container does when started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeExit {
    /// Exit status.
    pub status_code: i64,
    /// Bytes written to standard output.
    pub stdout: Vec<u8>,
    /// Bytes written to standard error.
    pub stderr: Vec<u8>,
}

impl FakeExit {
    /// Exit with `status_code` and no output.
    #[must_use]
    pub const fn code(status_code: i64) -> Self {
        Self {
            status_code,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    /// Adds standard output.
    #[must_use]
    pub fn with_stdout(mut self, out: impl Into<Vec<u8>>) -> Self {
        self.stdout = out.into();
        self
    }

    /// Adds standard error.
    #[must_use]
    pub fn with_stderr(mut self, err: impl Into<Vec<u8>>) -> Self {
        self.stderr = err.into();
        self
    }
}

/// Inputs handed to the behavior when a fake container starts.
#[derive(Debug)]
pub struct FakeInvocation<'a> {
    /// Container name.
    pub name: &'a str,
    /// Container spec as received by the runtime.
    pub spec: &'a ContainerSpec,
    /// Host configuration as received by the runtime.
    pub host: &'a HostConfiguration,
    /// Volumes existing at start time.
    pub volumes: &'a BTreeMap<String, VolumeSpec>,
}

/// Record of a `create_container` call that succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    /// Assigned ID.
    pub id: ContainerId,
    /// Requested name.
    pub name: String,
    /// Spec as received.
    pub spec: ContainerSpec,
    /// Host configuration as received.
    pub host: HostConfiguration,
}

type Behavior = dyn Fn(&FakeInvocation<'_>) -> FakeExit + Send + Sync;

#[derive(Debug)]
struct FakeContainer {
    name: String,
    exit: Option<FakeExit>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    containers: BTreeMap<String, FakeContainer>,
    created: Vec<CreatedContainer>,
    removed: Vec<String>,
    volumes: BTreeMap<String, VolumeSpec>,
    pulled: Vec<String>,
    parked_waits: Vec<WaitSender>,
}

/// In-memory [`ContainerRuntime`].
pub struct FakeRuntime {
    inner: Arc<Mutex<Inner>>,
    behavior: Box<Behavior>,
    failures: HashSet<FailurePoint>,
    hang_wait: bool,
}

impl std::fmt::Debug for FakeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRuntime")
            .field("failures", &self.failures)
            .field("hang_wait", &self.hang_wait)
            .finish_non_exhaustive()
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// Creates a runtime whose containers exit 0 without output.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            behavior: Box::new(|_| FakeExit::code(0)),
            failures: HashSet::new(),
            hang_wait: false,
        }
    }

    /// Every container started exits as `exit`.
    #[must_use]
    pub fn with_exit(self, exit: FakeExit) -> Self {
        self.with_behavior(move |_| exit.clone())
    }

    /// Containers exit as decided by `behavior`.
    #[must_use]
    pub fn with_behavior<F>(mut self, behavior: F) -> Self
    where
        F: Fn(&FakeInvocation<'_>) -> FakeExit + Send + Sync + 'static,
    {
        self.behavior = Box::new(behavior);
        self
    }

    /// Makes `point` fail.
    #[must_use]
    pub fn fail_at(mut self, point: FailurePoint) -> Self {
        let _ = self.failures.insert(point);
        self
    }

    /// Waits never resolve; only cancellation ends them.
    #[must_use]
    pub const fn hanging_wait(mut self) -> Self {
        self.hang_wait = true;
        self
    }

    /// Names of containers that exist right now.
    #[must_use]
    pub fn live_containers(&self) -> Vec<String> {
        self.state()
            .containers
            .values()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Names of containers removed so far, in removal order.
    #[must_use]
    pub fn removed_containers(&self) -> Vec<String> {
        self.state().removed.clone()
    }

    /// Every successful `create_container` call, in call order.
    #[must_use]
    pub fn created_containers(&self) -> Vec<CreatedContainer> {
        self.state().created.clone()
    }

    /// Returns the volume called `name`, if it exists.
    #[must_use]
    pub fn volume(&self, name: &str) -> Option<VolumeSpec> {
        self.state().volumes.get(name).cloned()
    }

    /// Images whose pull stream was drained to the end.
    #[must_use]
    pub fn pulled_images(&self) -> Vec<String> {
        self.state().pulled.clone()
    }

    /// Creates a volume directly, bypassing failure injection.
    pub fn seed_volume(&self, spec: VolumeSpec) {
        let _ = self.state().volumes.insert(spec.name.clone(), spec);
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fails(&self, point: FailurePoint) -> bool {
        self.failures.contains(&point)
    }
}

fn injected(what: &str) -> RuntimeError {
    RuntimeError::Unavailable {
        message: format!("injected {what} failure"),
    }
}

fn container_not_found(id: &ContainerId) -> RuntimeError {
    RuntimeError::NotFound {
        kind: "container",
        id: id.to_string(),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull_image(&self, reference: &str) -> Result<ProgressStream, RuntimeError> {
        if self.fails(FailurePoint::Pull) {
            return Err(injected("pull"));
        }
        let broken = self.fails(FailurePoint::PullStream);
        let inner = Arc::clone(&self.inner);
        let reference = reference.to_string();
        let statuses = ["Pulling fs layer", "Download complete", "Pull complete"];

        let progress = stream::unfold(0_usize, move |step| {
            let inner = Arc::clone(&inner);
            let reference = reference.clone();
            async move {
                if broken && step == 1 {
                    return Some((Err(injected("pull stream")), statuses.len() + 1));
                }
                match statuses.get(step) {
                    Some(status) => Some((
                        Ok(PullProgress {
                            id: Some(reference),
                            status: Some((*status).to_string()),
                        }),
                        step + 1,
                    )),
                    None => {
                        if step == statuses.len() {
                            inner
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .pulled
                                .push(reference);
                        }
                        None
                    }
                }
            }
        });
        Ok(progress.boxed())
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
        host: &HostConfiguration,
        name: &str,
    ) -> Result<ContainerId, RuntimeError> {
        if self.fails(FailurePoint::Create) {
            return Err(injected("create"));
        }
        let mut state = self.state();
        if state.containers.values().any(|c| c.name == name) {
            return Err(RuntimeError::Unavailable {
                message: format!("container name {name} is already in use"),
            });
        }
        state.next_id += 1;
        let id = ContainerId::new(format!("{:064x}", state.next_id));
        let _ = state.containers.insert(
            id.to_string(),
            FakeContainer {
                name: name.to_string(),
                exit: None,
            },
        );
        state.created.push(CreatedContainer {
            id: id.clone(),
            name: name.to_string(),
            spec: spec.clone(),
            host: host.clone(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        if self.fails(FailurePoint::Start) {
            return Err(injected("start"));
        }
        let mut state = self.state();
        let created = state
            .created
            .iter()
            .find(|c| c.id == *id)
            .cloned()
            .ok_or_else(|| container_not_found(id))?;
        let exit = (self.behavior)(&FakeInvocation {
            name: &created.name,
            spec: &created.spec,
            host: &created.host,
            volumes: &state.volumes,
        });
        let container = state
            .containers
            .get_mut(id.as_str())
            .ok_or_else(|| container_not_found(id))?;
        container.exit = Some(exit);
        Ok(())
    }

    fn wait_container(&self, id: &ContainerId) -> WaitHandle {
        let (sender, handle) = WaitHandle::channel();
        let mut state = self.state();
        if self.fails(FailurePoint::Wait) {
            sender.fail(injected("wait"));
        } else if self.hang_wait {
            state.parked_waits.push(sender);
        } else {
            let status = state
                .containers
                .get(id.as_str())
                .map(|c| c.exit.as_ref().map(|exit| exit.status_code));
            match status {
                Some(Some(code)) => sender.exit(code),
                Some(None) => state.parked_waits.push(sender),
                None => sender.fail(container_not_found(id)),
            }
        }
        handle
    }

    async fn fetch_logs(&self, id: &ContainerId) -> Result<LogStream, RuntimeError> {
        if self.fails(FailurePoint::Logs) {
            return Err(injected("logs"));
        }
        let exit = self
            .state()
            .containers
            .get(id.as_str())
            .ok_or_else(|| container_not_found(id))?
            .exit
            .clone()
            .unwrap_or_default();

        let mut frames: Vec<Result<LogFrame, RuntimeError>> = Vec::new();
        if self.fails(FailurePoint::ConsoleLogs) {
            frames.push(Ok(LogFrame {
                stream: StreamKind::Console,
                bytes: Bytes::from(exit.stdout.clone()),
            }));
        }
        // Split each channel into two frames so callers see interleaving.
        for (kind, data) in [
            (StreamKind::Stdout, &exit.stdout),
            (StreamKind::Stderr, &exit.stderr),
        ] {
            let mid = data.len() / 2;
            for part in [&data[..mid], &data[mid..]] {
                if !part.is_empty() {
                    frames.push(Ok(LogFrame {
                        stream: kind,
                        bytes: Bytes::copy_from_slice(part),
                    }));
                }
            }
        }
        if self.fails(FailurePoint::LogStream) {
            frames.truncate(1);
            frames.push(Err(injected("log stream")));
        }
        Ok(stream::iter(frames).boxed())
    }

    async fn remove_container(
        &self,
        id: &ContainerId,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError> {
        if self.fails(FailurePoint::Remove) {
            return Err(injected("remove"));
        }
        let mut state = self.state();
        // Like the daemon, accept a container name in place of its ID.
        let key = state
            .containers
            .iter()
            .find(|(key, c)| key.as_str() == id.as_str() || c.name == id.as_str())
            .map(|(key, _)| key.clone())
            .ok_or_else(|| container_not_found(id))?;
        let running = state
            .containers
            .get(&key)
            .is_some_and(|c| c.exit.is_none() || self.hang_wait);
        if running && !options.force {
            return Err(RuntimeError::Unavailable {
                message: format!("container {id} is running; stop it or use force"),
            });
        }
        let container = state
            .containers
            .remove(&key)
            .ok_or_else(|| container_not_found(id))?;
        state.removed.push(container.name);
        Ok(())
    }

    async fn remove_volume(&self, name: &str, _force: bool) -> Result<(), RuntimeError> {
        if self.fails(FailurePoint::VolumeRemove) {
            return Err(injected("volume remove"));
        }
        self.state()
            .volumes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound {
                kind: "volume",
                id: name.to_string(),
            })
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), RuntimeError> {
        if self.fails(FailurePoint::VolumeCreate) {
            return Err(injected("volume create"));
        }
        let _ = self.state().volumes.insert(spec.name.clone(), spec.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_container_is_listed_until_removed() {
        let rt = FakeRuntime::new();
        let spec = ContainerSpec::shell("alpine", "true");
        let id = rt
            .create_container(&spec, &HostConfiguration::default(), "sample-1")
            .await
            .unwrap();
        assert_eq!(rt.live_containers(), vec!["sample-1"]);

        rt.remove_container(&id, RemoveOptions { force: true, remove_volumes: false })
            .await
            .unwrap();
        assert!(rt.live_containers().is_empty());
        assert_eq!(rt.removed_containers(), vec!["sample-1"]);
    }

    #[tokio::test]
    async fn containers_can_be_removed_by_name() {
        let rt = FakeRuntime::new();
        let _ = rt
            .create_container(&ContainerSpec::default(), &HostConfiguration::default(), "named")
            .await
            .unwrap();
        rt.remove_container(&ContainerId::new("named"), RemoveOptions { force: true, remove_volumes: false })
            .await
            .unwrap();
        assert!(rt.live_containers().is_empty());
        assert!(
            rt.remove_container(&ContainerId::new("named"), RemoveOptions::default())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let rt = FakeRuntime::new();
        let spec = ContainerSpec::shell("alpine", "true");
        let host = HostConfiguration::default();
        let _ = rt.create_container(&spec, &host, "same").await.unwrap();
        assert!(rt.create_container(&spec, &host, "same").await.is_err());
    }

    #[tokio::test]
    async fn removing_unknown_volume_is_not_found() {
        let rt = FakeRuntime::new();
        let err = rt.remove_volume("missing", true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn pull_is_recorded_only_after_draining() {
        let rt = FakeRuntime::new();
        let mut progress = rt.pull_image("alpine:3.20").await.unwrap();
        let _ = progress.next().await;
        assert!(rt.pulled_images().is_empty());
        while progress.next().await.is_some() {}
        assert_eq!(rt.pulled_images(), vec!["alpine:3.20"]);
    }

    #[tokio::test]
    async fn behavior_sees_existing_volumes() {
        let rt = FakeRuntime::new().with_behavior(|inv| {
            FakeExit::code(i64::try_from(inv.volumes.len()).unwrap_or(-1))
        });
        rt.seed_volume(VolumeSpec {
            name: "v".into(),
            ..VolumeSpec::default()
        });
        let id = rt
            .create_container(
                &ContainerSpec::default(),
                &HostConfiguration::default(),
                "c",
            )
            .await
            .unwrap();
        rt.start_container(&id).await.unwrap();
        let status = rt.wait_container(&id).status.await.unwrap();
        assert_eq!(status, 1);
    }
}
