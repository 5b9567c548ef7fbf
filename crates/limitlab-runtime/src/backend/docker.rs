//! Docker Engine backend built on `bollard`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount as DockerMount, MountTypeEnum};
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use futures_util::{StreamExt, stream};
use limitlab_common::config::HarnessConfig;
use limitlab_common::types::{ContainerId, ContainerSpec, HostConfiguration, MountKind};

use super::{
    ContainerRuntime, LogFrame, LogStream, ProgressStream, PullProgress, RemoveOptions,
    StreamKind, VolumeSpec, WaitHandle,
};
use crate::error::RuntimeError;

/// Seconds bollard waits for a response on an explicitly configured endpoint.
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Runtime backed by a Docker (or Docker-compatible) daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the daemon and negotiates the API version.
    ///
    /// Uses `config.docker_host` when set, otherwise the local defaults,
    /// which honour `DOCKER_HOST`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is malformed or unreachable.
    pub async fn connect(config: &HarnessConfig) -> Result<Self, RuntimeError> {
        let docker = match config.docker_host.as_deref() {
            Some(host) => connect_to(host)?,
            None => Docker::connect_with_local_defaults()?,
        };
        let docker = docker.negotiate_version().await?;
        tracing::debug!(version = ?docker.client_version(), "docker API version negotiated");
        Ok(Self { docker })
    }
}

fn connect_to(host: &str) -> Result<Docker, RuntimeError> {
    if let Some(path) = host.strip_prefix("unix://") {
        return Ok(Docker::connect_with_unix(
            path,
            CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )?);
    }
    if host.starts_with("tcp://") || host.starts_with("http://") {
        return Ok(Docker::connect_with_http(
            host,
            CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )?);
    }
    Err(RuntimeError::Unavailable {
        message: format!("unsupported docker host '{host}' (expected unix://, tcp:// or http://)"),
    })
}

/// Translates the harness host configuration into Docker's.
#[must_use]
pub fn to_docker_host_config(host: &HostConfiguration) -> HostConfig {
    let storage_opt = HashMap::from([(
        "size".to_string(),
        host.root_fs_limit_bytes.to_string(),
    )]);
    let mounts = host
        .mounts
        .iter()
        .map(|m| DockerMount {
            typ: Some(match m.kind {
                MountKind::Volume => MountTypeEnum::VOLUME,
                MountKind::Bind => MountTypeEnum::BIND,
                MountKind::Tmpfs => MountTypeEnum::TMPFS,
            }),
            source: Some(m.source.clone()).filter(|s| !s.is_empty()),
            target: Some(m.target.clone()),
            ..Default::default()
        })
        .collect();

    HostConfig {
        nano_cpus: host.resources.nano_cpus,
        cpu_quota: host.resources.cpu_quota,
        cpu_period: host.resources.cpu_period,
        memory: host.resources.memory_bytes,
        memory_swap: host.resources.memory_swap_bytes,
        storage_opt: Some(storage_opt),
        mounts: Some(mounts),
        ..Default::default()
    }
}

fn to_docker_config(spec: &ContainerSpec, host: &HostConfiguration) -> Config<String> {
    let env = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let labels = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        env: Some(env),
        labels: Some(labels),
        attach_stdin: Some(false),
        attach_stdout: Some(spec.attach_stdout),
        attach_stderr: Some(spec.attach_stderr),
        tty: Some(spec.tty),
        host_config: Some(to_docker_host_config(host)),
        ..Default::default()
    }
}

fn into_frame(output: LogOutput) -> LogFrame {
    let (stream, bytes) = match output {
        LogOutput::StdIn { message } => (StreamKind::Stdin, message),
        LogOutput::StdOut { message } => (StreamKind::Stdout, message),
        LogOutput::StdErr { message } => (StreamKind::Stderr, message),
        LogOutput::Console { message } => (StreamKind::Console, message),
    };
    LogFrame { stream, bytes }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, reference: &str) -> Result<ProgressStream, RuntimeError> {
        let options = CreateImageOptions {
            from_image: reference.to_string(),
            ..Default::default()
        };
        let progress = self
            .docker
            .create_image(Some(options), None, None)
            .map(|item| {
                item.map(|info| PullProgress {
                    id: info.id,
                    status: info.status,
                })
                .map_err(RuntimeError::from)
            });
        Ok(progress.boxed())
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
        host: &HostConfiguration,
        name: &str,
    ) -> Result<ContainerId, RuntimeError> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), to_docker_config(spec, host))
            .await?;
        for warning in &response.warnings {
            tracing::warn!(name, %warning, "runtime warning on create");
        }
        Ok(ContainerId::new(response.id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    fn wait_container(&self, id: &ContainerId) -> WaitHandle {
        let (sender, handle) = WaitHandle::channel();
        let docker = self.docker.clone();
        let id = id.to_string();
        drop(tokio::spawn(async move {
            let options = WaitContainerOptions {
                condition: "not-running".to_string(),
            };
            let mut responses = Box::pin(docker.wait_container(&id, Some(options)));
            match responses.next().await {
                Some(Ok(response)) => sender.exit(response.status_code),
                // bollard reports a non-zero exit as an error; it is still a status.
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    sender.exit(code);
                }
                Some(Err(err)) => sender.fail(err.into()),
                None => sender.fail(RuntimeError::WaitClosed),
            }
        }));
        handle
    }

    async fn fetch_logs(&self, id: &ContainerId) -> Result<LogStream, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut frames = self.docker.logs(id.as_str(), Some(options)).boxed();
        // The request is only sent on first poll; surface endpoint errors here.
        let first = match frames.next().await {
            Some(Ok(output)) => Some(into_frame(output)),
            Some(Err(err)) => return Err(err.into()),
            None => None,
        };
        let rest = frames.map(|item| item.map(into_frame).map_err(RuntimeError::from));
        Ok(stream::iter(first.map(Ok)).chain(rest).boxed())
    }

    async fn remove_container(
        &self,
        id: &ContainerId,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: options.force,
            v: options.remove_volumes,
            ..Default::default()
        };
        self.docker
            .remove_container(id.as_str(), Some(options))
            .await?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_volume(name, Some(RemoveVolumeOptions { force }))
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(RuntimeError::NotFound {
                kind: "volume",
                id: name.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn create_volume(&self, spec: &VolumeSpec) -> Result<(), RuntimeError> {
        let options = CreateVolumeOptions {
            name: spec.name.clone(),
            driver: spec.driver.clone(),
            driver_opts: spec.driver_opts.clone().into_iter().collect(),
            labels: spec.labels.clone().into_iter().collect(),
        };
        let volume = self.docker.create_volume(options).await?;
        tracing::debug!(volume = %volume.name, mountpoint = %volume.mountpoint, "volume created");
        Ok(())
    }
}
