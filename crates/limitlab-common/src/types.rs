//! Domain primitive types used across the limitlab workspace.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier the container runtime assigned to a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CPU and memory limits for a container.
///
/// Unset fields are left to the runtime's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU limit in units of 10^-9 CPUs.
    pub nano_cpus: Option<i64>,
    /// CFS quota in microseconds per period.
    pub cpu_quota: Option<i64>,
    /// CFS period in microseconds.
    pub cpu_period: Option<i64>,
    /// Hard memory limit in bytes.
    pub memory_bytes: Option<i64>,
    /// Memory plus swap limit in bytes. Equal to `memory_bytes` disables swap.
    pub memory_swap_bytes: Option<i64>,
}

/// Kind of a container mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// A named runtime volume.
    Volume,
    /// A host path.
    Bind,
    /// An in-memory filesystem.
    Tmpfs,
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Volume => write!(f, "volume"),
            Self::Bind => write!(f, "bind"),
            Self::Tmpfs => write!(f, "tmpfs"),
        }
    }
}

/// A mount declared for a container. Only the runtime validates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount kind.
    pub kind: MountKind,
    /// Volume name or host path. Empty for tmpfs.
    pub source: String,
    /// Absolute path inside the container.
    pub target: String,
}

impl Mount {
    /// Mounts the named volume at `target`.
    #[must_use]
    pub fn volume(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: MountKind::Volume,
            source: name.into(),
            target: target.into(),
        }
    }
}

/// Runtime-level host configuration for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfiguration {
    /// CPU and memory limits.
    pub resources: ResourceLimits,
    /// Size bound of the container's writable root filesystem, in bytes.
    ///
    /// Always forwarded to the runtime, including when zero.
    pub root_fs_limit_bytes: u64,
    /// Mounts in the order they were declared.
    pub mounts: Vec<Mount>,
}

/// What to run inside the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
    /// Attach standard output to the creating client.
    pub attach_stdout: bool,
    /// Attach standard error to the creating client.
    pub attach_stderr: bool,
    /// Allocate a pseudo-terminal.
    pub tty: bool,
}

impl ContainerSpec {
    /// Creates a spec running `command` in `image`.
    #[must_use]
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            ..Self::default()
        }
    }

    /// Creates a spec running `script` through `sh -c`.
    #[must_use]
    pub fn shell(image: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(image, vec!["sh".into(), "-c".into(), script.into()])
    }

    /// Returns it with stdio attachment and TTY allocation disabled.
    #[must_use]
    pub fn detached(mut self) -> Self {
        self.attach_stdout = false;
        self.attach_stderr = false;
        self.tty = false;
        self
    }
}

/// Outcome of one controlled container run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Runtime-assigned container ID.
    pub container_id: ContainerId,
    /// Exit status of the container's main process.
    pub status_code: i64,
    /// Rendered `STDOUT:` / `STDERR:` block, empty when nothing was written.
    pub logs: String,
}

impl RunResult {
    /// Returns whether the container exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.status_code == 0
    }
}
