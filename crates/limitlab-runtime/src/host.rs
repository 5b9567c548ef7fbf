//! Host configuration assembly.

use limitlab_common::types::{HostConfiguration, Mount, ResourceLimits};

/// Merges resource limits, the root filesystem bound and mounts into one
/// host configuration.
///
/// Never fails: whether the combination makes sense is for the runtime to
/// decide when the container is created.
#[must_use]
pub fn build_host_config(
    resources: ResourceLimits,
    root_fs_limit_bytes: u64,
    mounts: Vec<Mount>,
) -> HostConfiguration {
    HostConfiguration {
        resources,
        root_fs_limit_bytes,
        mounts,
    }
}

/// Limits with swap disabled: memory plus swap equals memory.
#[must_use]
pub const fn memory_without_swap(memory_bytes: i64) -> ResourceLimits {
    ResourceLimits {
        nano_cpus: None,
        cpu_quota: None,
        cpu_period: None,
        memory_bytes: Some(memory_bytes),
        memory_swap_bytes: Some(memory_bytes),
    }
}
