//! Output helpers for scenario commands.

use std::io::Write;

use limitlab_common::constants::NANO_CPUS_PER_CPU;
use limitlab_common::types::HostConfiguration;
use limitlab_runtime::report::format_bytes;
use serde::Serialize;

/// Writes `value` as pretty JSON on stdout.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}")?;
    Ok(())
}

/// One-line description of the limits in `host`, e.g.
/// `"cpus=1.00 memory=128.00 MiB rootfs=512.00 MiB mounts=1"`.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn describe_limits(host: &HostConfiguration) -> String {
    let res = &host.resources;
    let mut parts = Vec::new();
    if let Some(nano) = res.nano_cpus {
        parts.push(format!("cpus={:.2}", nano as f64 / NANO_CPUS_PER_CPU as f64));
    }
    if let Some(quota) = res.cpu_quota {
        parts.push(format!("cpu_quota={quota}us"));
    }
    if let Some(period) = res.cpu_period {
        parts.push(format!("cpu_period={period}us"));
    }
    if let Some(mem) = res.memory_bytes {
        parts.push(format!("memory={}", format_bytes(mem.unsigned_abs())));
    }
    if let Some(swap) = res.memory_swap_bytes {
        parts.push(format!("memory+swap={}", format_bytes(swap.unsigned_abs())));
    }
    parts.push(format!("rootfs={}", format_bytes(host.root_fs_limit_bytes)));
    parts.push(format!("mounts={}", host.mounts.len()));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use limitlab_common::constants::MIB;
    use limitlab_common::types::{Mount, ResourceLimits};

    use super::*;

    #[test]
    fn describe_limits_lists_set_fields_only() {
        let host = HostConfiguration {
            resources: ResourceLimits {
                nano_cpus: Some(NANO_CPUS_PER_CPU),
                memory_bytes: Some(128 * 1024 * 1024),
                ..ResourceLimits::default()
            },
            root_fs_limit_bytes: 512 * MIB,
            mounts: vec![Mount::volume("v", "/data")],
        };
        assert_eq!(
            describe_limits(&host),
            "cpus=1.00 memory=128.00 MiB rootfs=512.00 MiB mounts=1"
        );
    }

    #[test]
    fn describe_limits_of_empty_config() {
        assert_eq!(
            describe_limits(&HostConfiguration::default()),
            "rootfs=0 B mounts=0"
        );
    }
}
