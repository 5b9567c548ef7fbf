//! `limitlab cpu-limit`: busy-loop under a CPU cap.

use anyhow::ensure;
use clap::Args;
use limitlab_common::constants::NANO_CPUS_PER_CPU;
use limitlab_common::types::{ContainerSpec, ResourceLimits};
use limitlab_runtime::host::build_host_config;

use crate::scenario::{self, Expectation, Scenario, ScenarioContext};

/// Default image of the CPU scenario.
pub const DEFAULT_IMAGE: &str = "docker.io/library/python:3.12-alpine";

/// Two busy workers, then the cgroup's view of the cap and of throttling.
const CPU_SCRIPT: &str = r#"set -eu
echo "cpu.max: $(cat /sys/fs/cgroup/cpu.max 2>/dev/null || echo unavailable)"
END=$(( $(date +%s) + DURATION_SECS ))
for worker in $(seq 1 "$WORKERS"); do
    ( while [ "$(date +%s)" -lt "$END" ]; do :; done ) &
done
wait
echo "busy for ${DURATION_SECS}s with ${WORKERS} workers"
grep -E '^(nr_periods|nr_throttled|throttled_usec)' /sys/fs/cgroup/cpu.stat 2>/dev/null || echo "cpu.stat unavailable""#;

/// Arguments for the `cpu-limit` command.
#[derive(Args, Debug)]
pub struct CpuArgs {
    /// Image to run.
    #[arg(long, default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// CPU cap, in CPUs (fractions allowed).
    #[arg(long, default_value_t = 1.0)]
    pub cpus: f64,

    /// Memory limit, in MiB.
    #[arg(long, default_value_t = 128)]
    pub memory_mib: u64,

    /// Number of busy workers; more than the cap shows throttling.
    #[arg(long, default_value_t = 2)]
    pub workers: u32,

    /// How long the workers spin, in seconds.
    #[arg(long, default_value_t = 5)]
    pub duration_secs: u64,
}

/// Converts a CPU count into the runtime's nano-CPU unit.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn nano_cpus(cpus: f64) -> anyhow::Result<i64> {
    ensure!(
        cpus.is_finite() && cpus > 0.0 && cpus <= 1024.0,
        "--cpus must be a positive number of CPUs, got {cpus}"
    );
    Ok((cpus * NANO_CPUS_PER_CPU as f64).round() as i64)
}

/// Builds the CPU scenario.
///
/// # Errors
///
/// Returns an error if an argument is out of range.
pub fn scenario(args: CpuArgs) -> anyhow::Result<Scenario> {
    let memory_bytes = scenario::mib_to_limit(args.memory_mib, "--memory-mib")?;
    let resources = ResourceLimits {
        nano_cpus: Some(nano_cpus(args.cpus)?),
        memory_bytes: Some(memory_bytes),
        ..ResourceLimits::default()
    };
    let mut spec = ContainerSpec::shell(args.image, CPU_SCRIPT);
    spec.env = vec![
        ("WORKERS".into(), args.workers.to_string()),
        ("DURATION_SECS".into(), args.duration_secs.to_string()),
    ];
    Ok(Scenario {
        label: "cpu limit",
        name_prefix: "cpu-limit",
        spec,
        host: build_host_config(resources, 0, Vec::new()),
        volume: None,
        expectation: Expectation::Success,
    })
}

/// Executes the `cpu-limit` command.
///
/// # Errors
///
/// Returns an error if the run fails or the container does not exit 0.
pub async fn execute(args: CpuArgs, ctx: &ScenarioContext) -> anyhow::Result<()> {
    let _ = scenario::run(ctx, scenario(args)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_cpus_convert_to_nano() {
        assert_eq!(nano_cpus(1.0).unwrap(), 1_000_000_000);
        assert_eq!(nano_cpus(0.5).unwrap(), 500_000_000);
    }

    #[test]
    fn non_positive_cpus_are_rejected() {
        assert!(nano_cpus(0.0).is_err());
        assert!(nano_cpus(-1.0).is_err());
        assert!(nano_cpus(f64::NAN).is_err());
    }
}
