//! `limitlab volume-fill` and `limitlab volume-expand`: capacity-bounded
//! volumes.
//!
//! `volume-fill` recreates the volume small and writes until a write fails.
//! `volume-expand` recreates it larger and checks that a write which would
//! not have fit before now succeeds.

use anyhow::ensure;
use clap::Args;
use limitlab_common::constants::{MIB, NANO_CPUS_PER_CPU};
use limitlab_common::types::{ContainerSpec, HostConfiguration, Mount, ResourceLimits};
use limitlab_runtime::host::build_host_config;

use crate::scenario::{self, Expectation, Scenario, ScenarioContext, ScenarioVolume};

/// Default image of the volume scenarios.
pub const DEFAULT_IMAGE: &str = "docker.io/library/python:3.12-alpine";
/// Default volume name shared by both scenarios.
pub const DEFAULT_VOLUME: &str = "volume-limit-demo";
/// Default mount point inside the container.
pub const DEFAULT_MOUNT_PATH: &str = "/demo-data";

const MEMORY_LIMIT_BYTES: i64 = 128 * 1024 * 1024;
const ROOT_FS_LIMIT_BYTES: u64 = 512 * MIB;

/// Exit status of the fill script once the volume is full.
pub const VOLUME_FULL_EXIT: i64 = 42;

const FILL_SCRIPT: &str = r#"set -eu
rm -f "$TARGET/fillfile"
touch "$TARGET/fillfile"
TOTAL=0
while true; do
    if dd if=/dev/zero of="$TARGET/fillfile" bs=1M count="$CHUNK_MIB" oflag=append conv=notrunc 2>/dev/null; then
        TOTAL=$((TOTAL + CHUNK_MIB))
        USAGE=$(df -m "$TARGET" | tail -1 | awk '{print "used=" $3 "MiB avail=" $4 "MiB"}')
        echo "written=${TOTAL}MiB ${USAGE}"
        sync
    else
        echo "write failed: volume is full" >&2
        df -m "$TARGET" >&2
        exit 42
    fi
    sleep 0.1
done"#;

const EXPAND_SCRIPT: &str = r#"set -eu
rm -f "$TARGET/expanded.bin"
dd if=/dev/zero of="$TARGET/expanded.bin" bs=1M count="$WRITE_MIB" 2>/dev/null
sync
echo "wrote ${WRITE_MIB} MiB, volume still usable""#;

/// Options shared by both volume scenarios.
#[derive(Args, Debug)]
pub struct VolumeArgs {
    /// Image to run.
    #[arg(long, default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Name of the volume to recreate.
    #[arg(long, default_value = DEFAULT_VOLUME)]
    pub volume: String,

    /// Mount point inside the container.
    #[arg(long, default_value = DEFAULT_MOUNT_PATH)]
    pub mount_path: String,

    /// Remove the volume after the run.
    #[arg(long)]
    pub remove_after: bool,
}

/// Arguments for the `volume-fill` command.
#[derive(Args, Debug)]
pub struct FillArgs {
    /// Shared volume options.
    #[command(flatten)]
    pub volume: VolumeArgs,

    /// Volume capacity, in MiB.
    #[arg(long, default_value_t = 32)]
    pub size_mib: u64,

    /// Size of each appended chunk, in MiB.
    #[arg(long, default_value_t = 4)]
    pub chunk_mib: u64,
}

/// Arguments for the `volume-expand` command.
#[derive(Args, Debug)]
pub struct ExpandArgs {
    /// Shared volume options.
    #[command(flatten)]
    pub volume: VolumeArgs,

    /// New volume capacity, in MiB.
    #[arg(long, default_value_t = 96)]
    pub size_mib: u64,

    /// How much to write, in MiB.
    #[arg(long, default_value_t = 64)]
    pub write_mib: u64,
}

fn host(args: &VolumeArgs) -> HostConfiguration {
    build_host_config(
        ResourceLimits {
            nano_cpus: Some(NANO_CPUS_PER_CPU),
            memory_bytes: Some(MEMORY_LIMIT_BYTES),
            ..ResourceLimits::default()
        },
        ROOT_FS_LIMIT_BYTES,
        vec![Mount::volume(&args.volume, &args.mount_path)],
    )
}

fn volume(args: &VolumeArgs, size_mib: u64) -> anyhow::Result<ScenarioVolume> {
    Ok(ScenarioVolume {
        name: args.volume.clone(),
        size_bytes: scenario::mib_to_bytes(size_mib, "--size-mib")?,
        remove_after: args.remove_after,
    })
}

/// Builds the fill scenario.
///
/// # Errors
///
/// Returns an error if a size is zero or too large.
pub fn fill_scenario(args: FillArgs) -> anyhow::Result<Scenario> {
    ensure!(args.size_mib > 0, "--size-mib must be positive");
    ensure!(args.chunk_mib > 0, "--chunk-mib must be positive");
    let volume = volume(&args.volume, args.size_mib)?;
    let mut spec = ContainerSpec::shell(args.volume.image.clone(), FILL_SCRIPT);
    spec.env = vec![
        ("TARGET".into(), args.volume.mount_path.clone()),
        ("CHUNK_MIB".into(), args.chunk_mib.to_string()),
    ];
    Ok(Scenario {
        label: "volume fill",
        name_prefix: "volume-fill",
        host: host(&args.volume),
        volume: Some(volume),
        spec,
        expectation: Expectation::Failure,
    })
}

/// Builds the expansion scenario.
///
/// # Errors
///
/// Returns an error if a size is zero or too large.
pub fn expand_scenario(args: ExpandArgs) -> anyhow::Result<Scenario> {
    ensure!(args.size_mib > 0, "--size-mib must be positive");
    ensure!(args.write_mib > 0, "--write-mib must be positive");
    let volume = volume(&args.volume, args.size_mib)?;
    let mut spec = ContainerSpec::shell(args.volume.image.clone(), EXPAND_SCRIPT);
    spec.env = vec![
        ("TARGET".into(), args.volume.mount_path.clone()),
        ("WRITE_MIB".into(), args.write_mib.to_string()),
    ];
    Ok(Scenario {
        label: "volume expand",
        name_prefix: "volume-expand",
        host: host(&args.volume),
        volume: Some(volume),
        spec,
        expectation: Expectation::Success,
    })
}

/// Executes the `volume-fill` command.
///
/// # Errors
///
/// Returns an error if the run fails or the container exits 0, meaning the
/// capacity bound was never hit.
pub async fn execute_fill(args: FillArgs, ctx: &ScenarioContext) -> anyhow::Result<()> {
    let result = scenario::run(ctx, fill_scenario(args)?).await?;
    if result.status_code != VOLUME_FULL_EXIT {
        tracing::warn!(
            status_code = result.status_code,
            "container failed, but not with the volume-full status"
        );
    }
    Ok(())
}

/// Executes the `volume-expand` command.
///
/// # Errors
///
/// Returns an error if the run fails or the write did not succeed.
pub async fn execute_expand(args: ExpandArgs, ctx: &ScenarioContext) -> anyhow::Result<()> {
    let _ = scenario::run(ctx, expand_scenario(args)?).await?;
    Ok(())
}
