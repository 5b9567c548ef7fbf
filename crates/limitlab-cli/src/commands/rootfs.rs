//! `limitlab rootfs-limit`: write past the root filesystem size cap.

use anyhow::ensure;
use clap::Args;
use limitlab_common::types::{ContainerSpec, ResourceLimits};
use limitlab_runtime::host::build_host_config;

use crate::scenario::{self, Expectation, Scenario, ScenarioContext};

/// Default image of the root filesystem scenario.
pub const DEFAULT_IMAGE: &str = "docker.io/library/alpine:3.20";

const WRITE_SCRIPT: &str = r#"set -eu
df -m / | tail -1
dd if=/dev/zero of=/tmp/rootfs-fill bs=1M count="$WRITE_MIB"
echo "wrote ${WRITE_MIB} MiB to the root filesystem""#;

/// Arguments for the `rootfs-limit` command.
#[derive(Args, Debug)]
pub struct RootfsArgs {
    /// Image to run.
    #[arg(long, default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Size cap of the writable root filesystem, in MiB.
    #[arg(long, default_value_t = 128)]
    pub rootfs_mib: u64,

    /// How much to write into `/tmp`, in MiB.
    #[arg(long, default_value_t = 256)]
    pub write_mib: u64,
}

/// Builds the root filesystem scenario.
///
/// # Errors
///
/// Returns an error if the cap is too large or the write would not reach it.
pub fn scenario(args: RootfsArgs) -> anyhow::Result<Scenario> {
    let root_fs_limit_bytes = scenario::mib_to_bytes(args.rootfs_mib, "--rootfs-mib")?;
    ensure!(
        args.write_mib > args.rootfs_mib,
        "--write-mib ({}) must exceed --rootfs-mib ({}) to reach the limit",
        args.write_mib,
        args.rootfs_mib
    );
    let mut spec = ContainerSpec::shell(args.image, WRITE_SCRIPT);
    spec.env = vec![("WRITE_MIB".into(), args.write_mib.to_string())];
    Ok(Scenario {
        label: "rootfs limit",
        name_prefix: "rootfs-limit",
        spec,
        host: build_host_config(ResourceLimits::default(), root_fs_limit_bytes, Vec::new()),
        volume: None,
        expectation: Expectation::Failure,
    })
}

/// Executes the `rootfs-limit` command.
///
/// # Errors
///
/// Returns an error if the run fails or the write was not refused.
pub async fn execute(args: RootfsArgs, ctx: &ScenarioContext) -> anyhow::Result<()> {
    let _ = scenario::run(ctx, scenario(args)?).await?;
    Ok(())
}
