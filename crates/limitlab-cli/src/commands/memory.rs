//! `limitlab memory-limit`: allocate past a memory cap with swap disabled.

use anyhow::ensure;
use clap::Args;
use limitlab_common::types::ContainerSpec;
use limitlab_runtime::host::{build_host_config, memory_without_swap};

use crate::scenario::{self, Expectation, Scenario, ScenarioContext};

/// Default image of the memory scenario.
pub const DEFAULT_IMAGE: &str = "docker.io/library/python:3.12-alpine";

/// Holds on to every chunk so nothing can be reclaimed.
const ALLOCATE_SCRIPT: &str = r#"import os
chunk_mib = int(os.environ["CHUNK_MIB"])
target_mib = int(os.environ["TARGET_MIB"])
held = []
while len(held) * chunk_mib < target_mib:
    block = bytearray(chunk_mib * 1024 * 1024)
    for offset in range(0, len(block), 4096):
        block[offset] = 1
    held.append(block)
    print(f"allocated {len(held) * chunk_mib} MiB", flush=True)
print(f"allocated all {target_mib} MiB without being killed", flush=True)
"#;

/// Arguments for the `memory-limit` command.
#[derive(Args, Debug)]
pub struct MemoryArgs {
    /// Image to run; must provide `python3`.
    #[arg(long, default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Memory limit, in MiB. Swap is disabled.
    #[arg(long, default_value_t = 64)]
    pub memory_mib: u64,

    /// How much to try to allocate, in MiB.
    #[arg(long, default_value_t = 256)]
    pub allocate_mib: u64,

    /// Allocation step, in MiB.
    #[arg(long, default_value_t = 8)]
    pub chunk_mib: u64,
}

/// Builds the memory scenario.
///
/// # Errors
///
/// Returns an error if an argument is out of range.
pub fn scenario(args: MemoryArgs) -> anyhow::Result<Scenario> {
    let memory_bytes = scenario::mib_to_limit(args.memory_mib, "--memory-mib")?;
    ensure!(args.chunk_mib > 0, "--chunk-mib must be positive");
    ensure!(
        args.allocate_mib > args.memory_mib,
        "--allocate-mib ({}) must exceed --memory-mib ({}) to reach the limit",
        args.allocate_mib,
        args.memory_mib
    );
    let mut spec = ContainerSpec::new(
        args.image,
        vec!["python3".into(), "-c".into(), ALLOCATE_SCRIPT.into()],
    );
    spec.env = vec![
        ("CHUNK_MIB".into(), args.chunk_mib.to_string()),
        ("TARGET_MIB".into(), args.allocate_mib.to_string()),
    ];
    Ok(Scenario {
        label: "memory limit",
        name_prefix: "memory-limit",
        spec,
        host: build_host_config(memory_without_swap(memory_bytes), 0, Vec::new()),
        volume: None,
        expectation: Expectation::Failure,
    })
}

/// Executes the `memory-limit` command.
///
/// # Errors
///
/// Returns an error if the run fails or the container was not stopped by
/// the limit.
pub async fn execute(args: MemoryArgs, ctx: &ScenarioContext) -> anyhow::Result<()> {
    let result = scenario::run(ctx, scenario(args)?).await?;
    if result.status_code == 137 {
        tracing::info!("container was OOM-killed");
    }
    Ok(())
}
