//! Scenario drivers end to end against the in-memory runtime.
//!
//! The fake "kernel" below enforces limits the way the real one would for
//! the scripts the drivers ship: writes beyond a volume's capacity fail,
//! allocations beyond the memory limit get the process killed.

use std::sync::Arc;

use clap::Parser;
use limitlab_common::config::HarnessConfig;
use limitlab_common::constants::MIB;
use limitlab_common::types::MountKind;
use limitlab_runtime::backend::ContainerRuntime;
use limitlab_runtime::backend::fake::{FailurePoint, FakeExit, FakeInvocation, FakeRuntime};

use super::{Cli, dispatch};
use crate::scenario::ScenarioContext;

fn env_mib(inv: &FakeInvocation<'_>, key: &str) -> u64 {
    inv.spec
        .env
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

fn volume_capacity(inv: &FakeInvocation<'_>) -> Option<u64> {
    let mount = inv
        .host
        .mounts
        .iter()
        .find(|m| m.kind == MountKind::Volume)?;
    inv.volumes.get(&mount.source)?.capacity_bytes()
}

fn simulated_kernel(inv: &FakeInvocation<'_>) -> FakeExit {
    let limit_exceeded = |wanted: u64, limit: u64| wanted > limit;
    if inv.name.starts_with("volume-fill") {
        let Some(capacity) = volume_capacity(inv) else {
            return FakeExit::code(1).with_stderr("no volume mounted");
        };
        let chunk = env_mib(inv, "CHUNK_MIB") * MIB;
        let written = capacity / chunk * chunk;
        FakeExit::code(42)
            .with_stdout(format!("written={}MiB", written / MIB))
            .with_stderr("write failed: volume is full")
    } else if inv.name.starts_with("volume-expand") {
        let capacity = volume_capacity(inv).unwrap_or(0);
        let write = env_mib(inv, "WRITE_MIB") * MIB;
        if limit_exceeded(write, capacity) {
            FakeExit::code(1).with_stderr("dd: No space left on device")
        } else {
            FakeExit::code(0).with_stdout(format!("wrote {} MiB, volume still usable", write / MIB))
        }
    } else if inv.name.starts_with("memory-limit") {
        let limit = inv.host.resources.memory_bytes.map_or(u64::MAX, i64::unsigned_abs);
        if limit_exceeded(env_mib(inv, "TARGET_MIB") * MIB, limit) {
            FakeExit::code(137).with_stdout("allocated 56 MiB")
        } else {
            FakeExit::code(0)
        }
    } else if inv.name.starts_with("rootfs-limit") {
        if limit_exceeded(env_mib(inv, "WRITE_MIB") * MIB, inv.host.root_fs_limit_bytes) {
            FakeExit::code(1).with_stderr("dd: error writing '/tmp/rootfs-fill': No space left on device")
        } else {
            FakeExit::code(0)
        }
    } else {
        FakeExit::code(0).with_stdout("cpu.max: 100000 100000")
    }
}

fn kernel() -> Arc<FakeRuntime> {
    Arc::new(FakeRuntime::new().with_behavior(simulated_kernel))
}

fn context(rt: &Arc<FakeRuntime>) -> ScenarioContext {
    ScenarioContext::new(
        Arc::clone(rt) as Arc<dyn ContainerRuntime>,
        &HarnessConfig::default(),
        false,
    )
}

async fn limitlab(rt: &Arc<FakeRuntime>, args: &[&str]) -> anyhow::Result<()> {
    let cli = Cli::try_parse_from(std::iter::once("limitlab").chain(args.iter().copied()))
        .expect("arguments should parse");
    dispatch(cli.command, &context(rt)).await
}

// ── Volume scenarios ─────────────────────────────────────────────────

#[tokio::test]
async fn volume_fill_hits_capacity() {
    let rt = kernel();
    limitlab(&rt, &["volume-fill"])
        .await
        .expect("fill should stop at the capacity bound");

    let volume = rt.volume("volume-limit-demo").expect("volume should exist");
    assert_eq!(volume.capacity_bytes(), Some(32 * MIB));
    assert_eq!(rt.pulled_images(), vec!["docker.io/library/python:3.12-alpine"]);

    let created = rt.created_containers();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].host.mounts[0].target, "/demo-data");
    assert_eq!(created[0].host.root_fs_limit_bytes, 512 * MIB);
    assert!(rt.live_containers().is_empty());
}

#[tokio::test]
async fn volume_expand_after_fill_succeeds() {
    let rt = kernel();
    limitlab(&rt, &["volume-fill"]).await.expect("fill should pass");
    limitlab(&rt, &["volume-expand"])
        .await
        .expect("64 MiB should fit in the expanded volume");

    let volume = rt.volume("volume-limit-demo").expect("volume should exist");
    assert_eq!(volume.capacity_bytes(), Some(96 * MIB));
    assert_eq!(rt.removed_containers().len(), 2);
}

#[tokio::test]
async fn expand_into_small_volume_fails() {
    let rt = kernel();
    let err = limitlab(&rt, &["volume-expand", "--size-mib", "32"])
        .await
        .expect_err("64 MiB should not fit in 32 MiB");
    assert!(format!("{err:#}").contains("unexpected outcome"));
    assert!(rt.live_containers().is_empty());
}

#[tokio::test]
async fn fill_that_never_fails_is_an_error() {
    let rt = Arc::new(FakeRuntime::new().with_exit(FakeExit::code(0)));
    let err = limitlab(&rt, &["volume-fill"])
        .await
        .expect_err("a zero exit means the bound was never hit");
    assert!(format!("{err:#}").contains("exited with 0"));
}

#[tokio::test]
async fn remove_after_drops_the_volume() {
    let rt = kernel();
    limitlab(&rt, &["volume-fill", "--remove-after", "--volume", "scratch"])
        .await
        .expect("fill should pass");
    assert!(rt.volume("scratch").is_none());
}

#[tokio::test]
async fn volume_creation_failure_stops_before_any_container() {
    let rt = Arc::new(
        FakeRuntime::new()
            .with_behavior(simulated_kernel)
            .fail_at(FailurePoint::VolumeCreate),
    );
    let err = limitlab(&rt, &["volume-fill"]).await.expect_err("volume creation should fail");
    assert!(format!("{err:#}").contains("preparing volume"));
    assert!(rt.created_containers().is_empty());
}

// ── Resource scenarios ───────────────────────────────────────────────

#[tokio::test]
async fn memory_limit_ends_in_oom_kill() {
    let rt = kernel();
    limitlab(&rt, &["memory-limit"]).await.expect("allocation should be killed");

    let host = &rt.created_containers()[0].host;
    assert_eq!(host.resources.memory_bytes, Some(64 * 1024 * 1024));
    assert_eq!(host.resources.memory_swap_bytes, Some(64 * 1024 * 1024));
}

#[tokio::test]
async fn rootfs_limit_refuses_the_write() {
    let rt = kernel();
    limitlab(&rt, &["rootfs-limit"]).await.expect("write should be refused");
    assert_eq!(rt.pulled_images(), vec!["docker.io/library/alpine:3.20"]);
    assert_eq!(rt.created_containers()[0].host.root_fs_limit_bytes, 128 * MIB);
}

#[tokio::test]
async fn cpu_limit_runs_to_completion() {
    let rt = kernel();
    limitlab(&rt, &["cpu-limit", "--cpus", "0.5"]).await.expect("cpu scenario should pass");
    let host = &rt.created_containers()[0].host;
    assert_eq!(host.resources.nano_cpus, Some(500_000_000));
}

// ── Failure handling ─────────────────────────────────────────────────

#[tokio::test]
async fn pull_failure_is_reported_with_context() {
    let rt = Arc::new(FakeRuntime::new().fail_at(FailurePoint::Pull));
    let err = limitlab(&rt, &["cpu-limit"]).await.expect_err("pull should fail");
    assert!(format!("{err:#}").contains("preparing image"));
    assert!(rt.created_containers().is_empty());
}

#[tokio::test]
async fn cancelled_scenario_leaves_no_container() {
    let rt = Arc::new(FakeRuntime::new().hanging_wait());
    let ctx = context(&rt);
    let cancel = ctx.cancel_token().clone();
    let _trigger = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let cli = Cli::try_parse_from(["limitlab", "cpu-limit"]).expect("arguments should parse");
    let err = dispatch(cli.command, &ctx).await.expect_err("run should be cancelled");
    assert!(format!("{err:#}").contains("cancelled"));
    assert!(rt.live_containers().is_empty());
}

#[tokio::test]
async fn cancelled_scenario_still_removes_its_volume() {
    let rt = Arc::new(FakeRuntime::new().hanging_wait());
    let ctx = context(&rt);
    let cancel = ctx.cancel_token().clone();
    let _trigger = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let cli = Cli::try_parse_from(["limitlab", "volume-fill", "--remove-after", "--volume", "scratch"])
        .expect("arguments should parse");
    let err = dispatch(cli.command, &ctx).await.expect_err("run should be cancelled");
    assert!(format!("{err:#}").contains("cancelled"));
    assert!(rt.live_containers().is_empty());
    assert!(rt.volume("scratch").is_none(), "volume should be removed after cancellation");
}

// ── Argument ranges ──────────────────────────────────────────────────

#[tokio::test]
async fn oversized_mib_flags_are_rejected_before_any_runtime_call() {
    let rt = kernel();
    let max = u64::MAX.to_string();
    for args in [
        ["volume-fill", "--size-mib", max.as_str()],
        ["volume-expand", "--size-mib", max.as_str()],
        ["rootfs-limit", "--rootfs-mib", max.as_str()],
        ["memory-limit", "--memory-mib", max.as_str()],
        ["cpu-limit", "--memory-mib", max.as_str()],
    ] {
        let err = limitlab(&rt, &args).await.expect_err("size should overflow");
        assert!(format!("{err:#}").contains("too large"), "{args:?}: {err:#}");
    }
    assert!(rt.pulled_images().is_empty());
    assert!(rt.created_containers().is_empty());
}
