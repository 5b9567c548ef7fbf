//! Controlled container execution for resource-limit scenarios.
//!
//! The crate talks to a container runtime through the
//! [`ContainerRuntime`](backend::ContainerRuntime) capability trait and
//! layers on top of it:
//!
//! - [`image`]: make sure an image is present before creating containers.
//! - [`volume`]: recreate named, capacity-bounded tmpfs volumes.
//! - [`host`]: assemble the per-run host configuration.
//! - [`engine`]: create, start, wait for, collect and always remove one container.
//! - [`demux`]: split the combined log stream into stdout and stderr.
//! - [`report`]: render results for operators.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
mod cancel;
pub mod demux;
pub mod engine;
pub mod error;
pub mod host;
pub mod image;
pub mod report;
pub mod volume;
