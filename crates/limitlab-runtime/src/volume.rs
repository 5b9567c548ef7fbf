//! Capacity-bounded scenario volumes.
//!
//! Volumes are memory-backed (`tmpfs` through the `local` driver) so the
//! size option is an actual hard bound rather than a hint.

use std::collections::BTreeMap;

use limitlab_common::constants::{MIB, SCENARIO_LABEL_KEY, SCENARIO_LABEL_VALUE, VOLUME_DRIVER};
use tokio_util::sync::CancellationToken;

use crate::backend::{ContainerRuntime, VolumeSpec};
use crate::cancel::guarded;
use crate::error::{HarnessError, Result};

/// Describes a tmpfs-backed volume of `size_bytes`, rounded down to whole MiB.
#[must_use]
pub fn tmpfs_volume_spec(name: &str, size_bytes: u64) -> VolumeSpec {
    let driver_opts = BTreeMap::from([
        ("type".to_string(), "tmpfs".to_string()),
        ("device".to_string(), "tmpfs".to_string()),
        ("o".to_string(), format!("size={}m", size_bytes / MIB)),
    ]);
    let labels = BTreeMap::from([(
        SCENARIO_LABEL_KEY.to_string(),
        SCENARIO_LABEL_VALUE.to_string(),
    )]);
    VolumeSpec {
        name: name.to_string(),
        driver: VOLUME_DRIVER.to_string(),
        driver_opts,
        labels,
    }
}

/// Removes the volume `name` if it exists, tolerating its absence.
///
/// Returns whether a volume was actually removed.
///
/// # Errors
///
/// Returns [`HarnessError::Volume`] for any removal failure other than
/// not-found, including cancellation.
pub async fn remove_volume(
    runtime: &dyn ContainerRuntime,
    name: &str,
    cancel: &CancellationToken,
) -> Result<bool> {
    match guarded(cancel, runtime.remove_volume(name, true)).await {
        Ok(()) => {
            tracing::debug!(volume = name, "volume removed");
            Ok(true)
        }
        Err(err) if err.is_not_found() => {
            tracing::debug!(volume = name, "volume absent, nothing to remove");
            Ok(false)
        }
        Err(source) => Err(HarnessError::Volume {
            operation: "remove",
            name: name.to_string(),
            source,
        }),
    }
}

/// Recreates `name` as a fresh tmpfs volume bounded to `size_bytes`.
///
/// Safe on a pristine environment: a missing volume is not an error. Not
/// atomic: two concurrent callers must not drive the same name.
///
/// # Errors
///
/// Returns [`HarnessError::Volume`] if the old volume cannot be removed for
/// a reason other than not-found, or the new one cannot be created.
pub async fn recreate_volume(
    runtime: &dyn ContainerRuntime,
    name: &str,
    size_bytes: u64,
    cancel: &CancellationToken,
) -> Result<()> {
    let _ = remove_volume(runtime, name, cancel).await?;

    let spec = tmpfs_volume_spec(name, size_bytes);
    guarded(cancel, runtime.create_volume(&spec))
        .await
        .map_err(|source| HarnessError::Volume {
            operation: "create",
            name: name.to_string(),
            source,
        })?;
    tracing::info!(
        volume = name,
        size_mib = size_bytes / MIB,
        "volume recreated"
    );
    Ok(())
}
