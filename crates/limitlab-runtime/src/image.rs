//! Making sure an image is available locally.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::backend::ContainerRuntime;
use crate::cancel::guarded;
use crate::error::{HarnessError, Result, RuntimeError};

/// Pulls `reference` and drains the progress stream before returning, so a
/// following container creation never races an unfinished pull.
///
/// A single attempt; retrying is up to the caller.
///
/// # Errors
///
/// Returns [`HarnessError::Pull`] if the pull is rejected, the progress
/// stream fails, or `cancel` fires first.
pub async fn ensure_image(
    runtime: &dyn ContainerRuntime,
    reference: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::info!(image = reference, "pulling image");
    let pull = async {
        let mut progress = runtime.pull_image(reference).await?;
        let mut messages = 0_usize;
        while let Some(item) = progress.next().await {
            let item = item?;
            messages += 1;
            if let Some(status) = item.status {
                tracing::debug!(image = reference, layer = ?item.id, %status, "pull progress");
            }
        }
        Ok::<_, RuntimeError>(messages)
    };
    let messages = guarded(cancel, pull).await.map_err(|source| HarnessError::Pull {
        reference: reference.to_string(),
        source,
    })?;
    tracing::info!(image = reference, messages, "image ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FailurePoint, FakeRuntime};

    #[tokio::test]
    async fn pull_drains_stream() {
        let rt = FakeRuntime::new();
        ensure_image(&rt, "alpine:3.20", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rt.pulled_images(), vec!["alpine:3.20"]);
    }

    #[tokio::test]
    async fn rejected_pull_is_pull_error() {
        let rt = FakeRuntime::new().fail_at(FailurePoint::Pull);
        let err = ensure_image(&rt, "nope:latest", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Pull { ref reference, .. } if reference == "nope:latest"));
    }

    #[tokio::test]
    async fn broken_progress_stream_is_pull_error() {
        let rt = FakeRuntime::new().fail_at(FailurePoint::PullStream);
        let err = ensure_image(&rt, "alpine", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Pull { .. }));
        assert!(rt.pulled_images().is_empty());
    }

    #[tokio::test]
    async fn cancelled_pull_reports_cancellation() {
        let rt = FakeRuntime::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = ensure_image(&rt, "alpine", &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
