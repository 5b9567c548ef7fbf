//! Racing runtime calls against the caller's cancellation token.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;

/// Runs `fut` unless `cancel` fires first, in which case the future is
/// dropped and [`RuntimeError::Cancelled`] returned. An already cancelled
/// token always wins.
pub(crate) async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(RuntimeError::Cancelled),
        res = fut => res,
    }
}
