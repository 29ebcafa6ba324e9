use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Runs one external call under the configured deadline. The stage name ends
/// up in the error so failures always identify the failing step.
pub async fn with_timeout<T, F>(
    stage: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            stage,
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Checked before each external call: once cancellation is observed no
/// further calls are issued. Calls already in flight complete on their own.
pub fn ensure_active(cancel: &CancellationToken, stage: &'static str) -> Result<(), AppError> {
    if cancel.is_cancelled() {
        return Err(AppError::Cancelled { stage });
    }
    Ok(())
}
