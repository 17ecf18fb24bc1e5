//! Bounded blocking IO against the process inspector.

use std::sync::Arc;
use std::time::Duration;

use goalbridge_core::SyncError;
use goalbridge_process::ProcessInspector;

/// Run `f` on the blocking pool and give up after `timeout`.
///
/// A stalled process surfaces as a `MemoryReadFault`, never as a hang. The
/// blocking call itself may outlive the timeout; its result is discarded.
pub async fn run_blocking<I, T, F>(inspector: &Arc<I>, timeout: Duration, f: F) -> Result<T, SyncError>
where
    I: ProcessInspector + 'static,
    T: Send + 'static,
    F: FnOnce(&I) -> Result<T, SyncError> + Send + 'static,
{
    let inspector = Arc::clone(inspector);
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || f(&inspector))).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(SyncError::MemoryReadFault {
            address: 0,
            detail: format!("inspector task failed: {e}"),
        }),
        Err(_) => Err(SyncError::MemoryReadFault {
            address: 0,
            detail: format!("process did not answer within {timeout:?}"),
        }),
    }
}
