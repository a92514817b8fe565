//! Running blocking ledger store calls from async code.

use sovledger_core::ledger::{LedgerStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Run a read on the blocking pool, bounded by `timeout`.
pub(crate) async fn read<T, F>(
    store: &Arc<dyn LedgerStore>,
    timeout: Duration,
    op: F,
) -> Result<T, StoreError>
where
    F: FnOnce(&dyn LedgerStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    let task = tokio::task::spawn_blocking(move || op(store.as_ref()));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(StoreError::Interrupted(join.to_string())),
        Err(_) => Err(StoreError::Timeout),
    }
}

/// Run a write on the blocking pool and wait for it to finish.
///
/// Writes carry their own deadline. Once started, the transaction either
/// commits or rolls back even if the caller stops waiting.
pub(crate) async fn write<T, F>(store: &Arc<dyn LedgerStore>, op: F) -> Result<T, StoreError>
where
    F: FnOnce(&dyn LedgerStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|join| StoreError::Interrupted(join.to_string()))?
}
