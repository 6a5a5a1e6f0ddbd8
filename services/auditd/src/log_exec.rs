use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinError;

/// Run a read-only, CPU-bound closure against the log off the async workers.
/// Readers share the lock; `record` holds it exclusively.
pub async fn with_log_blocking<L, R, F>(log: Arc<RwLock<L>>, f: F) -> Result<R, JoinError>
where
    L: Send + Sync + 'static,
    R: Send + 'static,
    F: FnOnce(&L) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let guard = log.blocking_read();
        f(&*guard)
    })
    .await
}

/// Run a mutation (tree update plus snapshot file write) on the blocking pool.
/// The write guard travels with the closure and comes back, so work the caller
/// does before and after stays inside the same exclusive section.
pub async fn with_log_mut_blocking<L, R, F>(
    mut guard: OwnedRwLockWriteGuard<L>,
    f: F,
) -> Result<(OwnedRwLockWriteGuard<L>, R), JoinError>
where
    L: Send + Sync + 'static,
    R: Send + 'static,
    F: FnOnce(&mut L) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let out = f(&mut *guard);
        (guard, out)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mutation_keeps_lock_until_guard_returns() {
        let shared = Arc::new(RwLock::new(Vec::<u32>::new()));

        let guard = shared.clone().write_owned().await;
        let (guard, len) = with_log_mut_blocking(guard, |v| {
            v.push(7);
            v.len()
        })
        .await
        .unwrap();
        assert_eq!(len, 1);

        // Still exclusive after the blocking section
        assert!(shared.try_read().is_err());
        drop(guard);

        let seen = with_log_blocking(shared, |v| v.clone()).await.unwrap();
        assert_eq!(seen, vec![7]);
    }
}
