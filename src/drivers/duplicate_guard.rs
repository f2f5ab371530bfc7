//! Short-lived suppression of duplicate scheduling.
//!
//! Some shop events fire several times for one user action (a product saved
//! twice in the same request). The guard lets the first one through and
//! drops the others until the window expires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::store::TransientLockStore;

#[async_trait]
pub trait DuplicateGuard: Send + Sync {
    /// Take the lock for `key`. Returns false while a previous lock on the
    /// same key is still live.
    async fn try_acquire(&self, key: &str) -> Result<bool>;

    /// Drop every lock (for testing or manual override).
    async fn reset(&self) -> Result<()>;
}

/// TTL lock keyed by entity, kept in the sync store so separate processes
/// scheduling the same entity see each other.
pub struct TransientLock {
    store: Arc<dyn TransientLockStore>,
    window: Duration,
}

impl TransientLock {
    pub fn new(store: Arc<dyn TransientLockStore>, window: Duration) -> Self {
        Self { store, window }
    }
}

#[async_trait]
impl DuplicateGuard for TransientLock {
    async fn try_acquire(&self, key: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp_millis();
        let expires_at = now + self.window.as_millis() as i64;
        self.store.try_lock(key, now, expires_at)
    }

    async fn reset(&self) -> Result<()> {
        self.store.clear_locks()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteSyncStore;

    fn guard(window: Duration) -> TransientLock {
        TransientLock::new(Arc::new(SqliteSyncStore::in_memory().unwrap()), window)
    }

    #[tokio::test]
    async fn test_second_acquire_within_window_is_refused() {
        let guard = guard(Duration::from_secs(3));

        assert!(guard.try_acquire("product:1").await.unwrap());
        assert!(!guard.try_acquire("product:1").await.unwrap());
        // Other keys are independent
        assert!(guard.try_acquire("product:2").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_expires_after_window() {
        let guard = guard(Duration::from_millis(20));

        assert!(guard.try_acquire("product:1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(guard.try_acquire("product:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_zero_window_never_suppresses() {
        let guard = guard(Duration::ZERO);

        assert!(guard.try_acquire("product:1").await.unwrap());
        assert!(guard.try_acquire("product:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_guards_on_one_store_share_locks() {
        let store = Arc::new(SqliteSyncStore::in_memory().unwrap());
        let first = TransientLock::new(store.clone(), Duration::from_secs(3));
        let second = TransientLock::new(store, Duration::from_secs(3));

        assert!(first.try_acquire("product:1").await.unwrap());
        assert!(!second.try_acquire("product:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_clears_locks() {
        let guard = guard(Duration::from_secs(60));
        assert!(guard.try_acquire("product:1").await.unwrap());

        guard.reset().await.unwrap();

        assert!(guard.try_acquire("product:1").await.unwrap());
    }
}
