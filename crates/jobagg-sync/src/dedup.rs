use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use jobagg_storage::{JobStore, StoreError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-external-id mutual exclusion plus existence checks against the store.
///
/// The lock table lives for the whole process so a posting revisited by a
/// later run or another portal is still serialized. Entries are never
/// evicted.
pub struct DedupGate {
    store: Arc<dyn JobStore>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Waits for the lock on `external_id`; released when the guard drops.
    pub async fn acquire(&self, external_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(external_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    pub fn tracked_keys(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub async fn exists_by_external_id(&self, external_id: &str) -> Result<bool, StoreError> {
        self.store.exists_by_external_id(external_id).await
    }

    pub async fn exists_by_hash(&self, content_hash: &str) -> Result<bool, StoreError> {
        self.store.exists_by_hash(content_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobagg_storage::MemoryJobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_serialized() {
        let gate = Arc::new(DedupGate::new(Arc::new(MemoryJobStore::new())));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                tokio::spawn(async move {
                    let _guard = gate.acquire("job-1").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(gate.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let gate = DedupGate::new(Arc::new(MemoryJobStore::new()));
        let _a = gate.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), gate.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(gate.tracked_keys(), 2);
    }

    #[tokio::test]
    async fn guard_drop_releases_lock() {
        let gate = DedupGate::new(Arc::new(MemoryJobStore::new()));
        drop(gate.acquire("a").await);
        let again = tokio::time::timeout(Duration::from_millis(100), gate.acquire("a")).await;
        assert!(again.is_ok());
    }
}
