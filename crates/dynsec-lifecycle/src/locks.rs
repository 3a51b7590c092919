//! Keyed async mutual exclusion for lease operations.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per entity id, created on demand and dropped once unused.
#[derive(Clone, Default)]
pub struct LeaseLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl LeaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `entity_id`.
    pub async fn acquire(&self, entity_id: &str) -> LeaseGuard {
        let mutex = self
            .locks
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        LeaseGuard {
            locks: self.locks.clone(),
            entity_id: entity_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of entity ids with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held for the duration of one lease operation. Released on drop.
pub struct LeaseGuard {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    entity_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl LeaseGuard {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // The map holds one reference; anything above that is a waiter or holder.
        self.locks
            .remove_if(&self.entity_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serialized() {
        let locks = LeaseLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("user_a").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_independent() {
        let locks = LeaseLocks::new();
        let _a = locks.acquire("user_a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("user_b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_entry_removed_after_release() {
        let locks = LeaseLocks::new();
        {
            let guard = locks.acquire("user_a").await;
            assert_eq!(guard.entity_id(), "user_a");
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}
