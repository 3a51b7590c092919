//! In-memory lease store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dynsec_core::ports::LeaseStore;
use dynsec_core::{Error, Lease, LeaseStatus, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Lease store backed by a map. Suitable for tests and single-process use.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: RwLock<HashMap<String, Lease>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.leases.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.leases.read().await.is_empty()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn insert(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.write().await;
        if leases.contains_key(&lease.entity_id) {
            return Err(Error::Store(format!(
                "lease for entity {} already exists",
                lease.entity_id
            )));
        }
        leases.insert(lease.entity_id.clone(), lease.clone());
        Ok(())
    }

    async fn get(&self, entity_id: &str) -> Result<Option<Lease>> {
        Ok(self.leases.read().await.get(entity_id).cloned())
    }

    async fn upsert(&self, lease: &Lease) -> Result<()> {
        self.leases
            .write()
            .await
            .insert(lease.entity_id.clone(), lease.clone());
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Lease>> {
        let leases = self.leases.read().await;
        let mut expired: Vec<Lease> = leases
            .values()
            .filter(|lease| lease.status == LeaseStatus::Active && lease.expire_at <= now)
            .cloned()
            .collect();
        expired.sort_by_key(|lease| lease.expire_at);
        expired.truncate(limit as usize);
        Ok(expired)
    }
}
