//! PostgreSQL implementation of LeaseStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dynsec_core::ports::LeaseStore;
use dynsec_core::{Error, Lease, LeaseId, LeaseStatus, ProviderType, Result};
use sqlx::{PgPool, Row};
use tracing::debug;

const COLUMNS: &str = "id, entity_id, provider_type, status, expire_at, created_at, updated_at";

pub struct PgLeaseStore {
    pool: PgPool,
}

impl PgLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_lease(r: &sqlx::postgres::PgRow) -> Result<Lease> {
        let provider: String = r.get("provider_type");
        let status: String = r.get("status");
        Ok(Lease {
            id: LeaseId::from_uuid(r.get::<uuid::Uuid, _>("id")),
            entity_id: r.get("entity_id"),
            provider_type: provider.parse::<ProviderType>()?,
            status: LeaseStatus::parse(&status)
                .ok_or_else(|| Error::Serialization(format!("unknown lease status: {}", status)))?,
            expire_at: r.get("expire_at"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        })
    }
}

#[async_trait]
impl LeaseStore for PgLeaseStore {
    async fn insert(&self, lease: &Lease) -> Result<()> {
        sqlx::query("INSERT INTO dynamic_secret_leases (id, entity_id, provider_type, status, expire_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)")
            .bind(lease.id.as_uuid())
            .bind(&lease.entity_id)
            .bind(lease.provider_type.as_str())
            .bind(lease.status.as_str())
            .bind(lease.expire_at)
            .bind(lease.created_at)
            .bind(lease.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        debug!(entity_id = %lease.entity_id, lease_id = %lease.id, "Lease inserted");
        Ok(())
    }

    async fn get(&self, entity_id: &str) -> Result<Option<Lease>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM dynamic_secret_leases WHERE entity_id = $1",
            COLUMNS
        ))
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        match row {
            Some(r) => Ok(Some(Self::row_to_lease(&r)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, lease: &Lease) -> Result<()> {
        sqlx::query("INSERT INTO dynamic_secret_leases (id, entity_id, provider_type, status, expire_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (entity_id) DO UPDATE SET status = EXCLUDED.status, expire_at = EXCLUDED.expire_at, updated_at = EXCLUDED.updated_at")
            .bind(lease.id.as_uuid())
            .bind(&lease.entity_id)
            .bind(lease.provider_type.as_str())
            .bind(lease.status.as_str())
            .bind(lease.expire_at)
            .bind(lease.created_at)
            .bind(lease.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        debug!(entity_id = %lease.entity_id, status = lease.status.as_str(), "Lease stored");
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Lease>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM dynamic_secret_leases WHERE status = $1 AND expire_at <= $2 ORDER BY expire_at ASC LIMIT $3",
            COLUMNS
        ))
        .bind(LeaseStatus::Active.as_str())
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Store(e.to_string()))?;
        debug!(count = rows.len(), "Listed expired leases");
        rows.iter().map(Self::row_to_lease).collect()
    }
}
