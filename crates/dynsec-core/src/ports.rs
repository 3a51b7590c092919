//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the lease lifecycle and the
//! provider drivers on one side and lease persistence on the other.

use crate::lease::Lease;
use crate::provider::{ProviderConfig, ProviderType};
use crate::{Result, schema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A principal provisioned on the external system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedEntity {
    pub entity_id: String,
    /// One-time payload for the caller, may contain the generated secret.
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedEntity {
    pub entity_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewedEntity {
    pub entity_id: String,
}

/// How a provider extends a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// The target system enforces the new expiry itself.
    Native,
    /// Only the recorded `expire_at` moves; the principal has no expiry on the target.
    LogicalOnly,
}

/// Lifecycle contract implemented once per provider type.
#[async_trait]
pub trait ProviderDriver: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Structural validation plus provider-specific cross-field checks. No I/O.
    fn validate_provider_inputs(&self, raw: &serde_json::Value) -> Result<ProviderConfig> {
        Ok(schema::validate(self.provider_type(), raw)?)
    }

    /// Lightweight connect/auth handshake without provisioning anything.
    async fn validate_connection(&self, config: &ProviderConfig) -> Result<bool>;

    /// Provision a new principal that expires at `expire_at`.
    async fn create(
        &self,
        config: &ProviderConfig,
        expire_at: DateTime<Utc>,
    ) -> Result<ProvisionedEntity>;

    /// Remove the principal. An already-absent principal is a success.
    async fn revoke(&self, config: &ProviderConfig, entity_id: &str) -> Result<RevokedEntity>;

    /// Extend the principal's lifetime on the target when it supports expiry.
    async fn renew(
        &self,
        config: &ProviderConfig,
        entity_id: &str,
        expire_at: DateTime<Utc>,
    ) -> Result<RenewedEntity>;

    fn renewal(&self, config: &ProviderConfig) -> Renewal;
}

/// Durable storage for lease records, owned by the platform.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Store a new lease. Fails if a lease for the entity already exists.
    async fn insert(&self, lease: &Lease) -> Result<()>;

    /// Get the lease for an entity.
    async fn get(&self, entity_id: &str) -> Result<Option<Lease>>;

    /// Insert or replace the lease for an entity.
    async fn upsert(&self, lease: &Lease) -> Result<()>;

    /// Active leases whose expiry is at or before `now`, oldest first.
    async fn list_expired(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Lease>>;
}
