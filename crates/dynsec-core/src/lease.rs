//! Lease records and their state transitions.

use crate::ids::LeaseId;
use crate::provider::ProviderType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted lease status. `Pending` only exists while `create` is in flight
/// and is never written to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Pending,
    Active,
    Revoked,
    Expired,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Pending => "pending",
            LeaseStatus::Active => "active",
            LeaseStatus::Revoked => "revoked",
            LeaseStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(LeaseStatus::Pending),
            "active" => Some(LeaseStatus::Active),
            "revoked" => Some(LeaseStatus::Revoked),
            "expired" => Some(LeaseStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A generated credential's identity on the external system and its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: LeaseId,
    /// Handle of the provisioned principal on the target system.
    pub entity_id: String,
    pub provider_type: ProviderType,
    pub expire_at: DateTime<Utc>,
    pub status: LeaseStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lease {
    pub fn active(
        entity_id: impl Into<String>,
        provider_type: ProviderType,
        expire_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: LeaseId::new(),
            entity_id: entity_id.into(),
            provider_type,
            expire_at,
            status: LeaseStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record of a revocation for an entity no lease was ever stored for.
    pub fn tombstone(entity_id: impl Into<String>, provider_type: ProviderType) -> Self {
        let now = Utc::now();
        Self {
            id: LeaseId::new(),
            entity_id: entity_id.into(),
            provider_type,
            expire_at: now,
            status: LeaseStatus::Revoked,
            created_at: now,
            updated_at: now,
        }
    }

    /// Status as observed at `now`: an active lease past its expiry is expired.
    pub fn effective_status(&self, now: DateTime<Utc>) -> LeaseStatus {
        match self.status {
            LeaseStatus::Active if self.expire_at <= now => LeaseStatus::Expired,
            status => status,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == LeaseStatus::Active
    }

    pub fn extend(&mut self, expire_at: DateTime<Utc>) {
        self.expire_at = expire_at;
        self.updated_at = Utc::now();
    }

    pub fn mark_revoked(&mut self) {
        self.status = LeaseStatus::Revoked;
        self.updated_at = Utc::now();
    }
}

/// Result of a successful `create`: the lease plus the one-time credential payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub lease: Lease,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_effective_status_expires() {
        let now = Utc::now();
        let lease = Lease::active("user_1", ProviderType::Redis, now + Duration::minutes(5));
        assert_eq!(lease.effective_status(now), LeaseStatus::Active);
        assert_eq!(
            lease.effective_status(now + Duration::minutes(6)),
            LeaseStatus::Expired
        );
    }

    #[test]
    fn test_revoked_stays_revoked() {
        let now = Utc::now();
        let mut lease = Lease::active("user_1", ProviderType::Redis, now + Duration::hours(1));
        lease.mark_revoked();
        assert_eq!(lease.effective_status(now), LeaseStatus::Revoked);
        assert!(!lease.is_active_at(now));
    }

    #[test]
    fn test_status_parse() {
        for status in [
            LeaseStatus::Pending,
            LeaseStatus::Active,
            LeaseStatus::Revoked,
            LeaseStatus::Expired,
        ] {
            assert_eq!(LeaseStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LeaseStatus::parse("gone"), None);
    }
}
