//! Lease lifecycle: create, renew, revoke and expiry reporting.

use crate::config::LifecycleConfig;
use crate::locks::LeaseLocks;
use chrono::{DateTime, Utc};
use dynsec_core::ports::{LeaseStore, Renewal};
use dynsec_core::{
    Error, Lease, LeaseGrant, LeaseStatus, ProviderConfig, ProviderType, Result, ValidationError,
};
use dynsec_providers::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drives leases through `Active → (renew) → Revoked`, one operation per entity at a time.
///
/// Provider calls run on detached tasks. A caller that is cancelled mid-call
/// leaves the operation to finish, so a provisioned principal is always
/// either recorded or reported.
#[derive(Clone)]
pub struct LeaseManager {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn LeaseStore>,
    locks: LeaseLocks,
    config: LifecycleConfig,
}

impl LeaseManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn LeaseStore>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            store,
            locks: LeaseLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Validate raw provider inputs without any I/O.
    pub fn validate_config(
        &self,
        provider: ProviderType,
        raw: &serde_json::Value,
    ) -> Result<ProviderConfig> {
        self.registry.validate(provider, raw)
    }

    /// Check that the target system accepts the configured admin credentials.
    pub async fn test_connection(&self, config: &ProviderConfig) -> Result<bool> {
        let driver = self.registry.resolve(config.provider_type())?;
        driver.validate_connection(config).await
    }

    /// Provision a principal and record its lease.
    pub async fn create_lease(
        &self,
        config: &ProviderConfig,
        ttl: Option<Duration>,
    ) -> Result<LeaseGrant> {
        let provider = config.provider_type();
        let ttl = self.resolve_ttl(ttl)?;
        let driver = self.registry.resolve(provider)?;
        let expire_at = expiry(Utc::now(), ttl)?;

        let store = self.store.clone();
        let config = config.clone();
        join(tokio::spawn(async move {
            let entity = driver
                .create(&config, expire_at)
                .await
                .map_err(|e| provisioning_error(provider, e))?;

            let lease = Lease::active(entity.entity_id.clone(), provider, expire_at);
            if let Err(e) = store.insert(&lease).await {
                warn!(
                    provider = %provider,
                    entity_id = %entity.entity_id,
                    error = %e,
                    "Provisioned principal could not be recorded"
                );
                return Err(Error::ProvisioningFailed {
                    provider,
                    entity_id: Some(entity.entity_id.clone()),
                    message: format!("lease could not be recorded: {}", e),
                });
            }

            info!(
                provider = %provider,
                entity_id = %lease.entity_id,
                lease_id = %lease.id,
                expire_at = %lease.expire_at,
                "Lease created"
            );
            Ok(LeaseGrant {
                lease,
                data: entity.data,
            })
        }))
        .await
    }

    /// Extend an active lease to `now + ttl`.
    pub async fn renew_lease(
        &self,
        config: &ProviderConfig,
        entity_id: &str,
        ttl: Option<Duration>,
    ) -> Result<Lease> {
        let provider = config.provider_type();
        let ttl = self.resolve_ttl(ttl)?;
        let driver = self.registry.resolve(provider)?;
        let guard = self.locks.acquire(entity_id).await;

        let store = self.store.clone();
        let config = config.clone();
        let settings = self.config.clone();
        let entity_id = entity_id.to_string();
        join(tokio::spawn(async move {
            let _guard = guard;
            let mut lease = store.get(&entity_id).await?.ok_or_else(|| Error::LeaseNotActive {
                entity_id: entity_id.clone(),
                status: None,
            })?;
            if lease.provider_type != provider {
                return Err(Error::ProviderMismatch {
                    expected: lease.provider_type,
                    actual: provider,
                });
            }

            let now = Utc::now();
            let status = lease.effective_status(now);
            if status != LeaseStatus::Active {
                return Err(Error::LeaseNotActive {
                    entity_id,
                    status: Some(status),
                });
            }

            if driver.renewal(&config) == Renewal::LogicalOnly && !settings.allow_logical_renewal {
                return Err(Error::RenewUnsupported(provider));
            }

            let expire_at = expiry(now, ttl)?;
            let max_expire_at = expiry(lease.created_at, settings.max_ttl())?;
            if expire_at > max_expire_at {
                return Err(ValidationError::single(
                    "ttl",
                    format!(
                        "renewal would exceed the maximum lease lifetime of {}s",
                        settings.max_ttl_secs
                    ),
                )
                .into());
            }

            match driver.renew(&config, &entity_id, expire_at).await {
                Ok(_) => {}
                // The principal is gone from the target, so the lease cannot be renewed again.
                Err(Error::LeaseNotActive { .. }) => {
                    lease.mark_revoked();
                    store.upsert(&lease).await?;
                    warn!(provider = %provider, entity_id = %entity_id, "Principal no longer exists on target, lease marked revoked");
                    return Err(Error::LeaseNotActive {
                        entity_id,
                        status: Some(LeaseStatus::Revoked),
                    });
                }
                Err(err) => return Err(err),
            }
            lease.extend(expire_at);
            store.upsert(&lease).await?;

            info!(provider = %provider, entity_id = %entity_id, expire_at = %expire_at, "Lease renewed");
            Ok(lease)
        }))
        .await
    }

    /// Remove the principal and mark its lease revoked. Idempotent.
    pub async fn revoke_lease(&self, config: &ProviderConfig, entity_id: &str) -> Result<Lease> {
        let provider = config.provider_type();
        let driver = self.registry.resolve(provider)?;
        let guard = self.locks.acquire(entity_id).await;

        let store = self.store.clone();
        let config = config.clone();
        let entity_id = entity_id.to_string();
        join(tokio::spawn(async move {
            let _guard = guard;
            let existing = store.get(&entity_id).await?;
            if let Some(lease) = &existing {
                if lease.status == LeaseStatus::Revoked {
                    debug!(provider = %provider, entity_id = %entity_id, "Lease already revoked");
                    return Ok(lease.clone());
                }
                if lease.provider_type != provider {
                    return Err(Error::ProviderMismatch {
                        expected: lease.provider_type,
                        actual: provider,
                    });
                }
            }

            driver.revoke(&config, &entity_id).await?;

            let lease = match existing {
                Some(mut lease) => {
                    lease.mark_revoked();
                    lease
                }
                None => {
                    warn!(provider = %provider, entity_id = %entity_id, "Revoked principal without a lease record");
                    Lease::tombstone(entity_id.as_str(), provider)
                }
            };
            store.upsert(&lease).await?;

            info!(provider = %provider, entity_id = %entity_id, "Lease revoked");
            Ok(lease)
        }))
        .await
    }

    /// Active leases whose expiry has passed, oldest first, for an external sweeper.
    pub async fn due_for_revocation(&self, limit: u32) -> Result<Vec<Lease>> {
        self.store.list_expired(Utc::now(), limit).await
    }

    fn resolve_ttl(&self, ttl: Option<Duration>) -> Result<Duration> {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        if ttl.is_zero() {
            return Err(ValidationError::single("ttl", "must be positive").into());
        }
        if ttl > self.config.max_ttl() {
            return Err(ValidationError::single(
                "ttl",
                format!("must not exceed {}s", self.config.max_ttl_secs),
            )
            .into());
        }
        Ok(ttl)
    }
}

fn expiry(from: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| from.checked_add_signed(ttl))
        .ok_or_else(|| ValidationError::single("ttl", "is out of range").into())
}

/// Errors the caller can act on pass through; everything else is a provisioning failure.
fn provisioning_error(provider: ProviderType, err: Error) -> Error {
    match err {
        Error::Validation(_)
        | Error::Template(_)
        | Error::ConnectionFailed { .. }
        | Error::UnsupportedProvider(_)
        | Error::ProviderMismatch { .. }
        | Error::ProvisioningFailed { .. } => err,
        other => Error::provisioning(provider, other),
    }
}

async fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle
        .await
        .map_err(|e| Error::Internal(format!("lease task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryLeaseStore;
    use async_trait::async_trait;
    use dynsec_core::ports::{ProviderDriver, ProvisionedEntity, RenewedEntity, RevokedEntity};
    use dynsec_core::provider::RedisInputs;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubDriver {
        created: AtomicUsize,
        revoked: Mutex<Vec<String>>,
        renewed: AtomicUsize,
        native: bool,
        reject_create: bool,
        principal_gone: bool,
    }

    #[async_trait]
    impl ProviderDriver for StubDriver {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Redis
        }

        async fn validate_connection(&self, _config: &ProviderConfig) -> Result<bool> {
            Ok(true)
        }

        async fn create(
            &self,
            _config: &ProviderConfig,
            _expire_at: DateTime<Utc>,
        ) -> Result<ProvisionedEntity> {
            if self.reject_create {
                return Err(Error::rejected(ProviderType::Redis, "ERR syntax error"));
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(ProvisionedEntity {
                entity_id: format!("user_{}", n),
                data: serde_json::json!({ "DB_USERNAME": format!("user_{}", n) }),
            })
        }

        async fn revoke(&self, _config: &ProviderConfig, entity_id: &str) -> Result<RevokedEntity> {
            self.revoked.lock().unwrap().push(entity_id.to_string());
            Ok(RevokedEntity {
                entity_id: entity_id.to_string(),
            })
        }

        async fn renew(
            &self,
            _config: &ProviderConfig,
            entity_id: &str,
            _expire_at: DateTime<Utc>,
        ) -> Result<RenewedEntity> {
            self.renewed.fetch_add(1, Ordering::SeqCst);
            if self.principal_gone {
                return Err(Error::LeaseNotActive {
                    entity_id: entity_id.to_string(),
                    status: None,
                });
            }
            Ok(RenewedEntity {
                entity_id: entity_id.to_string(),
            })
        }

        fn renewal(&self, _config: &ProviderConfig) -> Renewal {
            if self.native {
                Renewal::Native
            } else {
                Renewal::LogicalOnly
            }
        }
    }

    fn redis_config() -> ProviderConfig {
        ProviderConfig::Redis(RedisInputs {
            host: "redis.internal".to_string(),
            port: 6379,
            username: "default".to_string(),
            password: None,
            creation_statement: "ACL SETUSER {{username}} on >{{password}}".to_string(),
            revocation_statement: "ACL DELUSER {{username}}".to_string(),
            renew_statement: None,
            ca: None,
        })
    }

    fn manager(driver: Arc<StubDriver>, config: LifecycleConfig) -> LeaseManager {
        let registry = ProviderRegistry::builder().register_arc(driver).build();
        LeaseManager::new(
            Arc::new(registry),
            Arc::new(InMemoryLeaseStore::new()),
            config,
        )
    }

    #[tokio::test]
    async fn test_create_uses_default_ttl() {
        let manager = manager(Arc::new(StubDriver::default()), LifecycleConfig::default());
        let before = Utc::now();
        let grant = manager.create_lease(&redis_config(), None).await.unwrap();

        assert_eq!(grant.lease.status, LeaseStatus::Active);
        assert_eq!(grant.lease.entity_id, "user_0");
        let ttl = grant.lease.expire_at - before;
        assert!(ttl >= chrono::Duration::seconds(3599) && ttl <= chrono::Duration::seconds(3601));
    }

    #[tokio::test]
    async fn test_ttl_bounds() {
        let manager = manager(Arc::new(StubDriver::default()), LifecycleConfig::default());
        for ttl in [Duration::ZERO, Duration::from_secs(86401)] {
            let err = manager
                .create_lease(&redis_config(), Some(ttl))
                .await
                .unwrap_err();
            match err {
                Error::Validation(v) => assert!(v.mentions("ttl")),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_rejected_create_is_provisioning_failure() {
        let driver = Arc::new(StubDriver {
            reject_create: true,
            ..Default::default()
        });
        let manager = manager(driver, LifecycleConfig::default());
        let err = manager.create_lease(&redis_config(), None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProvisioningFailed {
                entity_id: None,
                ..
            }
        ));
        assert!(manager.due_for_revocation(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let driver = Arc::new(StubDriver::default());
        let manager = manager(driver.clone(), LifecycleConfig::default());
        let grant = manager.create_lease(&redis_config(), None).await.unwrap();

        let first = manager
            .revoke_lease(&redis_config(), &grant.lease.entity_id)
            .await
            .unwrap();
        let second = manager
            .revoke_lease(&redis_config(), &grant.lease.entity_id)
            .await
            .unwrap();

        assert_eq!(first.status, LeaseStatus::Revoked);
        assert_eq!(second.status, LeaseStatus::Revoked);
        assert_eq!(driver.revoked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoke_unknown_entity_writes_tombstone() {
        let driver = Arc::new(StubDriver::default());
        let manager = manager(driver.clone(), LifecycleConfig::default());
        let lease = manager.revoke_lease(&redis_config(), "ghost").await.unwrap();
        assert_eq!(lease.status, LeaseStatus::Revoked);

        let err = manager
            .renew_lease(&redis_config(), "ghost", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::LeaseNotActive {
                status: Some(LeaseStatus::Revoked),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_logical_renewal_policy() {
        let driver = Arc::new(StubDriver::default());
        let strict = manager(
            driver.clone(),
            LifecycleConfig::default().with_logical_renewal(false),
        );
        let grant = strict.create_lease(&redis_config(), None).await.unwrap();
        let err = strict
            .renew_lease(&redis_config(), &grant.lease.entity_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RenewUnsupported(ProviderType::Redis)));
        assert_eq!(driver.renewed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_renew_respects_max_lifetime() {
        let driver = Arc::new(StubDriver {
            native: true,
            ..Default::default()
        });
        let config = LifecycleConfig::default()
            .with_default_ttl(Duration::from_secs(60))
            .with_max_ttl(Duration::from_secs(120));
        let manager = manager(driver.clone(), config);
        let grant = manager.create_lease(&redis_config(), None).await.unwrap();

        let renewed = manager
            .renew_lease(&redis_config(), &grant.lease.entity_id, Some(Duration::from_secs(90)))
            .await
            .unwrap();
        assert!(renewed.expire_at > grant.lease.expire_at);
        assert_eq!(driver.renewed.load(Ordering::SeqCst), 1);

        let err = manager
            .renew_lease(&redis_config(), &grant.lease.entity_id, Some(Duration::from_secs(120)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_renew_of_vanished_principal_revokes_lease() {
        let driver = Arc::new(StubDriver {
            native: true,
            principal_gone: true,
            ..Default::default()
        });
        let manager = manager(driver.clone(), LifecycleConfig::default());
        let grant = manager.create_lease(&redis_config(), None).await.unwrap();
        let entity_id = grant.lease.entity_id.clone();

        let err = manager
            .renew_lease(&redis_config(), &entity_id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::LeaseNotActive {
                status: Some(LeaseStatus::Revoked),
                ..
            }
        ));

        // Later renewals stop at the stored status without calling the driver.
        let err = manager
            .renew_lease(&redis_config(), &entity_id, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::LeaseNotActive {
                status: Some(LeaseStatus::Revoked),
                ..
            }
        ));
        assert_eq!(driver.renewed.load(Ordering::SeqCst), 1);
    }
}
