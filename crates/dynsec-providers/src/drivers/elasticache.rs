use super::{StatementRunner, mismatch};
use crate::broker::ConnectionBroker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dynsec_core::credentials::{CredentialPolicy, UsernameCase};
use dynsec_core::ports::{ProviderDriver, ProvisionedEntity, Renewal, RenewedEntity, RevokedEntity};
use dynsec_core::provider::AwsElastiCacheInputs;
use dynsec_core::template::TemplateVars;
use dynsec_core::{ProviderConfig, ProviderType, Result};
use std::sync::Arc;

const PROVIDER: ProviderType = ProviderType::AwsElastiCache;

// ElastiCache user ids are lower-case.
const POLICY: CredentialPolicy = CredentialPolicy::new(32, 48).with_case(UsernameCase::Lower);

/// ElastiCache RBAC users. Principals carry no expiry of their own.
pub struct ElastiCacheDriver {
    runner: StatementRunner,
}

impl ElastiCacheDriver {
    pub fn new(broker: Arc<dyn ConnectionBroker>) -> Self {
        Self {
            runner: StatementRunner::new(broker),
        }
    }

    fn inputs(config: &ProviderConfig) -> Result<&AwsElastiCacheInputs> {
        match config {
            ProviderConfig::AwsElastiCache(inputs) => Ok(inputs),
            other => Err(mismatch(PROVIDER, other)),
        }
    }
}

#[async_trait]
impl ProviderDriver for ElastiCacheDriver {
    fn provider_type(&self) -> ProviderType {
        PROVIDER
    }

    async fn validate_connection(&self, config: &ProviderConfig) -> Result<bool> {
        Self::inputs(config)?;
        self.runner.ping(config).await
    }

    async fn create(
        &self,
        config: &ProviderConfig,
        expire_at: DateTime<Utc>,
    ) -> Result<ProvisionedEntity> {
        let inputs = Self::inputs(config)?;
        let material = POLICY.generate();
        let vars = material.template_vars(expire_at);
        self.runner
            .provision(
                config,
                &inputs.creation_statement,
                &inputs.revocation_statement,
                &material,
                vars,
            )
            .await
    }

    async fn revoke(&self, config: &ProviderConfig, entity_id: &str) -> Result<RevokedEntity> {
        let inputs = Self::inputs(config)?;
        self.runner
            .revoke(config, &inputs.revocation_statement, entity_id, TemplateVars::new())
            .await
    }

    async fn renew(
        &self,
        config: &ProviderConfig,
        entity_id: &str,
        expire_at: DateTime<Utc>,
    ) -> Result<RenewedEntity> {
        Self::inputs(config)?;
        self.runner
            .extend(config, None, entity_id, expire_at, TemplateVars::new())
            .await
    }

    fn renewal(&self, _config: &ProviderConfig) -> Renewal {
        Renewal::LogicalOnly
    }
}
