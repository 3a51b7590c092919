use super::{StatementRunner, mismatch};
use crate::broker::ConnectionBroker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dynsec_core::credentials::{CredentialPolicy, UsernameCase};
use dynsec_core::ports::{ProviderDriver, ProvisionedEntity, Renewal, RenewedEntity, RevokedEntity};
use dynsec_core::provider::CassandraInputs;
use dynsec_core::template::TemplateVars;
use dynsec_core::{ProviderConfig, ProviderType, Result};
use std::sync::Arc;

const PROVIDER: ProviderType = ProviderType::Cassandra;

// CQL folds unquoted role names to lower case.
const POLICY: CredentialPolicy = CredentialPolicy::new(32, 48).with_case(UsernameCase::Lower);

pub struct CassandraDriver {
    runner: StatementRunner,
}

impl CassandraDriver {
    pub fn new(broker: Arc<dyn ConnectionBroker>) -> Self {
        Self {
            runner: StatementRunner::new(broker),
        }
    }

    fn inputs(config: &ProviderConfig) -> Result<&CassandraInputs> {
        match config {
            ProviderConfig::Cassandra(inputs) => Ok(inputs),
            other => Err(mismatch(PROVIDER, other)),
        }
    }

    fn extra_vars(inputs: &CassandraInputs, mut vars: TemplateVars) -> TemplateVars {
        if let Some(keyspace) = &inputs.keyspace {
            vars.insert("keyspace", keyspace.as_str());
        }
        vars
    }
}

#[async_trait]
impl ProviderDriver for CassandraDriver {
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
        let vars = Self::extra_vars(inputs, material.template_vars(expire_at));
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
        let vars = Self::extra_vars(inputs, TemplateVars::new());
        self.runner
            .revoke(config, &inputs.revocation_statement, entity_id, vars)
            .await
    }

    async fn renew(
        &self,
        config: &ProviderConfig,
        entity_id: &str,
        expire_at: DateTime<Utc>,
    ) -> Result<RenewedEntity> {
        let inputs = Self::inputs(config)?;
        let vars = Self::extra_vars(inputs, TemplateVars::new());
        self.runner
            .extend(
                config,
                inputs.renew_statement.as_deref(),
                entity_id,
                expire_at,
                vars,
            )
            .await
    }

    fn renewal(&self, config: &ProviderConfig) -> Renewal {
        match config {
            ProviderConfig::Cassandra(inputs) if inputs.renew_statement.is_some() => {
                Renewal::Native
            }
            _ => Renewal::LogicalOnly,
        }
    }
}
