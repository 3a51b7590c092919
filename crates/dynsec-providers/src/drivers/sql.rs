use super::{StatementRunner, mismatch};
use crate::broker::ConnectionBroker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dynsec_core::credentials::{CredentialPolicy, UsernameCase};
use dynsec_core::ports::{ProviderDriver, ProvisionedEntity, Renewal, RenewedEntity, RevokedEntity};
use dynsec_core::provider::{SqlClient, SqlDatabaseInputs};
use dynsec_core::template::TemplateVars;
use dynsec_core::{ProviderConfig, ProviderType, Result};
use std::sync::Arc;

const PROVIDER: ProviderType = ProviderType::SqlDatabase;

/// Relational databases driven by administrator-authored SQL.
pub struct SqlDatabaseDriver {
    runner: StatementRunner,
}

impl SqlDatabaseDriver {
    pub fn new(broker: Arc<dyn ConnectionBroker>) -> Self {
        Self {
            runner: StatementRunner::new(broker),
        }
    }

    fn inputs(config: &ProviderConfig) -> Result<&SqlDatabaseInputs> {
        match config {
            ProviderConfig::SqlDatabase(inputs) => Ok(inputs),
            other => Err(mismatch(PROVIDER, other)),
        }
    }

    fn policy(client: SqlClient) -> CredentialPolicy {
        let policy = CredentialPolicy::new(32, 48);
        match client {
            // Oracle folds unquoted identifiers to upper case.
            SqlClient::Oracle => policy.with_case(UsernameCase::Upper),
            _ => policy,
        }
    }

    fn base_vars(inputs: &SqlDatabaseInputs) -> TemplateVars {
        TemplateVars::new().with("database", inputs.database.as_str())
    }
}

#[async_trait]
impl ProviderDriver for SqlDatabaseDriver {
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
        let material = Self::policy(inputs.client).generate();
        let mut vars = material.template_vars(expire_at);
        vars.insert("database", inputs.database.as_str());

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
            .revoke(
                config,
                &inputs.revocation_statement,
                entity_id,
                Self::base_vars(inputs),
            )
            .await
    }

    async fn renew(
        &self,
        config: &ProviderConfig,
        entity_id: &str,
        expire_at: DateTime<Utc>,
    ) -> Result<RenewedEntity> {
        let inputs = Self::inputs(config)?;
        self.runner
            .extend(
                config,
                inputs.renew_statement.as_deref(),
                entity_id,
                expire_at,
                Self::base_vars(inputs),
            )
            .await
    }

    fn renewal(&self, config: &ProviderConfig) -> Renewal {
        match config {
            ProviderConfig::SqlDatabase(inputs) if inputs.renew_statement.is_some() => {
                Renewal::Native
            }
            _ => Renewal::LogicalOnly,
        }
    }
}
