//! One `ProviderDriver` per provider type.

mod aws_iam;
mod cassandra;
mod elasticache;
mod elasticsearch;
mod mongo_atlas;
mod redis;
mod sql;

pub use aws_iam::AwsIamDriver;
pub use cassandra::CassandraDriver;
pub use elasticache::ElastiCacheDriver;
pub use elasticsearch::ElasticSearchDriver;
pub use mongo_atlas::MongoAtlasDriver;
pub use redis::RedisDriver;
pub use sql::SqlDatabaseDriver;

use crate::broker::{ConnectionBroker, ExecOutcome, Intent, StatementBatch};
use chrono::{DateTime, Utc};
use dynsec_core::credentials::{CredentialMaterial, format_expiration};
use dynsec_core::ports::{ProvisionedEntity, RenewedEntity, RevokedEntity};
use dynsec_core::template::{self, TemplateVars};
use dynsec_core::{Error, ProviderConfig, ProviderType, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) fn mismatch(expected: ProviderType, config: &ProviderConfig) -> Error {
    Error::ProviderMismatch {
        expected,
        actual: config.provider_type(),
    }
}

/// Payload returned to the caller for username/password providers.
pub(crate) fn credential_data(material: &CredentialMaterial) -> serde_json::Value {
    json!({
        "DB_USERNAME": material.username,
        "DB_PASSWORD": material.password,
    })
}

/// Renders administrator-authored statements and hands them to the broker.
///
/// Rendering always completes before the broker is contacted, so a template
/// error never reaches the target system.
#[derive(Clone)]
pub(crate) struct StatementRunner {
    broker: Arc<dyn ConnectionBroker>,
}

impl StatementRunner {
    pub fn new(broker: Arc<dyn ConnectionBroker>) -> Self {
        Self { broker }
    }

    pub async fn run(
        &self,
        config: &ProviderConfig,
        intent: Intent,
        statement: &str,
        vars: &TemplateVars,
    ) -> Result<ExecOutcome> {
        let script = template::render(statement, vars)?;
        self.broker
            .execute(config, &StatementBatch::new(intent, script))
            .await
    }

    pub async fn ping(&self, config: &ProviderConfig) -> Result<bool> {
        self.broker.ping(config).await?;
        Ok(true)
    }

    /// Run the creation statement. When the target reports that only part
    /// of it applied, the revocation statement is run to undo it; if that
    /// fails too, the error carries the username so the caller can clean up.
    pub async fn provision(
        &self,
        config: &ProviderConfig,
        creation: &str,
        revocation: &str,
        material: &CredentialMaterial,
        vars: TemplateVars,
    ) -> Result<ProvisionedEntity> {
        let rollback = template::render(revocation, &vars)?;
        match self.run(config, Intent::Provision, creation, &vars).await {
            Ok(_) => {}
            Err(Error::ProvisioningFailed {
                provider,
                entity_id: None,
                message,
            }) => {
                let undone = self
                    .broker
                    .execute(config, &StatementBatch::new(Intent::Revoke, rollback))
                    .await;
                return Err(match undone {
                    Ok(outcome) => {
                        warn!(provider = %provider, entity_id = %material.username, ?outcome, "Rolled back partially provisioned principal");
                        Error::ProvisioningFailed {
                            provider,
                            entity_id: None,
                            message,
                        }
                    }
                    Err(err) => {
                        warn!(provider = %provider, entity_id = %material.username, error = %err, "Rollback of partially provisioned principal failed");
                        Error::ProvisioningFailed {
                            provider,
                            entity_id: Some(material.username.clone()),
                            message: format!("{}; rollback failed: {}", message, err),
                        }
                    }
                });
            }
            Err(err) => return Err(err),
        }
        info!(
            provider = %config.provider_type(),
            entity_id = %material.username,
            "Provisioned principal"
        );
        Ok(ProvisionedEntity {
            entity_id: material.username.clone(),
            data: credential_data(material),
        })
    }

    pub async fn revoke(
        &self,
        config: &ProviderConfig,
        statement: &str,
        entity_id: &str,
        vars: TemplateVars,
    ) -> Result<RevokedEntity> {
        let vars = vars.with("username", entity_id);
        let outcome = self.run(config, Intent::Revoke, statement, &vars).await?;
        debug!(provider = %config.provider_type(), entity_id, ?outcome, "Revocation applied");
        Ok(RevokedEntity {
            entity_id: entity_id.to_string(),
        })
    }

    /// Run the renew statement if there is one. Without it the renewal is logical only.
    pub async fn extend(
        &self,
        config: &ProviderConfig,
        statement: Option<&str>,
        entity_id: &str,
        expire_at: DateTime<Utc>,
        vars: TemplateVars,
    ) -> Result<RenewedEntity> {
        if let Some(statement) = statement {
            let vars = vars
                .with("username", entity_id)
                .with("expiration", format_expiration(expire_at));
            self.run(config, Intent::Extend, statement, &vars).await?;
        }
        Ok(RenewedEntity {
            entity_id: entity_id.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Broker that records every batch and succeeds.
    #[derive(Default)]
    pub struct CapturingBroker {
        pub batches: Mutex<Vec<StatementBatch>>,
        pub absent: bool,
    }

    impl CapturingBroker {
        pub fn scripts(&self) -> Vec<String> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .map(|b| b.script.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ConnectionBroker for CapturingBroker {
        async fn execute(
            &self,
            _config: &ProviderConfig,
            batch: &StatementBatch,
        ) -> Result<ExecOutcome> {
            self.batches.lock().unwrap().push(batch.clone());
            Ok(if self.absent {
                ExecOutcome::AlreadyAbsent
            } else {
                ExecOutcome::Applied
            })
        }

        async fn ping(&self, _config: &ProviderConfig) -> Result<()> {
            Ok(())
        }
    }
}
