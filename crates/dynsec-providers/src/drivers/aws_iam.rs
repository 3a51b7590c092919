//! IAM users with programmatic access keys.

use super::mismatch;
use crate::aws::{self, StaticKeys};
use crate::broker::BrokerConfig;
use async_trait::async_trait;
use aws_sdk_iam::Client;
use chrono::{DateTime, Utc};
use dynsec_core::credentials::CredentialPolicy;
use dynsec_core::ports::{ProviderDriver, ProvisionedEntity, Renewal, RenewedEntity, RevokedEntity};
use dynsec_core::provider::AwsIamInputs;
use dynsec_core::{Error, ProviderConfig, ProviderType, Result};
use serde_json::json;
use tracing::{debug, info, warn};

const PROVIDER: ProviderType = ProviderType::AwsIam;
const NO_SUCH_ENTITY: &str = "NoSuchEntity";
const DEFAULT_PATH: &str = "/";

/// Returns `Ok(None)` when the IAM entity is already gone.
macro_rules! tolerate_missing {
    ($call:expr) => {
        match $call.await {
            Ok(output) => Ok(Some(output)),
            Err(err) if aws::error_code(&err) == Some(NO_SUCH_ENTITY) => Ok(None),
            Err(err) => Err(aws::classify(PROVIDER, err)),
        }
    };
}

pub struct AwsIamDriver {
    broker: BrokerConfig,
}

impl AwsIamDriver {
    pub fn new(broker: BrokerConfig) -> Self {
        Self { broker }
    }

    fn inputs(config: &ProviderConfig) -> Result<&AwsIamInputs> {
        match config {
            ProviderConfig::AwsIam(inputs) => Ok(inputs),
            other => Err(mismatch(PROVIDER, other)),
        }
    }

    async fn sdk_config(&self, inputs: &AwsIamInputs) -> aws_config::SdkConfig {
        aws::sdk_config(
            StaticKeys {
                access_key_id: &inputs.access_key,
                secret_access_key: &inputs.secret_access_key,
                region: &inputs.region,
            },
            self.broker.timeouts_for(PROVIDER),
        )
        .await
    }

    /// Attach groups and policies, then issue an access key.
    async fn provision(
        client: &Client,
        inputs: &AwsIamInputs,
        username: &str,
    ) -> Result<(String, String)> {
        for group in inputs.user_group_list() {
            client
                .add_user_to_group()
                .group_name(&group)
                .user_name(username)
                .send()
                .await
                .map_err(|e| aws::classify(PROVIDER, e))?;
        }

        for policy_arn in inputs.policy_arn_list() {
            client
                .attach_user_policy()
                .user_name(username)
                .policy_arn(&policy_arn)
                .send()
                .await
                .map_err(|e| aws::classify(PROVIDER, e))?;
        }

        if let Some(document) = &inputs.policy_document {
            client
                .put_user_policy()
                .user_name(username)
                .policy_name(username)
                .policy_document(document)
                .send()
                .await
                .map_err(|e| aws::classify(PROVIDER, e))?;
        }

        let output = client
            .create_access_key()
            .user_name(username)
            .send()
            .await
            .map_err(|e| aws::classify(PROVIDER, e))?;
        let key = output
            .access_key()
            .ok_or_else(|| Error::rejected(PROVIDER, "CreateAccessKey returned no key"))?;
        Ok((
            key.access_key_id().to_string(),
            key.secret_access_key().to_string(),
        ))
    }

    /// Detach everything from the user and delete it. Returns `false` if it did not exist.
    async fn teardown(client: &Client, username: &str) -> Result<bool> {
        let Some(groups) =
            tolerate_missing!(client.list_groups_for_user().user_name(username).send())?
        else {
            return Ok(false);
        };
        for group in groups.groups() {
            tolerate_missing!(
                client
                    .remove_user_from_group()
                    .group_name(group.group_name())
                    .user_name(username)
                    .send()
            )?;
        }

        if let Some(keys) =
            tolerate_missing!(client.list_access_keys().user_name(username).send())?
        {
            for key in keys.access_key_metadata() {
                if let Some(key_id) = key.access_key_id() {
                    tolerate_missing!(
                        client
                            .delete_access_key()
                            .user_name(username)
                            .access_key_id(key_id)
                            .send()
                    )?;
                }
            }
        }

        if let Some(policies) =
            tolerate_missing!(client.list_user_policies().user_name(username).send())?
        {
            for name in policies.policy_names() {
                tolerate_missing!(
                    client
                        .delete_user_policy()
                        .user_name(username)
                        .policy_name(name)
                        .send()
                )?;
            }
        }

        if let Some(attached) =
            tolerate_missing!(client.list_attached_user_policies().user_name(username).send())?
        {
            for policy in attached.attached_policies() {
                if let Some(arn) = policy.policy_arn() {
                    tolerate_missing!(
                        client
                            .detach_user_policy()
                            .user_name(username)
                            .policy_arn(arn)
                            .send()
                    )?;
                }
            }
        }

        let deleted = tolerate_missing!(client.delete_user().user_name(username).send())?;
        Ok(deleted.is_some())
    }
}

#[async_trait]
impl ProviderDriver for AwsIamDriver {
    fn provider_type(&self) -> ProviderType {
        PROVIDER
    }

    async fn validate_connection(&self, config: &ProviderConfig) -> Result<bool> {
        let inputs = Self::inputs(config)?;
        let sts = aws_sdk_sts::Client::new(&self.sdk_config(inputs).await);
        let identity = sts
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| aws::classify(PROVIDER, e))?;
        debug!(provider = %PROVIDER, arn = identity.arn().unwrap_or_default(), "Validated IAM credentials");
        Ok(true)
    }

    async fn create(
        &self,
        config: &ProviderConfig,
        _expire_at: DateTime<Utc>,
    ) -> Result<ProvisionedEntity> {
        let inputs = Self::inputs(config)?;
        let client = Client::new(&self.sdk_config(inputs).await);
        let username = CredentialPolicy::new(32, 0).generate().username.clone();

        client
            .create_user()
            .user_name(&username)
            .path(inputs.aws_path.as_deref().unwrap_or(DEFAULT_PATH))
            .set_permissions_boundary(inputs.permission_boundary_policy_arn.clone())
            .send()
            .await
            .map_err(|e| aws::classify(PROVIDER, e))?;

        match Self::provision(&client, inputs, &username).await {
            Ok((access_key, secret_access_key)) => {
                info!(provider = %PROVIDER, entity_id = %username, "Provisioned IAM user");
                Ok(ProvisionedEntity {
                    data: json!({
                        "ACCESS_KEY": access_key,
                        "SECRET_ACCESS_KEY": secret_access_key,
                        "USERNAME": username,
                    }),
                    entity_id: username,
                })
            }
            Err(err) => match Self::teardown(&client, &username).await {
                Ok(_) => Err(err),
                Err(rollback) => {
                    warn!(provider = %PROVIDER, entity_id = %username, error = %rollback, "Rollback of partially created IAM user failed");
                    Err(Error::ProvisioningFailed {
                        provider: PROVIDER,
                        entity_id: Some(username),
                        message: format!("{}; rollback failed: {}", err, rollback),
                    })
                }
            },
        }
    }

    async fn revoke(&self, config: &ProviderConfig, entity_id: &str) -> Result<RevokedEntity> {
        let inputs = Self::inputs(config)?;
        let client = Client::new(&self.sdk_config(inputs).await);
        if !Self::teardown(&client, entity_id).await? {
            warn!(provider = %PROVIDER, entity_id, "IAM user already absent on revoke");
        }
        Ok(RevokedEntity {
            entity_id: entity_id.to_string(),
        })
    }

    async fn renew(
        &self,
        config: &ProviderConfig,
        entity_id: &str,
        _expire_at: DateTime<Utc>,
    ) -> Result<RenewedEntity> {
        Self::inputs(config)?;
        Ok(RenewedEntity {
            entity_id: entity_id.to_string(),
        })
    }

    fn renewal(&self, _config: &ProviderConfig) -> Renewal {
        Renewal::LogicalOnly
    }
}
