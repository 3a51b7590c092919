//! MongoDB Atlas database users through the Atlas Admin API.
//!
//! Atlas enforces expiry itself through `deleteAfterDate`, so renewal is native.

use super::{credential_data, mismatch};
use crate::broker::BrokerConfig;
use crate::digest::{DigestClient, DigestRequest};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dynsec_core::credentials::CredentialPolicy;
use dynsec_core::ports::{ProviderDriver, ProvisionedEntity, Renewal, RenewedEntity, RevokedEntity};
use dynsec_core::provider::MongoAtlasInputs;
use dynsec_core::{Error, ProviderConfig, ProviderType, Result, ValidationError, schema};
use reqwest::{Method, StatusCode, Url};
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, info, warn};

const PROVIDER: ProviderType = ProviderType::MongoAtlas;
const ACCEPT: &str = "application/vnd.atlas.2023-02-01+json";
const AUTH_DATABASE: &str = "admin";
const SCOPE_TYPES: &[&str] = &["CLUSTER", "DATA_LAKE", "STREAM"];

pub struct MongoAtlasDriver {
    broker: BrokerConfig,
}

impl MongoAtlasDriver {
    pub fn new(broker: BrokerConfig) -> Self {
        Self { broker }
    }

    fn inputs(config: &ProviderConfig) -> Result<&MongoAtlasInputs> {
        match config {
            ProviderConfig::MongoAtlas(inputs) => Ok(inputs),
            other => Err(mismatch(PROVIDER, other)),
        }
    }

    fn client(&self, inputs: &MongoAtlasInputs) -> Result<DigestClient> {
        let timeouts = self.broker.timeouts_for(PROVIDER);
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.operation)
            .build()
            .map_err(|e| Error::connection(PROVIDER, e))?;
        Ok(DigestClient::new(
            client,
            inputs.admin_public_key.as_str(),
            inputs.admin_private_key.as_str(),
        ))
    }

    fn url(&self, inputs: &MongoAtlasInputs, suffix: &str) -> Result<Url> {
        let base = self.broker.atlas_api_url.trim_end_matches('/');
        Url::parse(&format!(
            "{}/groups/{}/databaseUsers{}",
            base, inputs.group_id, suffix
        ))
        .map_err(|e| Error::Internal(format!("invalid Atlas API URL: {}", e)))
    }

    fn user_url(&self, inputs: &MongoAtlasInputs, username: &str) -> Result<Url> {
        self.url(inputs, &format!("/{}/{}", AUTH_DATABASE, username))
    }

    async fn send(
        &self,
        inputs: &MongoAtlasInputs,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<(StatusCode, String)> {
        let client = self.client(inputs)?;
        debug!(provider = %PROVIDER, %method, path = url.path(), "Calling Atlas Admin API");
        let response = client
            .send(&DigestRequest {
                method,
                url,
                accept: ACCEPT,
                body,
            })
            .await
            .map_err(|e| Error::connection(PROVIDER, e))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Ok((status, text))
    }
}

/// Cross-field rules the schema alone cannot express.
fn check_atlas_rules(inputs: &MongoAtlasInputs) -> std::result::Result<(), ValidationError> {
    let mut issues = ValidationError::default();

    if inputs.group_id.len() != 24 || !inputs.group_id.chars().all(|c| c.is_ascii_hexdigit()) {
        issues.push("groupId", "must be a 24 character hexadecimal project id");
    }

    for (i, role) in inputs.roles.iter().enumerate() {
        if role.database_name == AUTH_DATABASE && role.collection_name.is_some() {
            issues.push(
                format!("roles[{}].collectionName", i),
                "is not allowed on roles for the admin database",
            );
        }
    }

    let mut names = HashSet::new();
    for (i, scope) in inputs.scopes.iter().enumerate() {
        if !SCOPE_TYPES.contains(&scope.scope_type.as_str()) {
            issues.push(
                format!("scopes[{}].type", i),
                format!("must be one of {}", SCOPE_TYPES.join(", ")),
            );
        }
        if !names.insert(scope.name.as_str()) {
            issues.push(format!("scopes[{}].name", i), "is duplicated");
        }
    }

    if issues.is_empty() { Ok(()) } else { Err(issues) }
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let message = format!("HTTP {}: {}", status, body.chars().take(512).collect::<String>());
    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status.is_server_error()
    {
        Error::connection(PROVIDER, message)
    } else {
        Error::rejected(PROVIDER, message)
    }
}

fn delete_after(expire_at: DateTime<Utc>) -> String {
    expire_at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl ProviderDriver for MongoAtlasDriver {
    fn provider_type(&self) -> ProviderType {
        PROVIDER
    }

    fn validate_provider_inputs(&self, raw: &serde_json::Value) -> Result<ProviderConfig> {
        let config = schema::validate(PROVIDER, raw)?;
        check_atlas_rules(Self::inputs(&config)?)?;
        Ok(config)
    }

    async fn validate_connection(&self, config: &ProviderConfig) -> Result<bool> {
        let inputs = Self::inputs(config)?;
        let mut url = self.url(inputs, "")?;
        url.query_pairs_mut().append_pair("itemsPerPage", "1");

        let (status, body) = self.send(inputs, Method::GET, url, None).await?;
        if status.is_success() {
            Ok(true)
        } else {
            Err(status_error(status, &body))
        }
    }

    async fn create(
        &self,
        config: &ProviderConfig,
        expire_at: DateTime<Utc>,
    ) -> Result<ProvisionedEntity> {
        let inputs = Self::inputs(config)?;
        let material = CredentialPolicy::default().generate();

        let body = json!({
            "databaseName": AUTH_DATABASE,
            "groupId": inputs.group_id,
            "username": material.username,
            "password": material.password,
            "roles": inputs.roles,
            "scopes": inputs.scopes,
            "deleteAfterDate": delete_after(expire_at),
        });
        let (status, text) = self
            .send(inputs, Method::POST, self.url(inputs, "")?, Some(body))
            .await?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        info!(provider = %PROVIDER, entity_id = %material.username, "Provisioned Atlas database user");
        Ok(ProvisionedEntity {
            entity_id: material.username.clone(),
            data: credential_data(&material),
        })
    }

    async fn revoke(&self, config: &ProviderConfig, entity_id: &str) -> Result<RevokedEntity> {
        let inputs = Self::inputs(config)?;
        let (status, text) = self
            .send(inputs, Method::DELETE, self.user_url(inputs, entity_id)?, None)
            .await?;
        if status == StatusCode::NOT_FOUND {
            warn!(provider = %PROVIDER, entity_id, "Atlas user already absent on revoke");
        } else if !status.is_success() {
            return Err(status_error(status, &text));
        }
        Ok(RevokedEntity {
            entity_id: entity_id.to_string(),
        })
    }

    async fn renew(
        &self,
        config: &ProviderConfig,
        entity_id: &str,
        expire_at: DateTime<Utc>,
    ) -> Result<RenewedEntity> {
        let inputs = Self::inputs(config)?;
        let body = json!({ "deleteAfterDate": delete_after(expire_at) });
        let (status, text) = self
            .send(
                inputs,
                Method::PATCH,
                self.user_url(inputs, entity_id)?,
                Some(body),
            )
            .await?;
        if status == StatusCode::NOT_FOUND {
            return Err(Error::LeaseNotActive {
                entity_id: entity_id.to_string(),
                status: None,
            });
        }
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        Ok(RenewedEntity {
            entity_id: entity_id.to_string(),
        })
    }

    fn renewal(&self, _config: &ProviderConfig) -> Renewal {
        Renewal::Native
    }
}
