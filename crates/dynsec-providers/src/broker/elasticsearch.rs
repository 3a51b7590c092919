//! Elasticsearch security API over HTTP.
//!
//! Each statement is a request template: the first line is `METHOD /path`
//! and any remaining lines form the JSON body.

use super::{ExecOutcome, Intent, Session, StatementBatch, Timeouts, with_session};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dynsec_core::provider::{ElasticSearchAuth, ElasticSearchInputs};
use dynsec_core::{Error, ProviderType, Result};
use reqwest::{Client, Method, StatusCode};
use tracing::{debug, warn};

const PROVIDER: ProviderType = ProviderType::ElasticSearch;

/// One HTTP request parsed from a rendered statement.
#[derive(Debug, Clone, PartialEq)]
pub struct EsRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl EsRequest {
    pub fn parse(statement: &str) -> Result<Self> {
        let statement = statement.trim();
        let (request_line, body) = match statement.split_once('\n') {
            Some((line, rest)) => (line.trim(), rest.trim()),
            None => (statement, ""),
        };

        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(path), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::rejected(
                PROVIDER,
                "statement must start with a `METHOD /path` line",
            ));
        };
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::rejected(PROVIDER, format!("invalid HTTP method `{}`", method)))?;
        if !path.starts_with('/') {
            return Err(Error::rejected(PROVIDER, "request path must start with `/`"));
        }

        let body = if body.is_empty() {
            None
        } else {
            Some(serde_json::from_str(body).map_err(|e| {
                Error::rejected(PROVIDER, format!("request body is not valid JSON: {}", e))
            })?)
        };

        Ok(Self {
            method,
            path: path.to_string(),
            body,
        })
    }
}

struct HttpSession {
    client: Client,
    base_url: String,
    auth: ElasticSearchAuth,
}

#[async_trait]
impl Session for HttpSession {
    async fn close(self) {
        drop(self.client);
    }
}

impl HttpSession {
    async fn send(&self, request: &EsRequest) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        builder = match &self.auth {
            ElasticSearchAuth::User { username, password } => {
                builder.basic_auth(username, Some(password))
            }
            ElasticSearchAuth::ApiKey {
                api_key,
                api_key_id,
            } => builder.header(
                reqwest::header::AUTHORIZATION,
                format!("ApiKey {}", STANDARD.encode(format!("{}:{}", api_key_id, api_key))),
            ),
        };
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder.send().await.map_err(|e| Error::connection(PROVIDER, e))
    }
}

pub(super) async fn execute(
    inputs: &ElasticSearchInputs,
    batch: &StatementBatch,
    timeouts: Timeouts,
) -> Result<ExecOutcome> {
    let request = EsRequest::parse(&batch.script)?;
    let intent = batch.intent;

    with_session(PROVIDER, timeouts, open(inputs, timeouts), move |session| {
        Box::pin(async move {
            debug!(provider = %PROVIDER, method = %request.method, path = %request.path, "Sending request");
            let response = session.send(&request).await?;
            let status = response.status();
            if status.is_success() {
                return Ok(ExecOutcome::Applied);
            }
            if status == StatusCode::NOT_FOUND && intent == Intent::Revoke {
                warn!(provider = %PROVIDER, "Principal already absent on revoke");
                return Ok(ExecOutcome::AlreadyAbsent);
            }
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        })
    })
    .await
}

pub(super) async fn ping(inputs: &ElasticSearchInputs, timeouts: Timeouts) -> Result<()> {
    with_session(PROVIDER, timeouts, open(inputs, timeouts), |session| {
        Box::pin(async move {
            let request = EsRequest {
                method: Method::GET,
                path: "/_security/_authenticate".to_string(),
                body: None,
            };
            let response = session.send(&request).await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                let body = response.text().await.unwrap_or_default();
                Err(status_error(status, &body))
            }
        })
    })
    .await
}

/// Base URL for the cluster. A scheme in `host` wins, otherwise `https` when a CA is pinned.
pub(crate) fn base_url(inputs: &ElasticSearchInputs) -> String {
    let host = inputs.host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}:{}", host, inputs.port)
    } else if inputs.ca.is_some() {
        format!("https://{}:{}", host, inputs.port)
    } else {
        format!("http://{}:{}", host, inputs.port)
    }
}

async fn open(inputs: &ElasticSearchInputs, timeouts: Timeouts) -> Result<HttpSession> {
    let mut builder = Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.operation);
    if let Some(ca) = &inputs.ca {
        for cert in reqwest::Certificate::from_pem_bundle(ca.as_bytes())
            .map_err(|e| Error::connection(PROVIDER, format!("invalid CA bundle: {}", e)))?
        {
            builder = builder.add_root_certificate(cert);
        }
    }
    let client = builder
        .build()
        .map_err(|e| Error::connection(PROVIDER, e))?;

    Ok(HttpSession {
        client,
        base_url: base_url(inputs),
        auth: inputs.auth.clone(),
    })
}

fn status_error(status: StatusCode, body: &str) -> Error {
    let message = format!("HTTP {}: {}", status, body.chars().take(512).collect::<String>());
    if status == StatusCode::UNAUTHORIZED || status.is_server_error() {
        Error::connection(PROVIDER, message)
    } else {
        Error::rejected(PROVIDER, message)
    }
}
