//! Scoped, time-bounded sessions against external systems.
//!
//! Every statement batch runs on a session that is opened for that batch
//! alone and torn down afterwards, whether the work succeeded, failed or
//! timed out.

mod cassandra;
mod elasticache;
mod elasticsearch;
mod redis;
mod sql;

use async_trait::async_trait;
use dynsec_core::{Error, ProviderConfig, ProviderType, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

pub use elasticsearch::EsRequest;

/// What a statement batch is meant to do on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Provision,
    Extend,
    Revoke,
}

/// A rendered statement script bound to an intent.
#[derive(Clone, PartialEq, Eq)]
pub struct StatementBatch {
    pub intent: Intent,
    pub script: String,
}

impl StatementBatch {
    pub fn new(intent: Intent, script: impl Into<String>) -> Self {
        Self {
            intent,
            script: script.into(),
        }
    }
}

// Rendered scripts contain generated passwords.
impl fmt::Debug for StatementBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementBatch")
            .field("intent", &self.intent)
            .field("script_len", &self.script.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Applied,
    /// The principal a revocation targeted no longer exists.
    AlreadyAbsent,
}

/// Runs statement batches against the system described by a provider config.
#[async_trait]
pub trait ConnectionBroker: Send + Sync {
    async fn execute(&self, config: &ProviderConfig, batch: &StatementBatch)
    -> Result<ExecOutcome>;

    /// Open a session and authenticate without running any statement.
    async fn ping(&self, config: &ProviderConfig) -> Result<()>;
}

/// Timeouts applied to one external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub operation: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOverride {
    pub connect_timeout_secs: Option<u64>,
    pub operation_timeout_secs: Option<u64>,
}

/// How external systems are reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Connection/handshake timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Timeout for the work done on an open session, in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,
    /// Per-provider timeout overrides.
    #[serde(default)]
    pub overrides: BTreeMap<ProviderType, TimeoutOverride>,
    /// MongoDB Atlas Admin API base URL.
    #[serde(default = "default_atlas_api_url")]
    pub atlas_api_url: String,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_operation_timeout() -> u64 {
    15
}

fn default_atlas_api_url() -> String {
    "https://cloud.mongodb.com/api/atlas/v2".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            operation_timeout_secs: default_operation_timeout(),
            overrides: BTreeMap::new(),
            atlas_api_url: default_atlas_api_url(),
        }
    }
}

impl BrokerConfig {
    pub fn timeouts_for(&self, provider: ProviderType) -> Timeouts {
        let over = self.overrides.get(&provider);
        let connect = over
            .and_then(|o| o.connect_timeout_secs)
            .unwrap_or(self.connect_timeout_secs);
        let operation = over
            .and_then(|o| o.operation_timeout_secs)
            .unwrap_or(self.operation_timeout_secs);
        Timeouts {
            connect: Duration::from_secs(connect),
            operation: Duration::from_secs(operation),
        }
    }

    /// Override the timeouts of one provider.
    pub fn with_override(
        mut self,
        provider: ProviderType,
        connect_timeout_secs: u64,
        operation_timeout_secs: u64,
    ) -> Self {
        self.overrides.insert(
            provider,
            TimeoutOverride {
                connect_timeout_secs: Some(connect_timeout_secs),
                operation_timeout_secs: Some(operation_timeout_secs),
            },
        );
        self
    }

    pub fn with_atlas_api_url(mut self, url: impl Into<String>) -> Self {
        self.atlas_api_url = url.into();
        self
    }
}

/// A provider-specific session that must be closed explicitly.
#[async_trait]
pub(crate) trait Session: Send + Sized {
    async fn close(self);
}

/// Open a session, run `work` on it and close it on every exit path.
pub(crate) async fn with_session<S, T, O, W>(
    provider: ProviderType,
    timeouts: Timeouts,
    open: O,
    work: W,
) -> Result<T>
where
    S: Session,
    O: Future<Output = Result<S>> + Send,
    W: for<'s> FnOnce(&'s mut S) -> BoxFuture<'s, Result<T>> + Send,
{
    let mut session = match tokio::time::timeout(timeouts.connect, open).await {
        Ok(opened) => opened?,
        Err(_) => {
            return Err(Error::connection(
                provider,
                format!("connect timed out after {:?}", timeouts.connect),
            ));
        }
    };
    debug!(provider = %provider, "Session opened");

    let result = match tokio::time::timeout(timeouts.operation, work(&mut session)).await {
        Ok(result) => result,
        Err(_) => Err(Error::connection(
            provider,
            format!("operation timed out after {:?}", timeouts.operation),
        )),
    };

    if tokio::time::timeout(timeouts.connect, session.close())
        .await
        .is_err()
    {
        warn!(provider = %provider, "Session close timed out");
    }
    result
}

/// Counts statements that completed on a non-transactional target.
///
/// The counter lives outside the session future so it survives the future
/// being dropped by the operation timeout.
#[derive(Debug, Clone, Default)]
pub(crate) struct Progress(Arc<AtomicUsize>);

impl Progress {
    pub fn applied(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Turn a failure that struck after part of a provisioning batch landed
/// into `ProvisioningFailed`, so the caller knows a principal may exist.
pub(crate) fn partial_failure<T>(
    provider: ProviderType,
    intent: Intent,
    total: usize,
    progress: &Progress,
    result: Result<T>,
) -> Result<T> {
    let applied = progress.count();
    match result {
        Err(err) if intent == Intent::Provision && applied > 0 => {
            warn!(provider = %provider, applied, total, "Provisioning batch partially applied");
            Err(Error::ProvisioningFailed {
                provider,
                entity_id: None,
                message: format!(
                    "{} of {} statements applied before failure: {}",
                    applied, total, err
                ),
            })
        }
        other => other,
    }
}

/// Broker that talks to the real external systems.
#[derive(Debug, Clone, Default)]
pub struct LiveBroker {
    config: BrokerConfig,
}

impl LiveBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionBroker for LiveBroker {
    async fn execute(
        &self,
        config: &ProviderConfig,
        batch: &StatementBatch,
    ) -> Result<ExecOutcome> {
        let provider = config.provider_type();
        let timeouts = self.config.timeouts_for(provider);
        debug!(provider = %provider, intent = ?batch.intent, "Executing statement batch");

        match config {
            ProviderConfig::SqlDatabase(inputs) => sql::execute(inputs, batch, timeouts).await,
            ProviderConfig::Cassandra(inputs) => cassandra::execute(inputs, batch, timeouts).await,
            ProviderConfig::Redis(inputs) => redis::execute(inputs, batch, timeouts).await,
            ProviderConfig::AwsElastiCache(inputs) => {
                elasticache::execute(inputs, batch, timeouts).await
            }
            ProviderConfig::ElasticSearch(inputs) => {
                elasticsearch::execute(inputs, batch, timeouts).await
            }
            ProviderConfig::AwsIam(_) | ProviderConfig::MongoAtlas(_) => Err(
                Error::UnsupportedProvider(format!("{} does not execute statements", provider)),
            ),
        }
    }

    async fn ping(&self, config: &ProviderConfig) -> Result<()> {
        let provider = config.provider_type();
        let timeouts = self.config.timeouts_for(provider);

        match config {
            ProviderConfig::SqlDatabase(inputs) => sql::ping(inputs, timeouts).await,
            ProviderConfig::Cassandra(inputs) => cassandra::ping(inputs, timeouts).await,
            ProviderConfig::Redis(inputs) => redis::ping(inputs, timeouts).await,
            ProviderConfig::AwsElastiCache(inputs) => elasticache::ping(inputs, timeouts).await,
            ProviderConfig::ElasticSearch(inputs) => elasticsearch::ping(inputs, timeouts).await,
            ProviderConfig::AwsIam(_) | ProviderConfig::MongoAtlas(_) => Err(
                Error::UnsupportedProvider(format!("{} has no statement session", provider)),
            ),
        }
    }
}
