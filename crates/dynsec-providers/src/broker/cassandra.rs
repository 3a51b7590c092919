//! CQL sessions through the scylla driver.

use super::{
    ExecOutcome, Intent, Progress, Session, StatementBatch, Timeouts, partial_failure, with_session,
};
use async_trait::async_trait;
use dynsec_core::provider::CassandraInputs;
use dynsec_core::template::split_statements;
use dynsec_core::{Error, ProviderType, Result};
use openssl::ssl::{SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use scylla::transport::errors::QueryError;
use scylla::transport::load_balancing::DefaultPolicy;
use scylla::{ExecutionProfile, SessionBuilder};
use tracing::warn;

const PROVIDER: ProviderType = ProviderType::Cassandra;

struct CqlSession(scylla::Session);

#[async_trait]
impl Session for CqlSession {
    async fn close(self) {
        // Connections are shut down when the session is dropped.
        drop(self.0);
    }
}

pub(super) async fn execute(
    inputs: &CassandraInputs,
    batch: &StatementBatch,
    timeouts: Timeouts,
) -> Result<ExecOutcome> {
    let intent = batch.intent;
    let statements = split_statements(&batch.script);
    let total = statements.len();
    let progress = Progress::default();
    let counter = progress.clone();

    let result = with_session(PROVIDER, timeouts, open(inputs, timeouts), move |session| {
        Box::pin(async move {
            for statement in &statements {
                if let Err(err) = session.0.query_unpaged(statement.as_str(), ()).await {
                    if intent == Intent::Revoke && is_missing_principal(&err) {
                        warn!(provider = %PROVIDER, "Principal already absent on revoke");
                        return Ok(ExecOutcome::AlreadyAbsent);
                    }
                    return Err(classify(err));
                }
                counter.applied();
            }
            Ok(ExecOutcome::Applied)
        })
    })
    .await;
    partial_failure(PROVIDER, intent, total, &progress, result)
}

pub(super) async fn ping(inputs: &CassandraInputs, timeouts: Timeouts) -> Result<()> {
    with_session(PROVIDER, timeouts, open(inputs, timeouts), |session| {
        Box::pin(async move {
            session
                .0
                .query_unpaged("SELECT release_version FROM system.local", ())
                .await
                .map(|_| ())
                .map_err(classify)
        })
    })
    .await
}

async fn open(inputs: &CassandraInputs, timeouts: Timeouts) -> Result<CqlSession> {
    let policy = DefaultPolicy::builder()
        .prefer_datacenter(inputs.local_data_center.clone())
        .permit_dc_failover(false)
        .build();
    let profile = ExecutionProfile::builder()
        .load_balancing_policy(policy)
        .request_timeout(Some(timeouts.operation))
        .build();

    let mut builder = SessionBuilder::new()
        .known_node(format!("{}:{}", inputs.host, inputs.port))
        .user(&inputs.username, &inputs.password)
        .connection_timeout(timeouts.connect)
        .default_execution_profile_handle(profile.into_handle());
    if let Some(ca) = &inputs.ca {
        builder = builder.ssl_context(Some(ssl_context(ca)?));
    }

    let session = builder
        .build()
        .await
        .map_err(|e| Error::connection(PROVIDER, e))?;

    if let Some(keyspace) = &inputs.keyspace {
        session
            .use_keyspace(keyspace, false)
            .await
            .map_err(classify)?;
    }
    Ok(CqlSession(session))
}

fn ssl_context(ca: &str) -> Result<SslContext> {
    let certs = X509::stack_from_pem(ca.as_bytes())
        .map_err(|e| Error::connection(PROVIDER, format!("invalid CA bundle: {}", e)))?;
    let mut builder = SslContextBuilder::new(SslMethod::tls())
        .map_err(|e| Error::Internal(e.to_string()))?;
    for cert in certs {
        builder
            .cert_store_mut()
            .add_cert(cert)
            .map_err(|e| Error::connection(PROVIDER, format!("invalid CA bundle: {}", e)))?;
    }
    builder.set_verify(SslVerifyMode::PEER);
    Ok(builder.build())
}

fn is_missing_principal(err: &QueryError) -> bool {
    match err {
        QueryError::DbError(_, message) => {
            let message = message.to_ascii_lowercase();
            message.contains("doesn't exist") || message.contains("does not exist")
        }
        _ => false,
    }
}

fn classify(err: QueryError) -> Error {
    match err {
        QueryError::DbError(_, message) => Error::rejected(PROVIDER, message),
        other => Error::connection(PROVIDER, other),
    }
}
