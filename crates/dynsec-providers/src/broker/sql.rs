//! SQL sessions: PostgreSQL and MySQL through sqlx, SQL Server through tiberius.

use super::{ExecOutcome, Intent, Session, StatementBatch, Timeouts, with_session};
use async_trait::async_trait;
use dynsec_core::provider::{SqlClient, SqlDatabaseInputs};
use dynsec_core::{Error, ProviderType, Result};
use sqlx::{Connection, Executor};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use std::io::Write;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

const PROVIDER: ProviderType = ProviderType::SqlDatabase;

// Not-found codes for DROP on a principal that does not exist.
const PG_UNDEFINED_OBJECT: &str = "42704";
const MYSQL_OPERATION_FAILED: u16 = 1396;
const MSSQL_UNKNOWN_PRINCIPAL: &[u32] = &[15151, 15401];

enum SqlSession {
    Postgres(PgConnection),
    MySql(MySqlConnection),
    MsSql {
        client: Client<Compat<TcpStream>>,
        // Kept alive for the lifetime of the session.
        _ca: Option<tempfile::NamedTempFile>,
    },
}

#[async_trait]
impl Session for SqlSession {
    async fn close(self) {
        let closed = match self {
            SqlSession::Postgres(conn) => conn.close().await.map_err(|e| e.to_string()),
            SqlSession::MySql(conn) => conn.close().await.map_err(|e| e.to_string()),
            SqlSession::MsSql { client, .. } => client.close().await.map_err(|e| e.to_string()),
        };
        if let Err(e) = closed {
            debug!(error = %e, "SQL session close failed");
        }
    }
}

pub(super) async fn execute(
    inputs: &SqlDatabaseInputs,
    batch: &StatementBatch,
    timeouts: Timeouts,
) -> Result<ExecOutcome> {
    let intent = batch.intent;
    let script = batch.script.clone();
    with_session(PROVIDER, timeouts, open(inputs), move |session| {
        Box::pin(async move { run(session, intent, &script).await })
    })
    .await
}

pub(super) async fn ping(inputs: &SqlDatabaseInputs, timeouts: Timeouts) -> Result<()> {
    with_session(PROVIDER, timeouts, open(inputs), |session| {
        Box::pin(async move {
            match session {
                SqlSession::Postgres(conn) => conn.ping().await.map_err(|e| Error::from(classify(e))),
                SqlSession::MySql(conn) => conn.ping().await.map_err(|e| Error::from(classify(e))),
                SqlSession::MsSql { client, .. } => {
                    let stream = client.simple_query("SELECT 1").await.map_err(classify_tds)?;
                    stream.into_results().await.map_err(classify_tds)?;
                    Ok(())
                }
            }
        })
    })
    .await
}

async fn open(inputs: &SqlDatabaseInputs) -> Result<SqlSession> {
    match inputs.client {
        SqlClient::Postgres => {
            let mut options = PgConnectOptions::new()
                .host(&inputs.host)
                .port(inputs.port)
                .username(&inputs.username)
                .password(&inputs.password)
                .database(&inputs.database);
            if let Some(ca) = &inputs.ca {
                options = options
                    .ssl_mode(PgSslMode::VerifyCa)
                    .ssl_root_cert_from_pem(ca.as_bytes().to_vec());
            }
            let conn = PgConnection::connect_with(&options)
                .await
                .map_err(|e| Error::connection(PROVIDER, e))?;
            Ok(SqlSession::Postgres(conn))
        }
        SqlClient::MySql => {
            let mut options = MySqlConnectOptions::new()
                .host(&inputs.host)
                .port(inputs.port)
                .username(&inputs.username)
                .password(&inputs.password)
                .database(&inputs.database);
            if let Some(ca) = &inputs.ca {
                options = options
                    .ssl_mode(MySqlSslMode::VerifyCa)
                    .ssl_ca_from_pem(ca.as_bytes().to_vec());
            }
            let conn = MySqlConnection::connect_with(&options)
                .await
                .map_err(|e| Error::connection(PROVIDER, e))?;
            Ok(SqlSession::MySql(conn))
        }
        SqlClient::MsSql => open_mssql(inputs).await,
        SqlClient::Oracle => Err(Error::UnsupportedProvider(format!(
            "{} client {}",
            PROVIDER,
            SqlClient::Oracle
        ))),
    }
}

async fn open_mssql(inputs: &SqlDatabaseInputs) -> Result<SqlSession> {
    let mut config = Config::new();
    config.host(&inputs.host);
    config.port(inputs.port);
    config.database(&inputs.database);
    config.authentication(AuthMethod::sql_server(&inputs.username, &inputs.password));
    config.encryption(EncryptionLevel::Required);

    let ca = match &inputs.ca {
        Some(pem) => {
            let mut file = tempfile::NamedTempFile::new()
                .map_err(|e| Error::Internal(format!("failed to stage CA bundle: {}", e)))?;
            file.write_all(pem.as_bytes())
                .map_err(|e| Error::Internal(format!("failed to stage CA bundle: {}", e)))?;
            config.trust_cert_ca(file.path().to_string_lossy());
            Some(file)
        }
        None => None,
    };

    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| Error::connection(PROVIDER, e))?;
    tcp.set_nodelay(true)
        .map_err(|e| Error::connection(PROVIDER, e))?;
    let client = Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| Error::connection(PROVIDER, e))?;

    Ok(SqlSession::MsSql { client, _ca: ca })
}

async fn run(session: &mut SqlSession, intent: Intent, script: &str) -> Result<ExecOutcome> {
    let outcome = match session {
        SqlSession::Postgres(conn) => run_sqlx_pg(conn, script).await,
        SqlSession::MySql(conn) => run_sqlx_mysql(conn, script).await,
        SqlSession::MsSql { client, .. } => run_tds(client, script).await,
    };

    match outcome {
        Ok(()) => Ok(ExecOutcome::Applied),
        Err(NotFoundOr::NotFound) if intent == Intent::Revoke => {
            warn!(provider = %PROVIDER, "Principal already absent on revoke");
            Ok(ExecOutcome::AlreadyAbsent)
        }
        Err(err) => Err(err.into()),
    }
}

async fn run_sqlx_pg(
    conn: &mut PgConnection,
    script: &str,
) -> std::result::Result<(), NotFoundOr> {
    let mut tx = conn.begin().await.map_err(classify)?;
    (&mut *tx)
        .execute(sqlx::raw_sql(script))
        .await
        .map_err(classify)?;
    tx.commit().await.map_err(classify)
}

async fn run_sqlx_mysql(
    conn: &mut MySqlConnection,
    script: &str,
) -> std::result::Result<(), NotFoundOr> {
    let mut tx = conn.begin().await.map_err(classify)?;
    (&mut *tx)
        .execute(sqlx::raw_sql(script))
        .await
        .map_err(classify)?;
    tx.commit().await.map_err(classify)
}

async fn run_tds(
    client: &mut Client<Compat<TcpStream>>,
    script: &str,
) -> std::result::Result<(), NotFoundOr> {
    let wrapped = format!(
        "SET XACT_ABORT ON; BEGIN TRANSACTION; {}; COMMIT TRANSACTION;",
        script.trim().trim_end_matches(';')
    );
    let stream = client.simple_query(wrapped).await.map_err(classify_tds)?;
    stream.into_results().await.map_err(classify_tds)?;
    Ok(())
}

/// A statement failure, with "principal does not exist" split out.
enum NotFoundOr {
    NotFound,
    Other(Error),
}

impl From<NotFoundOr> for Error {
    fn from(err: NotFoundOr) -> Self {
        match err {
            NotFoundOr::NotFound => Error::rejected(PROVIDER, "principal does not exist"),
            NotFoundOr::Other(e) => e,
        }
    }
}

fn classify(err: sqlx::Error) -> NotFoundOr {
    match &err {
        sqlx::Error::Database(db) => {
            if db.code().as_deref() == Some(PG_UNDEFINED_OBJECT) {
                return NotFoundOr::NotFound;
            }
            if db
                .try_downcast_ref::<MySqlDatabaseError>()
                .is_some_and(|e| e.number() == MYSQL_OPERATION_FAILED)
            {
                return NotFoundOr::NotFound;
            }
            NotFoundOr::Other(Error::rejected(PROVIDER, db.message()))
        }
        _ => NotFoundOr::Other(Error::connection(PROVIDER, err)),
    }
}

fn classify_tds(err: tiberius::error::Error) -> NotFoundOr {
    match &err {
        tiberius::error::Error::Server(token) => {
            if MSSQL_UNKNOWN_PRINCIPAL.contains(&token.code()) {
                NotFoundOr::NotFound
            } else {
                NotFoundOr::Other(Error::rejected(PROVIDER, token.message()))
            }
        }
        _ => NotFoundOr::Other(Error::connection(PROVIDER, err)),
    }
}
