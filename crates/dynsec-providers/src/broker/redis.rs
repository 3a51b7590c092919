//! Redis sessions. Each statement is one command, tokenized on whitespace.

use super::{
    ExecOutcome, Intent, Progress, Session, StatementBatch, Timeouts, partial_failure, with_session,
};
use ::redis::aio::MultiplexedConnection;
use ::redis::{Client, RedisError, TlsCertificates};
use async_trait::async_trait;
use dynsec_core::provider::RedisInputs;
use dynsec_core::template::split_statements;
use dynsec_core::{Error, ProviderType, Result};
use tracing::warn;
use url::Url;

const PROVIDER: ProviderType = ProviderType::Redis;

struct RedisSession(MultiplexedConnection);

#[async_trait]
impl Session for RedisSession {
    async fn close(self) {
        drop(self.0);
    }
}

pub(super) async fn execute(
    inputs: &RedisInputs,
    batch: &StatementBatch,
    timeouts: Timeouts,
) -> Result<ExecOutcome> {
    let commands = commands(&batch.script)?;
    let intent = batch.intent;
    let total = commands.len();
    let progress = Progress::default();
    let counter = progress.clone();
    let result = with_session(PROVIDER, timeouts, open(inputs), move |session| {
        Box::pin(async move { run(session, intent, commands, &counter).await })
    })
    .await;
    partial_failure(PROVIDER, intent, total, &progress, result)
}

pub(super) async fn ping(inputs: &RedisInputs, timeouts: Timeouts) -> Result<()> {
    with_session(PROVIDER, timeouts, open(inputs), |session| {
        Box::pin(async move {
            let _: String = ::redis::cmd("PING")
                .query_async(&mut session.0)
                .await
                .map_err(classify)?;
            Ok(())
        })
    })
    .await
}

pub(crate) fn connection_url(inputs: &RedisInputs) -> Result<Url> {
    let scheme = if inputs.ca.is_some() { "rediss" } else { "redis" };
    let mut url = Url::parse(&format!("{}://{}:{}", scheme, inputs.host, inputs.port))
        .map_err(|e| Error::connection(PROVIDER, format!("invalid host: {}", e)))?;
    url.set_username(&inputs.username)
        .map_err(|_| Error::connection(PROVIDER, "username cannot be encoded in URL"))?;
    if let Some(password) = &inputs.password {
        url.set_password(Some(password))
            .map_err(|_| Error::connection(PROVIDER, "password cannot be encoded in URL"))?;
    }
    Ok(url)
}

async fn open(inputs: &RedisInputs) -> Result<RedisSession> {
    let url = connection_url(inputs)?;
    let client = match &inputs.ca {
        Some(ca) => Client::build_with_tls(
            url.as_str(),
            TlsCertificates {
                client_tls: None,
                root_cert: Some(ca.as_bytes().to_vec()),
            },
        ),
        None => Client::open(url.as_str()),
    }
    .map_err(|e| Error::connection(PROVIDER, e))?;

    let conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| Error::connection(PROVIDER, e))?;
    Ok(RedisSession(conn))
}

fn commands(script: &str) -> Result<Vec<Vec<String>>> {
    let commands: Vec<Vec<String>> = split_statements(script)
        .into_iter()
        .map(|statement| statement.split_whitespace().map(str::to_string).collect())
        .collect();
    if commands.is_empty() {
        return Err(Error::rejected(PROVIDER, "statement contains no command"));
    }
    Ok(commands)
}

async fn run(
    session: &mut RedisSession,
    intent: Intent,
    commands: Vec<Vec<String>>,
    progress: &Progress,
) -> Result<ExecOutcome> {
    let mut outcome = ExecOutcome::Applied;
    for argv in commands {
        let Some((name, args)) = argv.split_first() else {
            continue;
        };
        let mut cmd = ::redis::cmd(name);
        for arg in args {
            cmd.arg(arg);
        }
        let reply: ::redis::Value = cmd.query_async(&mut session.0).await.map_err(classify)?;
        progress.applied();
        // ACL DELUSER replies with the number of users removed.
        if intent == Intent::Revoke
            && name.eq_ignore_ascii_case("ACL")
            && args.first().is_some_and(|a| a.eq_ignore_ascii_case("DELUSER"))
            && matches!(reply, ::redis::Value::Int(0))
        {
            warn!(provider = %PROVIDER, "Principal already absent on revoke");
            outcome = ExecOutcome::AlreadyAbsent;
        }
    }
    Ok(outcome)
}

fn classify(err: RedisError) -> Error {
    if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
        Error::connection(PROVIDER, err)
    } else {
        Error::rejected(PROVIDER, err)
    }
}
