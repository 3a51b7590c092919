//! ElastiCache RBAC users managed through the AWS API.
//!
//! Statements render to JSON request bodies: the creation statement to a
//! `CreateUser` request and the revocation statement to `{ "UserId": ... }`.

use super::{ExecOutcome, Intent, Session, StatementBatch, Timeouts, with_session};
use crate::aws::{self, StaticKeys};
use async_trait::async_trait;
use aws_sdk_elasticache::Client;
use dynsec_core::provider::AwsElastiCacheInputs;
use dynsec_core::{Error, ProviderType, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROVIDER: ProviderType = ProviderType::AwsElastiCache;
const USER_NOT_FOUND: &[&str] = &["UserNotFound", "UserNotFoundFault"];
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct CreateUserRequest {
    pub user_id: String,
    pub user_name: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    pub passwords: Vec<String>,
    pub access_string: String,
}

fn default_engine() -> String {
    "redis".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DeleteUserRequest {
    pub user_id: String,
}

struct AwsSession {
    client: Client,
    cluster_name: String,
}

#[async_trait]
impl Session for AwsSession {
    async fn close(self) {
        drop(self.client);
    }
}

pub(super) async fn execute(
    inputs: &AwsElastiCacheInputs,
    batch: &StatementBatch,
    timeouts: Timeouts,
) -> Result<ExecOutcome> {
    match batch.intent {
        Intent::Provision => {
            let request: CreateUserRequest = parse(&batch.script)?;
            let phases = Phases::new(timeouts.operation);
            let session_timeouts = Timeouts {
                connect: timeouts.connect,
                operation: phases.total() + timeouts.connect,
            };
            with_session(PROVIDER, session_timeouts, open(inputs, timeouts), move |session| {
                Box::pin(async move { provision(&*session, &request, phases).await })
            })
            .await
        }
        Intent::Revoke => {
            let request: DeleteUserRequest = parse(&batch.script)?;
            with_session(PROVIDER, timeouts, open(inputs, timeouts), move |session| {
                Box::pin(async move { revoke(session, &request.user_id).await })
            })
            .await
        }
        Intent::Extend => Err(Error::RenewUnsupported(PROVIDER)),
    }
}

pub(super) async fn ping(inputs: &AwsElastiCacheInputs, timeouts: Timeouts) -> Result<()> {
    with_session(PROVIDER, timeouts, open(inputs, timeouts), |session| {
        Box::pin(async move { group_ids(session).await.map(|_| ()) })
    })
    .await
}

pub(crate) fn parse<T: serde::de::DeserializeOwned>(script: &str) -> Result<T> {
    serde_json::from_str(script.trim())
        .map_err(|e| Error::rejected(PROVIDER, format!("statement is not a valid request: {}", e)))
}

async fn open(inputs: &AwsElastiCacheInputs, timeouts: Timeouts) -> Result<AwsSession> {
    let config = aws::sdk_config(
        StaticKeys {
            access_key_id: &inputs.access_key_id,
            secret_access_key: &inputs.secret_access_key,
            region: &inputs.region,
        },
        timeouts,
    )
    .await;
    Ok(AwsSession {
        client: Client::new(&config),
        cluster_name: inputs.cluster_name.clone(),
    })
}

/// The RBAC user operations provisioning needs.
#[async_trait]
trait UserDirectory: Send + Sync {
    async fn create_user(&self, request: &CreateUserRequest) -> Result<()>;

    /// Current status of a user, `None` when it is not listed.
    async fn user_status(&self, user_id: &str) -> Result<Option<String>>;

    /// User groups attached to the replication group.
    async fn group_ids(&self) -> Result<Vec<String>>;

    async fn add_to_group(&self, group: &str, user_id: &str) -> Result<()>;

    async fn delete_user(&self, user_id: &str) -> Result<ExecOutcome>;
}

#[async_trait]
impl UserDirectory for AwsSession {
    async fn create_user(&self, request: &CreateUserRequest) -> Result<()> {
        let mut create = self
            .client
            .create_user()
            .user_id(&request.user_id)
            .user_name(&request.user_name)
            .engine(&request.engine)
            .access_string(&request.access_string);
        for password in &request.passwords {
            create = create.passwords(password);
        }
        create
            .send()
            .await
            .map(|_| ())
            .map_err(|e| aws::classify(PROVIDER, e))
    }

    async fn user_status(&self, user_id: &str) -> Result<Option<String>> {
        let output = self
            .client
            .describe_users()
            .user_id(user_id)
            .send()
            .await
            .map_err(|e| aws::classify(PROVIDER, e))?;
        Ok(output
            .users()
            .first()
            .and_then(|u| u.status())
            .map(str::to_string))
    }

    async fn group_ids(&self) -> Result<Vec<String>> {
        group_ids(self).await
    }

    async fn add_to_group(&self, group: &str, user_id: &str) -> Result<()> {
        self.client
            .modify_user_group()
            .user_group_id(group)
            .user_ids_to_add(user_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| aws::classify(PROVIDER, e))
    }

    async fn delete_user(&self, user_id: &str) -> Result<ExecOutcome> {
        match self.client.delete_user().user_id(user_id).send().await {
            Ok(_) => Ok(ExecOutcome::Applied),
            Err(e) if is_user_not_found(&e) => Ok(ExecOutcome::AlreadyAbsent),
            Err(e) => Err(aws::classify(PROVIDER, e)),
        }
    }
}

async fn group_ids(session: &AwsSession) -> Result<Vec<String>> {
    let output = session
        .client
        .describe_replication_groups()
        .replication_group_id(&session.cluster_name)
        .send()
        .await
        .map_err(|e| aws::classify(PROVIDER, e))?;

    Ok(output
        .replication_groups()
        .iter()
        .flat_map(|group| group.user_group_ids().iter().cloned())
        .collect())
}

/// Deadlines for each provisioning phase.
///
/// The rollback keeps its own budget, so a slow activation can never consume
/// the time needed to delete the user again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Phases {
    create: Duration,
    attach: Duration,
    rollback: Duration,
}

impl Phases {
    fn new(operation: Duration) -> Self {
        Self {
            create: operation,
            attach: operation,
            rollback: operation,
        }
    }

    fn total(&self) -> Duration {
        self.create + self.attach + self.rollback
    }
}

async fn bounded<T>(
    deadline: Duration,
    phase: &str,
    work: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(Error::connection(
            PROVIDER,
            format!("{} timed out after {:?}", phase, deadline),
        )),
    }
}

async fn attach<D: UserDirectory + ?Sized>(directory: &D, user_id: &str) -> Result<()> {
    loop {
        let status = directory.user_status(user_id).await?;
        if status.as_deref() == Some("active") {
            break;
        }
        debug!(provider = %PROVIDER, status = ?status, "Waiting for user to become active");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    for group in directory.group_ids().await? {
        directory.add_to_group(&group, user_id).await?;
    }
    Ok(())
}

async fn provision<D: UserDirectory + ?Sized>(
    directory: &D,
    request: &CreateUserRequest,
    phases: Phases,
) -> Result<ExecOutcome> {
    let created = bounded(phases.create, "user creation", directory.create_user(request)).await;
    match created {
        Ok(()) => {}
        // A refused request created nothing.
        Err(err) if !err.is_retryable() => return Err(err),
        Err(err) => return roll_back(directory, &request.user_id, phases.rollback, err).await,
    }

    let attached = bounded(
        phases.attach,
        "user activation",
        attach(directory, &request.user_id),
    )
    .await;
    match attached {
        Ok(()) => {
            info!(provider = %PROVIDER, "User created and attached to cluster groups");
            Ok(ExecOutcome::Applied)
        }
        Err(err) => roll_back(directory, &request.user_id, phases.rollback, err).await,
    }
}

/// Delete a user whose provisioning failed midway. Always returns an error.
async fn roll_back<D: UserDirectory + ?Sized>(
    directory: &D,
    user_id: &str,
    deadline: Duration,
    cause: Error,
) -> Result<ExecOutcome> {
    match bounded(deadline, "rollback", directory.delete_user(user_id)).await {
        Ok(outcome) => {
            warn!(provider = %PROVIDER, ?outcome, error = %cause, "Rolled back partially created user");
            Err(cause)
        }
        Err(rollback_err) => {
            warn!(provider = %PROVIDER, error = %rollback_err, "Rollback of partially created user failed");
            Err(Error::ProvisioningFailed {
                provider: PROVIDER,
                entity_id: Some(user_id.to_string()),
                message: format!("{}; rollback failed: {}", cause, rollback_err),
            })
        }
    }
}

async fn revoke(session: &AwsSession, user_id: &str) -> Result<ExecOutcome> {
    let described = session.client.describe_users().user_id(user_id).send().await;
    let groups = match described {
        Ok(output) => output
            .users()
            .first()
            .map(|u| u.user_group_ids().to_vec())
            .unwrap_or_default(),
        Err(e) if is_user_not_found(&e) => return Ok(ExecOutcome::AlreadyAbsent),
        Err(e) => return Err(aws::classify(PROVIDER, e)),
    };

    for group in groups {
        if let Err(e) = session
            .client
            .modify_user_group()
            .user_group_id(&group)
            .user_ids_to_remove(user_id)
            .send()
            .await
        {
            warn!(provider = %PROVIDER, group = %group, error = %aws::classify(PROVIDER, e), "Failed to detach user from group");
        }
    }

    session.delete_user(user_id).await
}

fn is_user_not_found<E, R>(err: &aws_sdk_elasticache::error::SdkError<E, R>) -> bool
where
    E: aws_sdk_elasticache::error::ProvideErrorMetadata,
{
    aws::error_code(err).is_some_and(|code| USER_NOT_FOUND.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_parse_create_request() {
        let request: CreateUserRequest = parse(
            r#"{
                "UserId": "abc",
                "UserName": "abc",
                "Passwords": ["secret-secret-secret"],
                "AccessString": "on ~* +@all"
            }"#,
        )
        .unwrap();
        assert_eq!(request.user_id, "abc");
        assert_eq!(request.engine, "redis");
        assert_eq!(request.passwords.len(), 1);
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse::<DeleteUserRequest>("DELETE abc").unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));
    }

    /// In-memory directory recording every call.
    struct FakeDirectory {
        status: &'static str,
        groups: Vec<&'static str>,
        create_hangs: bool,
        delete_fails: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeDirectory {
        fn new(status: &'static str) -> Self {
            Self {
                status,
                groups: vec!["g1", "g2"],
                create_hangs: false,
                delete_fails: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl UserDirectory for FakeDirectory {
        async fn create_user(&self, request: &CreateUserRequest) -> Result<()> {
            self.record(format!("create {}", request.user_id));
            if self.create_hangs {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(())
        }

        async fn user_status(&self, _user_id: &str) -> Result<Option<String>> {
            Ok(Some(self.status.to_string()))
        }

        async fn group_ids(&self) -> Result<Vec<String>> {
            Ok(self.groups.iter().map(|g| g.to_string()).collect())
        }

        async fn add_to_group(&self, group: &str, user_id: &str) -> Result<()> {
            self.record(format!("add {} {}", group, user_id));
            Ok(())
        }

        async fn delete_user(&self, user_id: &str) -> Result<ExecOutcome> {
            self.record(format!("delete {}", user_id));
            if self.delete_fails {
                return Err(Error::connection(PROVIDER, "throttled"));
            }
            Ok(ExecOutcome::Applied)
        }
    }

    fn request() -> CreateUserRequest {
        CreateUserRequest {
            user_id: "abc".to_string(),
            user_name: "abc".to_string(),
            engine: default_engine(),
            passwords: vec!["secret-secret-secret".to_string()],
            access_string: "on ~* +@all".to_string(),
        }
    }

    fn short() -> Phases {
        Phases::new(Duration::from_millis(50))
    }

    #[test]
    fn test_session_outlives_every_phase() {
        let phases = Phases::new(Duration::from_secs(15));
        assert_eq!(phases.total(), Duration::from_secs(45));
        assert!(phases.attach + phases.rollback < phases.total());
    }

    #[tokio::test]
    async fn test_active_user_joins_every_group() {
        let directory = FakeDirectory::new("active");
        let outcome = provision(&directory, &request(), short()).await.unwrap();
        assert_eq!(outcome, ExecOutcome::Applied);
        assert_eq!(directory.calls(), vec!["create abc", "add g1 abc", "add g2 abc"]);
    }

    #[tokio::test]
    async fn test_activation_timeout_deletes_user() {
        let directory = FakeDirectory::new("creating");
        let err = provision(&directory, &request(), short()).await.unwrap_err();

        assert!(err.is_retryable(), "unexpected error: {err}");
        assert!(err.to_string().contains("user activation timed out"));
        assert_eq!(directory.calls(), vec!["create abc", "delete abc"]);
    }

    #[tokio::test]
    async fn test_failed_rollback_reports_user_id() {
        let mut directory = FakeDirectory::new("creating");
        directory.delete_fails = true;
        let err = provision(&directory, &request(), short()).await.unwrap_err();

        match err {
            Error::ProvisioningFailed { entity_id, message, .. } => {
                assert_eq!(entity_id.as_deref(), Some("abc"));
                assert!(message.contains("rollback failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_timeout_still_rolls_back() {
        let mut directory = FakeDirectory::new("active");
        directory.create_hangs = true;
        directory.delete_fails = true;
        let err = provision(&directory, &request(), short()).await.unwrap_err();

        assert!(matches!(
            err,
            Error::ProvisioningFailed { entity_id: Some(ref id), .. } if id == "abc"
        ));
        assert_eq!(directory.calls(), vec!["create abc", "delete abc"]);
    }
}
