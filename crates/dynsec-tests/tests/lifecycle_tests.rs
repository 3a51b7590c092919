//! Lease lifecycle tests against the recording broker.
//!
//! Run with: `cargo test -p dynsec-tests --test lifecycle_tests`

use chrono::Utc;
use dynsec_core::credentials::format_expiration;
use dynsec_core::{Error, LeaseStatus, ProviderType, schema};
use dynsec_lifecycle::LifecycleConfig;
use dynsec_providers::Intent;
use dynsec_tests::{ProviderFixture, RecordingBroker, init_test_logging};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_postgres_lease_with_one_hour_ttl() {
    init_test_logging();
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::SqlDatabase);

    let before = Utc::now();
    let grant = manager
        .create_lease(&config, Some(Duration::from_secs(3600)))
        .await
        .expect("Failed to create lease");

    let ttl = grant.lease.expire_at - before;
    assert!(ttl >= chrono::Duration::seconds(3599) && ttl <= chrono::Duration::seconds(3601));
    assert_eq!(grant.lease.status, LeaseStatus::Active);
    assert_eq!(grant.data["DB_USERNAME"], json!(grant.lease.entity_id));
    assert!(!grant.data["DB_PASSWORD"].as_str().unwrap_or_default().is_empty());

    let calls = broker.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].provider, ProviderType::SqlDatabase);
    assert_eq!(calls[0].intent, Intent::Provision);
    assert!(calls[0].script.contains(&format!("CREATE ROLE \"{}\"", grant.lease.entity_id)));
    assert!(calls[0].script.contains(&format_expiration(grant.lease.expire_at)));
    assert!(!calls[0].script.contains("{{"));
}

#[tokio::test]
async fn test_create_revoke_revoke() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::Redis);

    let grant = manager.create_lease(&config, None).await.unwrap();
    let entity_id = grant.lease.entity_id.clone();

    let first = manager.revoke_lease(&config, &entity_id).await.unwrap();
    let second = manager.revoke_lease(&config, &entity_id).await.unwrap();

    assert_eq!(first.status, LeaseStatus::Revoked);
    assert_eq!(second.status, LeaseStatus::Revoked);
    assert_eq!(broker.intents(), vec![Intent::Provision, Intent::Revoke]);
    assert_eq!(broker.calls()[1].script, format!("ACL DELUSER {}", entity_id));
}

#[tokio::test]
async fn test_revoke_of_absent_principal_succeeds() {
    let broker = RecordingBroker::new().absent();
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::Cassandra);

    let grant = manager.create_lease(&config, None).await.unwrap();
    let lease = manager
        .revoke_lease(&config, &grant.lease.entity_id)
        .await
        .unwrap();
    assert_eq!(lease.status, LeaseStatus::Revoked);
}

#[tokio::test]
async fn test_renew_after_revoke_is_rejected() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::SqlDatabase);

    let grant = manager.create_lease(&config, None).await.unwrap();
    manager
        .revoke_lease(&config, &grant.lease.entity_id)
        .await
        .unwrap();

    let err = manager
        .renew_lease(&config, &grant.lease.entity_id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::LeaseNotActive {
            status: Some(LeaseStatus::Revoked),
            ..
        }
    ));
    assert!(!broker.intents().contains(&Intent::Extend));
}

#[tokio::test]
async fn test_renew_unknown_entity() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::SqlDatabase);

    let err = manager.renew_lease(&config, "nobody", None).await.unwrap_err();
    assert!(matches!(err, Error::LeaseNotActive { status: None, .. }));
    assert!(broker.calls().is_empty());
}

#[tokio::test]
async fn test_native_renew_runs_renew_statement() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::SqlDatabase);

    let grant = manager
        .create_lease(&config, Some(Duration::from_secs(600)))
        .await
        .unwrap();
    let renewed = manager
        .renew_lease(&config, &grant.lease.entity_id, Some(Duration::from_secs(3600)))
        .await
        .unwrap();

    assert!(renewed.expire_at > grant.lease.expire_at);
    assert_eq!(renewed.id, grant.lease.id);
    let calls = broker.calls();
    assert_eq!(calls[1].intent, Intent::Extend);
    assert_eq!(
        calls[1].script,
        format!(
            "ALTER ROLE \"{}\" VALID UNTIL '{}';",
            grant.lease.entity_id,
            format_expiration(renewed.expire_at)
        )
    );
}

#[tokio::test]
async fn test_logical_renew_skips_target() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::Redis);

    let grant = manager
        .create_lease(&config, Some(Duration::from_secs(60)))
        .await
        .unwrap();
    let renewed = manager
        .renew_lease(&config, &grant.lease.entity_id, Some(Duration::from_secs(600)))
        .await
        .unwrap();

    assert!(renewed.expire_at > grant.lease.expire_at);
    assert_eq!(broker.intents(), vec![Intent::Provision]);
}

#[tokio::test]
async fn test_logical_renew_refused_when_disabled() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default().with_logical_renewal(false));
    let config = ProviderFixture::config(ProviderType::ElasticSearch);

    let grant = manager.create_lease(&config, None).await.unwrap();
    let err = manager
        .renew_lease(&config, &grant.lease.entity_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RenewUnsupported(ProviderType::ElasticSearch)));
}

#[tokio::test]
async fn test_renew_of_expired_lease_is_rejected() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::SqlDatabase);

    let grant = manager
        .create_lease(&config, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let err = manager
        .renew_lease(&config, &grant.lease.entity_id, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::LeaseNotActive {
            status: Some(LeaseStatus::Expired),
            ..
        }
    ));

    let due = manager.due_for_revocation(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].entity_id, grant.lease.entity_id);
}

#[tokio::test]
async fn test_ttl_bounds() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(
        LifecycleConfig::default().with_max_ttl(Duration::from_secs(7200)),
    );
    let config = ProviderFixture::config(ProviderType::Redis);

    for ttl in [Duration::ZERO, Duration::from_secs(7201)] {
        match manager.create_lease(&config, Some(ttl)).await.unwrap_err() {
            Error::Validation(v) => assert!(v.mentions("ttl")),
            other => panic!("unexpected error: {other}"),
        }
    }
    assert!(broker.calls().is_empty());

    manager
        .create_lease(&config, Some(Duration::from_secs(7200)))
        .await
        .expect("ttl equal to the maximum is allowed");
}

#[tokio::test]
async fn test_template_error_never_reaches_target() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default());
    let mut raw = ProviderFixture::raw(ProviderType::SqlDatabase);
    raw["creationStatement"] = json!("CREATE ROLE {{username}} IN GROUP {{group}};");
    let config = schema::validate(ProviderType::SqlDatabase, &raw).unwrap();

    let err = manager.create_lease(&config, None).await.unwrap_err();
    assert!(matches!(err, Error::Template(_)), "unexpected error: {err}");
    assert!(broker.calls().is_empty());
    assert!(manager.due_for_revocation(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_statement_is_provisioning_failure() {
    let broker = RecordingBroker::new().rejecting(Intent::Provision);
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::Redis);

    let err = manager.create_lease(&config, None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ProvisioningFailed {
            provider: ProviderType::Redis,
            entity_id: None,
            ..
        }
    ));
    assert!(!err.is_retryable());
}

/// Role name from a rendered `CREATE ROLE <name> ...` statement.
fn created_role(script: &str) -> String {
    script.split_whitespace().nth(2).unwrap().to_string()
}

#[tokio::test]
async fn test_partial_create_is_rolled_back() {
    let broker = RecordingBroker::new().failing_statement(1);
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::Cassandra);

    let err = manager.create_lease(&config, None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ProvisioningFailed {
            provider: ProviderType::Cassandra,
            entity_id: None,
            ..
        }
    ));

    let calls = broker.calls();
    assert_eq!(broker.intents(), vec![Intent::Provision, Intent::Revoke]);
    let role = created_role(&calls[0].script);
    assert_eq!(calls[1].script, format!("DROP ROLE {};", role));
    assert!(manager.due_for_revocation(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_rollback_surfaces_entity_id() {
    let broker = RecordingBroker::new()
        .failing_statement(1)
        .rejecting(Intent::Revoke);
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::Cassandra);

    let err = manager.create_lease(&config, None).await.unwrap_err();
    let role = created_role(&broker.calls()[0].script);
    match err {
        Error::ProvisioningFailed {
            entity_id, message, ..
        } => {
            assert_eq!(entity_id, Some(role.clone()));
            assert!(message.contains("rollback failed"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The leaked role is reported, not leased.
    let err = manager.renew_lease(&config, &role, None).await.unwrap_err();
    assert!(matches!(err, Error::LeaseNotActive { status: None, .. }));
}

#[tokio::test]
async fn test_first_statement_refused_needs_no_rollback() {
    let broker = RecordingBroker::new().failing_statement(0);
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::Cassandra);

    let err = manager.create_lease(&config, None).await.unwrap_err();
    assert!(matches!(err, Error::ProvisioningFailed { entity_id: None, .. }));
    assert_eq!(broker.intents(), vec![Intent::Provision]);
}

#[tokio::test]
async fn test_unreachable_target_is_retryable() {
    let broker = RecordingBroker::new().unreachable();
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::Redis);

    let err = manager.create_lease(&config, None).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionFailed { .. }));
    assert!(err.is_retryable());

    assert!(manager.test_connection(&config).await.is_err());
    assert_eq!(broker.ping_count(), 1);
}

#[tokio::test]
async fn test_failed_revoke_keeps_lease_active() {
    let broker = RecordingBroker::new().rejecting(Intent::Revoke);
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::SqlDatabase);

    let grant = manager.create_lease(&config, None).await.unwrap();
    let err = manager
        .revoke_lease(&config, &grant.lease.entity_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Rejected { .. }));

    let renewed = manager
        .renew_lease(&config, &grant.lease.entity_id, None)
        .await
        .expect("lease stays active after a failed revoke");
    assert_eq!(renewed.status, LeaseStatus::Active);
}

#[tokio::test]
async fn test_provider_mismatch() {
    let broker = RecordingBroker::new();
    let manager = broker.manager(LifecycleConfig::default());
    let redis = ProviderFixture::config(ProviderType::Redis);
    let sql = ProviderFixture::config(ProviderType::SqlDatabase);

    let grant = manager.create_lease(&redis, None).await.unwrap();
    let err = manager
        .revoke_lease(&sql, &grant.lease.entity_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ProviderMismatch {
            expected: ProviderType::Redis,
            actual: ProviderType::SqlDatabase,
        }
    ));
    assert_eq!(broker.intents(), vec![Intent::Provision]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_renew_and_revoke() {
    init_test_logging();
    let broker = RecordingBroker::new().with_delay(Duration::from_millis(50));
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::SqlDatabase);

    let grant = manager.create_lease(&config, None).await.unwrap();
    let entity_id = grant.lease.entity_id.clone();

    let (renewed, revoked) = tokio::join!(
        manager.renew_lease(&config, &entity_id, None),
        manager.revoke_lease(&config, &entity_id),
    );

    assert_eq!(revoked.unwrap().status, LeaseStatus::Revoked);
    let intents = broker.intents();
    match renewed {
        Ok(_) => assert_eq!(intents, vec![Intent::Provision, Intent::Extend, Intent::Revoke]),
        Err(Error::LeaseNotActive { .. }) => {
            assert_eq!(intents, vec![Intent::Provision, Intent::Revoke])
        }
        Err(other) => panic!("unexpected error: {other}"),
    }

    let err = manager.renew_lease(&config, &entity_id, None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::LeaseNotActive {
            status: Some(LeaseStatus::Revoked),
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_are_independent() {
    let broker = RecordingBroker::new().with_delay(Duration::from_millis(10));
    let manager = broker.manager(LifecycleConfig::default());
    let config = ProviderFixture::config(ProviderType::Redis);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            let config = config.clone();
            tokio::spawn(async move { manager.create_lease(&config, None).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().lease.entity_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(broker.calls().len(), 8);
}
