//! Input schema tests across every provider type.
//!
//! Run with: `cargo test -p dynsec-tests --test schema_tests`

use dynsec_core::provider::{ElasticSearchAuth, SqlClient};
use dynsec_core::{Error, ProviderConfig, ProviderType, schema};
use dynsec_tests::{ProviderFixture, RecordingBroker};
use serde_json::{Value, json};

fn without(mut raw: Value, field: &str) -> Value {
    raw.as_object_mut().unwrap().remove(field);
    raw
}

#[test]
fn test_all_fixtures_validate() {
    for provider in ProviderType::ALL {
        let config = schema::validate(provider, &ProviderFixture::raw(provider))
            .unwrap_or_else(|e| panic!("{} fixture rejected: {}", provider, e));
        assert_eq!(config.provider_type(), provider);
    }
}

#[test]
fn test_missing_required_field_is_named() {
    for provider in ProviderType::ALL {
        for field in ProviderFixture::required_fields(provider) {
            let raw = without(ProviderFixture::raw(provider), field);
            let err = schema::validate(provider, &raw)
                .expect_err(&format!("{} accepted without {}", provider, field));
            assert!(
                err.mentions(field),
                "{} without {} reported: {}",
                provider,
                field,
                err
            );
        }
    }
}

#[test]
fn test_all_issues_reported_at_once() {
    let raw = json!({ "host": "db", "port": 0 });
    let err = schema::validate(ProviderType::SqlDatabase, &raw).unwrap_err();
    for field in ["client", "port", "database", "creationStatement", "revocationStatement"] {
        assert!(err.mentions(field), "missing issue for {}: {}", field, err);
    }
}

#[test]
fn test_normalizes_host_and_trims() {
    let mut raw = ProviderFixture::raw(ProviderType::SqlDatabase);
    raw["host"] = json!("  DB.Example.COM ");
    raw["client"] = json!("mysql2");
    raw["renewStatement"] = json!("   ");

    let ProviderConfig::SqlDatabase(inputs) = schema::validate(ProviderType::SqlDatabase, &raw).unwrap() else {
        panic!("wrong variant");
    };
    assert_eq!(inputs.host, "db.example.com");
    assert_eq!(inputs.client, SqlClient::MySql);
    assert_eq!(inputs.renew_statement, None);
}

#[test]
fn test_ca_is_kept_verbatim() {
    let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
    let mut raw = ProviderFixture::raw(ProviderType::Redis);
    raw["ca"] = json!(pem);
    let config = schema::validate(ProviderType::Redis, &raw).unwrap();
    assert_eq!(config.ca(), Some(pem));
}

#[test]
fn test_elastic_search_auth_variants() {
    let mut raw = ProviderFixture::raw(ProviderType::ElasticSearch);
    raw["auth"] = json!({ "type": "api-key", "apiKey": "secret", "apiKeyId": "id-1" });
    let ProviderConfig::ElasticSearch(inputs) = schema::validate(ProviderType::ElasticSearch, &raw).unwrap() else {
        panic!("wrong variant");
    };
    assert_eq!(
        inputs.auth,
        ElasticSearchAuth::ApiKey {
            api_key: "secret".to_string(),
            api_key_id: "id-1".to_string(),
        }
    );
}

#[test]
fn test_elastic_search_mixed_auth_rejected() {
    let mut raw = ProviderFixture::raw(ProviderType::ElasticSearch);
    raw["auth"] = json!({
        "type": "user",
        "username": "elastic",
        "password": "changeme",
        "apiKey": "secret"
    });
    let err = schema::validate(ProviderType::ElasticSearch, &raw).unwrap_err();
    assert!(err.mentions("auth.apiKey"), "{}", err);

    raw["auth"] = json!({ "type": "oauth" });
    let err = schema::validate(ProviderType::ElasticSearch, &raw).unwrap_err();
    assert!(err.mentions("auth.type"), "{}", err);
}

#[test]
fn test_mongo_atlas_requires_a_role() {
    let mut raw = ProviderFixture::raw(ProviderType::MongoAtlas);
    raw["roles"] = json!([]);
    let err = schema::validate(ProviderType::MongoAtlas, &raw).unwrap_err();
    assert!(err.mentions("roles"));
}

#[test]
fn test_registry_applies_atlas_rules() {
    let registry = RecordingBroker::new().registry();
    let mut raw = ProviderFixture::raw(ProviderType::MongoAtlas);
    raw["groupId"] = json!("not-hex");

    match registry.validate(ProviderType::MongoAtlas, &raw).unwrap_err() {
        Error::Validation(v) => assert!(v.mentions("groupId")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_validate_document() {
    let doc = json!({
        "type": "redis",
        "inputs": ProviderFixture::raw(ProviderType::Redis),
    });
    let config = schema::validate_document(&doc).unwrap();
    assert_eq!(config.provider_type(), ProviderType::Redis);

    let doc = json!({ "type": "couchbase", "inputs": {} });
    assert!(matches!(
        schema::validate_document(&doc),
        Err(Error::UnsupportedProvider(_))
    ));
}
