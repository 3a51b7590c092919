//! Structural validation of raw provider inputs.
//!
//! Every provider type owns a fixed schema. Validation trims strings,
//! lower-cases hosts, collects every violation with its field path and
//! never touches the network.

use crate::error::ValidationError;
use crate::provider::*;
use serde_json::{Map, Value};

/// Validate and normalize `raw` as the inputs of `provider`.
pub fn validate(provider: ProviderType, raw: &Value) -> Result<ProviderConfig, ValidationError> {
    let Some(object) = raw.as_object() else {
        return Err(ValidationError::single("inputs", "expected an object"));
    };

    let mut errors = ValidationError::default();
    let config = {
        let mut reader = Reader::new(object, String::new(), &mut errors);
        match provider {
            ProviderType::SqlDatabase => ProviderConfig::SqlDatabase(sql_database(&mut reader)),
            ProviderType::Cassandra => ProviderConfig::Cassandra(cassandra(&mut reader)),
            ProviderType::AwsIam => ProviderConfig::AwsIam(aws_iam(&mut reader)),
            ProviderType::Redis => ProviderConfig::Redis(redis(&mut reader)),
            ProviderType::AwsElastiCache => {
                ProviderConfig::AwsElastiCache(aws_elasticache(&mut reader))
            }
            ProviderType::MongoAtlas => ProviderConfig::MongoAtlas(mongo_atlas(&mut reader)),
            ProviderType::ElasticSearch => {
                ProviderConfig::ElasticSearch(elastic_search(&mut reader))
            }
        }
    };

    if errors.is_empty() {
        Ok(config)
    } else {
        Err(errors)
    }
}

/// Validate a full `{ "type": ..., "inputs": { ... } }` document.
pub fn validate_document(raw: &Value) -> crate::Result<ProviderConfig> {
    let tag = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::single("type", "is required"))?;
    let provider: ProviderType = tag.parse()?;
    let inputs = raw.get("inputs").unwrap_or(&Value::Null);
    Ok(validate(provider, inputs)?)
}

fn sql_database(r: &mut Reader<'_, '_>) -> SqlDatabaseInputs {
    SqlDatabaseInputs {
        client: r.sql_client("client"),
        host: r.host("host"),
        port: r.port("port"),
        database: r.string("database"),
        username: r.string("username"),
        password: r.string("password"),
        creation_statement: r.non_empty("creationStatement"),
        revocation_statement: r.non_empty("revocationStatement"),
        renew_statement: r.optional("renewStatement"),
        ca: r.certificate("ca"),
    }
}

fn cassandra(r: &mut Reader<'_, '_>) -> CassandraInputs {
    CassandraInputs {
        host: r.host("host"),
        port: r.port("port"),
        local_data_center: r.non_empty("localDataCenter"),
        keyspace: r.optional("keyspace"),
        username: r.string("username"),
        password: r.string("password"),
        creation_statement: r.non_empty("creationStatement"),
        revocation_statement: r.non_empty("revocationStatement"),
        renew_statement: r.optional("renewStatement"),
        ca: r.certificate("ca"),
    }
}

fn aws_iam(r: &mut Reader<'_, '_>) -> AwsIamInputs {
    AwsIamInputs {
        access_key: r.non_empty("accessKey"),
        secret_access_key: r.non_empty("secretAccessKey"),
        region: r.non_empty("region"),
        aws_path: r.optional("awsPath"),
        permission_boundary_policy_arn: r.optional("permissionBoundaryPolicyArn"),
        policy_document: r.optional("policyDocument"),
        user_groups: r.optional("userGroups"),
        policy_arns: r.optional("policyArns"),
    }
}

fn redis(r: &mut Reader<'_, '_>) -> RedisInputs {
    RedisInputs {
        host: r.host("host"),
        port: r.port("port"),
        username: r.string("username"),
        password: r.optional("password"),
        creation_statement: r.non_empty("creationStatement"),
        revocation_statement: r.non_empty("revocationStatement"),
        renew_statement: r.optional("renewStatement"),
        ca: r.certificate("ca"),
    }
}

fn aws_elasticache(r: &mut Reader<'_, '_>) -> AwsElastiCacheInputs {
    AwsElastiCacheInputs {
        cluster_name: r.non_empty("clusterName"),
        access_key_id: r.non_empty("accessKeyId"),
        secret_access_key: r.non_empty("secretAccessKey"),
        region: r.string("region"),
        creation_statement: r.non_empty("creationStatement"),
        revocation_statement: r.non_empty("revocationStatement"),
        ca: r.certificate("ca"),
    }
}

fn mongo_atlas(r: &mut Reader<'_, '_>) -> MongoAtlasInputs {
    let admin_public_key = r.non_empty("adminPublicKey");
    let admin_private_key = r.non_empty("adminPrivateKey");
    let group_id = r.non_empty("groupId");

    let role_objects = r.objects("roles");
    if role_objects.as_ref().is_some_and(Vec::is_empty) {
        r.issue("roles", "must contain at least one role");
    }
    let roles = role_objects
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, obj)| {
            let mut role = r.nested(obj, format!("roles[{}]", i));
            MongoAtlasRole {
                database_name: role.non_empty("databaseName"),
                role_name: role.non_empty("roleName"),
                collection_name: role.optional("collectionName"),
            }
        })
        .collect();

    let scopes = r
        .objects("scopes")
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, obj)| {
            let mut scope = r.nested(obj, format!("scopes[{}]", i));
            MongoAtlasScope {
                name: scope.non_empty("name"),
                scope_type: scope.non_empty("type"),
            }
        })
        .collect();

    MongoAtlasInputs {
        admin_public_key,
        admin_private_key,
        group_id,
        roles,
        scopes,
    }
}

fn elastic_search(r: &mut Reader<'_, '_>) -> ElasticSearchInputs {
    let host = r.non_empty("host");
    let port = r.port("port");
    let auth = match r.object("auth") {
        Some(obj) => {
            let mut auth = r.nested(obj, "auth".to_string());
            elastic_search_auth(&mut auth)
        }
        None => placeholder_auth(),
    };

    ElasticSearchInputs {
        host,
        port,
        auth,
        creation_statement: r.non_empty("creationStatement"),
        revocation_statement: r.non_empty("revocationStatement"),
        ca: r.certificate("ca"),
    }
}

const USER_AUTH_FIELDS: [&str; 2] = ["username", "password"];
const API_KEY_AUTH_FIELDS: [&str; 2] = ["apiKey", "apiKeyId"];

fn elastic_search_auth(r: &mut Reader<'_, '_>) -> ElasticSearchAuth {
    match r.string("type").as_str() {
        "user" => {
            r.forbid(&API_KEY_AUTH_FIELDS, "not allowed with auth type 'user'");
            ElasticSearchAuth::User {
                username: r.string("username"),
                password: r.string("password"),
            }
        }
        "api-key" => {
            r.forbid(&USER_AUTH_FIELDS, "not allowed with auth type 'api-key'");
            ElasticSearchAuth::ApiKey {
                api_key: r.string("apiKey"),
                api_key_id: r.string("apiKeyId"),
            }
        }
        "" if !r.has("type") => placeholder_auth(),
        _ => {
            r.issue("type", "must be one of: user, api-key");
            placeholder_auth()
        }
    }
}

fn placeholder_auth() -> ElasticSearchAuth {
    ElasticSearchAuth::User {
        username: String::new(),
        password: String::new(),
    }
}

/// Reads fields from one JSON object, recording issues under a path prefix.
///
/// Accessors always return a value so a whole document can be walked in one
/// pass; the caller discards the result when any issue was recorded.
struct Reader<'v, 'e> {
    object: &'v Map<String, Value>,
    prefix: String,
    errors: &'e mut ValidationError,
}

impl<'v, 'e> Reader<'v, 'e> {
    fn new(object: &'v Map<String, Value>, prefix: String, errors: &'e mut ValidationError) -> Self {
        Self {
            object,
            prefix,
            errors,
        }
    }

    fn nested<'n>(&'n mut self, object: &'v Map<String, Value>, prefix: String) -> Reader<'v, 'n> {
        Reader::new(object, prefix, &mut *self.errors)
    }

    fn path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.prefix, key)
        }
    }

    fn issue(&mut self, key: &str, message: &str) {
        let path = self.path(key);
        self.errors.push(path, message);
    }

    fn has(&self, key: &str) -> bool {
        self.object.get(key).is_some_and(|v| !v.is_null())
    }

    fn raw_str(&mut self, key: &str) -> Option<&'v str> {
        let object: &'v Map<String, Value> = self.object;
        match object.get(key) {
            None | Some(Value::Null) => {
                self.issue(key, "is required");
                None
            }
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                self.issue(key, "expected a string");
                None
            }
        }
    }

    /// Required string, trimmed. Empty is allowed.
    fn string(&mut self, key: &str) -> String {
        self.raw_str(key).map(|s| s.trim().to_string()).unwrap_or_default()
    }

    /// Required string, trimmed, at least one character.
    fn non_empty(&mut self, key: &str) -> String {
        let Some(value) = self.raw_str(key) else {
            return String::new();
        };
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.issue(key, "must not be empty");
        }
        trimmed.to_string()
    }

    /// Optional string, trimmed; blank counts as absent.
    fn optional(&mut self, key: &str) -> Option<String> {
        let object: &'v Map<String, Value> = self.object;
        match object.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Some(_) => {
                self.issue(key, "expected a string");
                None
            }
        }
    }

    /// Optional PEM bundle, kept byte-for-byte.
    fn certificate(&mut self, key: &str) -> Option<String> {
        let object: &'v Map<String, Value> = self.object;
        match object.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.issue(key, "expected a string");
                None
            }
        }
    }

    fn host(&mut self, key: &str) -> String {
        let host = self.non_empty(key);
        host.to_lowercase()
    }

    fn port(&mut self, key: &str) -> u16 {
        let object: &'v Map<String, Value> = self.object;
        match object.get(key) {
            None | Some(Value::Null) => {
                self.issue(key, "is required");
                0
            }
            Some(Value::Number(n)) => match n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) if port > 0 => port,
                _ => {
                    self.issue(key, "must be an integer between 1 and 65535");
                    0
                }
            },
            Some(_) => {
                self.issue(key, "expected a number");
                0
            }
        }
    }

    fn sql_client(&mut self, key: &str) -> SqlClient {
        let Some(value) = self.raw_str(key) else {
            return SqlClient::Postgres;
        };
        SqlClient::parse(value.trim()).unwrap_or_else(|| {
            self.issue(key, "must be one of: postgres, mysql2, oracledb, mssql");
            SqlClient::Postgres
        })
    }

    fn object(&mut self, key: &str) -> Option<&'v Map<String, Value>> {
        let object: &'v Map<String, Value> = self.object;
        match object.get(key) {
            None | Some(Value::Null) => {
                self.issue(key, "is required");
                None
            }
            Some(Value::Object(obj)) => Some(obj),
            Some(_) => {
                self.issue(key, "expected an object");
                None
            }
        }
    }

    /// Required array whose elements must all be objects.
    fn objects(&mut self, key: &str) -> Option<Vec<&'v Map<String, Value>>> {
        let object: &'v Map<String, Value> = self.object;
        let items = match object.get(key) {
            None | Some(Value::Null) => {
                self.issue(key, "is required");
                return None;
            }
            Some(Value::Array(items)) => items,
            Some(_) => {
                self.issue(key, "expected an array");
                return None;
            }
        };

        let mut objects = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            match item.as_object() {
                Some(obj) => objects.push(obj),
                None => self.issue(&format!("{}[{}]", key, i), "expected an object"),
            }
        }
        Some(objects)
    }

    fn forbid(&mut self, keys: &[&str], message: &str) {
        for key in keys {
            if self.object.contains_key(*key) {
                self.issue(key, message);
            }
        }
    }
}
