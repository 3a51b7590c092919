//! Provider types and their normalized configuration inputs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of external system families a lease can be issued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "sql-database")]
    SqlDatabase,
    #[serde(rename = "cassandra")]
    Cassandra,
    #[serde(rename = "aws-iam")]
    AwsIam,
    #[serde(rename = "redis")]
    Redis,
    #[serde(rename = "aws-elasticache")]
    AwsElastiCache,
    #[serde(rename = "mongo-db-atlas")]
    MongoAtlas,
    #[serde(rename = "elastic-search")]
    ElasticSearch,
}

impl ProviderType {
    pub const ALL: [ProviderType; 7] = [
        ProviderType::SqlDatabase,
        ProviderType::Cassandra,
        ProviderType::AwsIam,
        ProviderType::Redis,
        ProviderType::AwsElastiCache,
        ProviderType::MongoAtlas,
        ProviderType::ElasticSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::SqlDatabase => "sql-database",
            ProviderType::Cassandra => "cassandra",
            ProviderType::AwsIam => "aws-iam",
            ProviderType::Redis => "redis",
            ProviderType::AwsElastiCache => "aws-elasticache",
            ProviderType::MongoAtlas => "mongo-db-atlas",
            ProviderType::ElasticSearch => "elastic-search",
        }
    }

    /// Whether the provider is driven by administrator-authored statements.
    pub fn is_statement_based(&self) -> bool {
        !matches!(self, ProviderType::AwsIam | ProviderType::MongoAtlas)
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| crate::Error::UnsupportedProvider(s.to_string()))
    }
}

/// SQL dialect spoken by a `sql-database` provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlClient {
    #[serde(rename = "postgres")]
    Postgres,
    #[serde(rename = "mysql2")]
    MySql,
    #[serde(rename = "oracledb")]
    Oracle,
    #[serde(rename = "mssql")]
    MsSql,
}

impl SqlClient {
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlClient::Postgres => "postgres",
            SqlClient::MySql => "mysql2",
            SqlClient::Oracle => "oracledb",
            SqlClient::MsSql => "mssql",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "postgres" => Some(SqlClient::Postgres),
            "mysql2" | "mysql" => Some(SqlClient::MySql),
            "oracledb" | "oracle" => Some(SqlClient::Oracle),
            "mssql" => Some(SqlClient::MsSql),
            _ => None,
        }
    }
}

impl fmt::Display for SqlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlDatabaseInputs {
    pub client: SqlClient,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub creation_statement: String,
    pub revocation_statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CassandraInputs {
    pub host: String,
    pub port: u16,
    pub local_data_center: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
    pub username: String,
    pub password: String,
    pub creation_statement: String,
    pub revocation_statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsIamInputs {
    pub access_key: String,
    pub secret_access_key: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_boundary_policy_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_document: Option<String>,
    /// Comma-separated IAM group names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_groups: Option<String>,
    /// Comma-separated managed policy ARNs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_arns: Option<String>,
}

impl AwsIamInputs {
    pub fn user_group_list(&self) -> Vec<String> {
        split_csv(self.user_groups.as_deref())
    }

    pub fn policy_arn_list(&self) -> Vec<String> {
        split_csv(self.policy_arns.as_deref())
    }
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisInputs {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub creation_statement: String,
    pub revocation_statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_statement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsElastiCacheInputs {
    pub cluster_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub creation_statement: String,
    pub revocation_statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoAtlasRole {
    pub database_name: String,
    pub role_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MongoAtlasScope {
    pub name: String,
    #[serde(rename = "type")]
    pub scope_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MongoAtlasInputs {
    pub admin_public_key: String,
    pub admin_private_key: String,
    /// Atlas project id.
    pub group_id: String,
    pub roles: Vec<MongoAtlasRole>,
    #[serde(default)]
    pub scopes: Vec<MongoAtlasScope>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ElasticSearchAuth {
    #[serde(rename = "user")]
    User { username: String, password: String },
    #[serde(rename = "api-key", rename_all = "camelCase")]
    ApiKey { api_key: String, api_key_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticSearchInputs {
    pub host: String,
    pub port: u16,
    pub auth: ElasticSearchAuth,
    pub creation_statement: String,
    pub revocation_statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,
}

/// Validated provider configuration: the provider type together with its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "inputs")]
pub enum ProviderConfig {
    #[serde(rename = "sql-database")]
    SqlDatabase(SqlDatabaseInputs),
    #[serde(rename = "cassandra")]
    Cassandra(CassandraInputs),
    #[serde(rename = "aws-iam")]
    AwsIam(AwsIamInputs),
    #[serde(rename = "redis")]
    Redis(RedisInputs),
    #[serde(rename = "aws-elasticache")]
    AwsElastiCache(AwsElastiCacheInputs),
    #[serde(rename = "mongo-db-atlas")]
    MongoAtlas(MongoAtlasInputs),
    #[serde(rename = "elastic-search")]
    ElasticSearch(ElasticSearchInputs),
}

/// Administrator-authored statements bound to one provider configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementSet<'a> {
    pub creation: &'a str,
    pub renew: Option<&'a str>,
    pub revocation: &'a str,
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderConfig::SqlDatabase(_) => ProviderType::SqlDatabase,
            ProviderConfig::Cassandra(_) => ProviderType::Cassandra,
            ProviderConfig::AwsIam(_) => ProviderType::AwsIam,
            ProviderConfig::Redis(_) => ProviderType::Redis,
            ProviderConfig::AwsElastiCache(_) => ProviderType::AwsElastiCache,
            ProviderConfig::MongoAtlas(_) => ProviderType::MongoAtlas,
            ProviderConfig::ElasticSearch(_) => ProviderType::ElasticSearch,
        }
    }

    /// Statement set for statement-based providers, `None` for API-based ones.
    pub fn statements(&self) -> Option<StatementSet<'_>> {
        match self {
            ProviderConfig::SqlDatabase(i) => Some(StatementSet {
                creation: &i.creation_statement,
                renew: i.renew_statement.as_deref(),
                revocation: &i.revocation_statement,
            }),
            ProviderConfig::Cassandra(i) => Some(StatementSet {
                creation: &i.creation_statement,
                renew: i.renew_statement.as_deref(),
                revocation: &i.revocation_statement,
            }),
            ProviderConfig::Redis(i) => Some(StatementSet {
                creation: &i.creation_statement,
                renew: i.renew_statement.as_deref(),
                revocation: &i.revocation_statement,
            }),
            ProviderConfig::AwsElastiCache(i) => Some(StatementSet {
                creation: &i.creation_statement,
                renew: None,
                revocation: &i.revocation_statement,
            }),
            ProviderConfig::ElasticSearch(i) => Some(StatementSet {
                creation: &i.creation_statement,
                renew: None,
                revocation: &i.revocation_statement,
            }),
            ProviderConfig::AwsIam(_) | ProviderConfig::MongoAtlas(_) => None,
        }
    }

    /// PEM-encoded CA bundle to trust when connecting, if supplied.
    pub fn ca(&self) -> Option<&str> {
        match self {
            ProviderConfig::SqlDatabase(i) => i.ca.as_deref(),
            ProviderConfig::Cassandra(i) => i.ca.as_deref(),
            ProviderConfig::Redis(i) => i.ca.as_deref(),
            ProviderConfig::AwsElastiCache(i) => i.ca.as_deref(),
            ProviderConfig::ElasticSearch(i) => i.ca.as_deref(),
            ProviderConfig::AwsIam(_) | ProviderConfig::MongoAtlas(_) => None,
        }
    }
}
