//! Lifecycle configuration.

use dynsec_providers::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Lease TTL policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// TTL applied when the caller does not request one, in seconds.
    #[serde(default = "default_ttl")]
    pub default_ttl_secs: u64,
    /// Upper bound for a requested TTL and for a lease's total lifetime, in seconds.
    #[serde(default = "default_max_ttl")]
    pub max_ttl_secs: u64,
    /// Whether leases of providers without native expiry may be renewed.
    #[serde(default = "default_allow_logical_renewal")]
    pub allow_logical_renewal: bool,
}

fn default_ttl() -> u64 {
    3600 // 1 hour
}

fn default_max_ttl() -> u64 {
    86400 // 24 hours
}

fn default_allow_logical_renewal() -> bool {
    true
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl(),
            max_ttl_secs: default_max_ttl(),
            allow_logical_renewal: default_allow_logical_renewal(),
        }
    }
}

impl LifecycleConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_logical_renewal(mut self, allow: bool) -> Self {
        self.allow_logical_renewal = allow;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "default_ttl_secs must be positive".to_string(),
            ));
        }
        if self.default_ttl_secs > self.max_ttl_secs {
            return Err(ConfigError::Invalid(
                "default_ttl_secs must not exceed max_ttl_secs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynsecConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl DynsecConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.lifecycle.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynsec_core::ProviderType;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DynsecConfig::from_yaml("{}").unwrap();
        assert_eq!(config, DynsecConfig::default());
        assert_eq!(config.lifecycle.default_ttl(), Duration::from_secs(3600));
        assert_eq!(config.broker.connect_timeout_secs, 5);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
broker:
  operation_timeout_secs: 30
  overrides:
    cassandra:
      connect_timeout_secs: 10
lifecycle:
  max_ttl_secs: 7200
  allow_logical_renewal: false
"#
        )
        .unwrap();

        let config = DynsecConfig::from_file(file.path()).unwrap();
        assert_eq!(config.lifecycle.max_ttl_secs, 7200);
        assert!(!config.lifecycle.allow_logical_renewal);

        let cassandra = config.broker.timeouts_for(ProviderType::Cassandra);
        assert_eq!(cassandra.connect, Duration::from_secs(10));
        assert_eq!(cassandra.operation, Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_default_above_max() {
        let err = DynsecConfig::from_yaml("lifecycle:\n  default_ttl_secs: 90000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
