//! Lookup table from provider type to its driver.

use crate::broker::{BrokerConfig, ConnectionBroker, LiveBroker};
use crate::drivers::{
    AwsIamDriver, CassandraDriver, ElastiCacheDriver, ElasticSearchDriver, MongoAtlasDriver,
    RedisDriver, SqlDatabaseDriver,
};
use dynsec_core::ports::ProviderDriver;
use dynsec_core::{Error, ProviderConfig, ProviderType, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Immutable after construction; share it behind an `Arc`.
#[derive(Clone)]
pub struct ProviderRegistry {
    drivers: HashMap<ProviderType, Arc<dyn ProviderDriver>>,
}

impl ProviderRegistry {
    /// All seven drivers talking to real systems.
    pub fn with_defaults(config: BrokerConfig) -> Self {
        let broker: Arc<dyn ConnectionBroker> = Arc::new(LiveBroker::new(config.clone()));
        Self::with_broker(broker, config)
    }

    /// All seven drivers, with statement-based ones running through `broker`.
    pub fn with_broker(broker: Arc<dyn ConnectionBroker>, config: BrokerConfig) -> Self {
        Self::builder()
            .register(SqlDatabaseDriver::new(broker.clone()))
            .register(CassandraDriver::new(broker.clone()))
            .register(RedisDriver::new(broker.clone()))
            .register(ElastiCacheDriver::new(broker.clone()))
            .register(ElasticSearchDriver::new(broker))
            .register(AwsIamDriver::new(config.clone()))
            .register(MongoAtlasDriver::new(config))
            .build()
    }

    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Get the driver for a provider type.
    pub fn resolve(&self, provider: ProviderType) -> Result<Arc<dyn ProviderDriver>> {
        self.drivers
            .get(&provider)
            .cloned()
            .ok_or_else(|| Error::UnsupportedProvider(provider.to_string()))
    }

    /// Validate raw inputs with the driver for `provider`.
    pub fn validate(&self, provider: ProviderType, raw: &serde_json::Value) -> Result<ProviderConfig> {
        self.resolve(provider)?.validate_provider_inputs(raw)
    }

    pub fn provider_types(&self) -> Vec<ProviderType> {
        let mut types: Vec<_> = self.drivers.keys().copied().collect();
        types.sort();
        types
    }
}

#[derive(Default)]
pub struct ProviderRegistryBuilder {
    drivers: HashMap<ProviderType, Arc<dyn ProviderDriver>>,
}

impl ProviderRegistryBuilder {
    /// Register a driver, replacing any earlier one for the same provider type.
    pub fn register<D: ProviderDriver + 'static>(self, driver: D) -> Self {
        self.register_arc(Arc::new(driver))
    }

    pub fn register_arc(mut self, driver: Arc<dyn ProviderDriver>) -> Self {
        info!(provider = %driver.provider_type(), "Registering provider driver");
        self.drivers.insert(driver.provider_type(), driver);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            drivers: self.drivers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::testing::CapturingBroker;
    use serde_json::json;

    #[test]
    fn test_defaults_cover_every_provider() {
        let registry = ProviderRegistry::with_defaults(BrokerConfig::default());
        assert_eq!(registry.provider_types(), ProviderType::ALL.to_vec());
        for provider in ProviderType::ALL {
            assert_eq!(registry.resolve(provider).unwrap().provider_type(), provider);
        }
    }

    #[test]
    fn test_unregistered_provider() {
        let registry = ProviderRegistry::builder()
            .register(RedisDriver::new(Arc::new(CapturingBroker::default())))
            .build();
        assert!(registry.resolve(ProviderType::Redis).is_ok());
        assert!(matches!(
            registry.resolve(ProviderType::Cassandra),
            Err(Error::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_validate_dispatches_to_driver() {
        let registry = ProviderRegistry::with_defaults(BrokerConfig::default());
        let config = registry
            .validate(
                ProviderType::Redis,
                &json!({
                    "host": "Redis.Internal",
                    "port": 6379,
                    "username": "default",
                    "creationStatement": "ACL SETUSER {{username}} on >{{password}}",
                    "revocationStatement": "ACL DELUSER {{username}}"
                }),
            )
            .unwrap();
        let ProviderConfig::Redis(inputs) = config else {
            panic!("expected redis inputs");
        };
        assert_eq!(inputs.host, "redis.internal");
    }
}
