//! Test context providing access to all test infrastructure.

use crate::containers::{PostgresContainer, RedisContainer};
use dynsec_db::Database;
use dynsec_lifecycle::{LeaseManager, LifecycleConfig};
use dynsec_providers::{BrokerConfig, ProviderRegistry};
use std::sync::Arc;

/// Test context with all services running.
///
/// Drop this to stop all containers.
pub struct TestContext {
    pub postgres: PostgresContainer,
    pub redis: RedisContainer,
    pub db: Database,
}

impl TestContext {
    /// Create a new test context with all containers running.
    pub async fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let (postgres, redis) =
            tokio::try_join!(PostgresContainer::start(), RedisContainer::start())?;

        let db = Database::connect(postgres.connection_string()).await?;
        db.migrate().await?;

        Ok(Self { postgres, redis, db })
    }

    /// Create context with only PostgreSQL.
    pub async fn postgres_only() -> anyhow::Result<PostgresOnlyContext> {
        crate::init_test_logging();

        let postgres = PostgresContainer::start().await?;
        let db = Database::connect(postgres.connection_string()).await?;
        db.migrate().await?;

        Ok(PostgresOnlyContext { postgres, db })
    }

    /// Lease manager with live drivers, persisting to the container database.
    pub fn manager(&self, config: LifecycleConfig) -> LeaseManager {
        live_manager(&self.db, config)
    }

    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }

    pub fn redis_url(&self) -> String {
        self.redis.url()
    }
}

/// Minimal context with only PostgreSQL.
pub struct PostgresOnlyContext {
    pub postgres: PostgresContainer,
    pub db: Database,
}

impl PostgresOnlyContext {
    pub fn manager(&self, config: LifecycleConfig) -> LeaseManager {
        live_manager(&self.db, config)
    }

    pub fn db_url(&self) -> &str {
        self.postgres.connection_string()
    }
}

fn live_manager(db: &Database, config: LifecycleConfig) -> LeaseManager {
    LeaseManager::new(
        Arc::new(ProviderRegistry::with_defaults(BrokerConfig::default())),
        Arc::new(db.lease_store()),
        config,
    )
}
