//! Testcontainer configurations for integration tests.

use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::{postgres::Postgres, redis::Redis};

/// PostgreSQL container. Serves both as the lease store and as a SQL target.
pub struct PostgresContainer {
    #[allow(dead_code)] // Kept to maintain container lifetime
    container: ContainerAsync<Postgres>,
    host: String,
    port: u16,
    connection_string: String,
}

impl PostgresContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Postgres::default().with_tag("16-alpine").start().await?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(5432).await?;

        let connection_string = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        Ok(Self {
            container,
            host,
            port,
            connection_string,
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Redis 7 container with the ACL command set.
pub struct RedisContainer {
    #[allow(dead_code)] // Kept to maintain container lifetime
    container: ContainerAsync<Redis>,
    host: String,
    port: u16,
}

impl RedisContainer {
    pub async fn start() -> anyhow::Result<Self> {
        let container = Redis::default().with_tag("7-alpine").start().await?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(6379).await?;

        Ok(Self {
            container,
            host,
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_postgres_container_starts() {
        let pg = PostgresContainer::start().await.unwrap();
        assert!(pg.connection_string().contains("postgres://"));
    }

    #[tokio::test]
    #[ignore = "requires docker"]
    async fn test_redis_container_starts() {
        let redis = RedisContainer::start().await.unwrap();
        assert!(redis.url().starts_with("redis://"));
    }
}
