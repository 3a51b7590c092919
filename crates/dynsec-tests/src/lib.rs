//! Test infrastructure for dynsec.
//!
//! Fixtures for every provider type, a recording connection broker for
//! driving the lease lifecycle without external systems, and
//! testcontainers-based contexts for running against real services
//! (PostgreSQL, Redis).
//!
//! # Usage
//!
//! ```ignore
//! use dynsec_tests::{ProviderFixture, RecordingBroker};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let broker = RecordingBroker::new();
//!     let manager = broker.manager(Default::default());
//!     let config = ProviderFixture::config(ProviderType::Redis);
//!     // manager.create_lease(&config, None), broker.calls(), etc.
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod mocks;

pub use context::TestContext;
pub use fixtures::*;
pub use mocks::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,dynsec_lifecycle=debug,dynsec_providers=debug")),
        )
        .with_test_writer()
        .try_init();
}
