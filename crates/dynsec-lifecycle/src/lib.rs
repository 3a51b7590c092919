//! Lease lifecycle for dynamic secrets.
//!
//! [`LeaseManager`] is the entry point: it validates provider inputs,
//! issues leases through the provider registry and serializes renew and
//! revoke per entity.

pub mod config;
pub mod locks;
pub mod manager;
pub mod store;

pub use config::{ConfigError, DynsecConfig, LifecycleConfig};
pub use locks::{LeaseGuard, LeaseLocks};
pub use manager::LeaseManager;
pub use store::InMemoryLeaseStore;
