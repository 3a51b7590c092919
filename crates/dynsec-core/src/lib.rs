//! dynsec core
//!
//! Domain types, input validation, statement templating and port traits for
//! issuing short-lived credentials against external systems. This crate does
//! no I/O and defines the shared vocabulary used by the provider drivers and
//! the lease lifecycle.

pub mod credentials;
pub mod error;
pub mod ids;
pub mod lease;
pub mod ports;
pub mod provider;
pub mod schema;
pub mod template;

pub use error::{Error, FieldIssue, Result, ValidationError};
pub use ids::*;
pub use lease::{Lease, LeaseGrant, LeaseStatus};
pub use provider::{ProviderConfig, ProviderType};
