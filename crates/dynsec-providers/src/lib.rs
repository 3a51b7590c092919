//! Provider drivers for dynamic secrets.
//!
//! The [`ProviderRegistry`] maps each provider type to a driver. Statement
//! based drivers render their templates and hand the result to a
//! [`broker::ConnectionBroker`]; AWS IAM and MongoDB Atlas call their
//! management APIs directly.

mod aws;
pub mod broker;
mod digest;
pub mod drivers;
pub mod registry;

pub use broker::{BrokerConfig, ConnectionBroker, ExecOutcome, Intent, LiveBroker, StatementBatch};
pub use registry::{ProviderRegistry, ProviderRegistryBuilder};
