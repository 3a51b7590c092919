//! Error types for dynamic secret providers.

use crate::lease::LeaseStatus;
use crate::provider::ProviderType;
use crate::template::TemplateError;
use std::fmt;
use thiserror::Error;

/// A single violated constraint in a provider input document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// Dotted path of the offending field, e.g. `roles[0].roleName`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Structural validation failure, carrying every issue found in the document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![FieldIssue {
                path: path.into(),
                message: message.into(),
            }],
        }
    }

    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Whether any issue is reported for the given field path.
    pub fn mentions(&self, path: &str) -> bool {
        self.issues.iter().any(|issue| issue.path == path)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}", joined)
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Error)]
pub enum Error {
    // Input errors
    #[error("Invalid provider inputs: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Provider mismatch: driver for {expected} received {actual} inputs")]
    ProviderMismatch {
        expected: ProviderType,
        actual: ProviderType,
    },

    #[error("Statement template error: {0}")]
    Template(#[from] TemplateError),

    // External system errors
    #[error("Connection to {provider} failed: {message}")]
    ConnectionFailed {
        provider: ProviderType,
        message: String,
    },

    #[error("{provider} rejected the request: {message}")]
    Rejected {
        provider: ProviderType,
        message: String,
    },

    #[error("Provisioning on {provider} failed: {message}")]
    ProvisioningFailed {
        provider: ProviderType,
        entity_id: Option<String>,
        message: String,
    },

    // Lifecycle errors
    #[error("Renewal is not supported by {0}")]
    RenewUnsupported(ProviderType),

    #[error("Lease for entity {entity_id} is not active")]
    LeaseNotActive {
        entity_id: String,
        status: Option<LeaseStatus>,
    },

    // Infrastructure errors
    #[error("Lease store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn connection(provider: ProviderType, message: impl fmt::Display) -> Self {
        Error::ConnectionFailed {
            provider,
            message: message.to_string(),
        }
    }

    pub fn rejected(provider: ProviderType, message: impl fmt::Display) -> Self {
        Error::Rejected {
            provider,
            message: message.to_string(),
        }
    }

    pub fn provisioning(provider: ProviderType, message: impl fmt::Display) -> Self {
        Error::ProvisioningFailed {
            provider,
            entity_id: None,
            message: message.to_string(),
        }
    }

    /// Only connection failures may succeed when retried with the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConnectionFailed { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let mut err = ValidationError::single("host", "is required");
        err.push("port", "must be an integer");
        assert_eq!(err.to_string(), "host: is required; port: must be an integer");
        assert!(err.mentions("port"));
        assert!(!err.mentions("database"));
    }

    #[test]
    fn test_only_connection_failures_are_retryable() {
        assert!(Error::connection(ProviderType::Redis, "timed out").is_retryable());
        assert!(!Error::provisioning(ProviderType::Redis, "boom").is_retryable());
        assert!(!Error::RenewUnsupported(ProviderType::AwsIam).is_retryable());
    }
}
