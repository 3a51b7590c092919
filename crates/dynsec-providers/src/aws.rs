//! Shared AWS SDK plumbing for the IAM and ElastiCache backends.

use crate::broker::Timeouts;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_iam::config::Credentials;
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use dynsec_core::{Error, ProviderType};
use std::fmt;

/// Static credentials supplied in provider inputs.
pub(crate) struct StaticKeys<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub region: &'a str,
}

/// SDK config built only from the provider inputs, never from the ambient environment chain.
pub(crate) async fn sdk_config(keys: StaticKeys<'_>, timeouts: Timeouts) -> SdkConfig {
    let credentials = Credentials::new(
        keys.access_key_id,
        keys.secret_access_key,
        None,
        None,
        "dynsec-provider-inputs",
    );
    let timeout_config = TimeoutConfig::builder()
        .connect_timeout(timeouts.connect)
        .operation_timeout(timeouts.operation)
        .build();

    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(keys.region.to_string()))
        .credentials_provider(credentials)
        .timeout_config(timeout_config)
        .load()
        .await
}

/// Service error code, e.g. `NoSuchEntity`.
pub(crate) fn error_code<E, R>(err: &SdkError<E, R>) -> Option<&str>
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ServiceError(service) => service.err().code(),
        _ => None,
    }
}

pub(crate) fn classify<E, R>(provider: ProviderType, err: SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            Error::connection(provider, DisplayErrorContext(&err))
        }
        SdkError::ServiceError(service) => {
            let inner = service.err();
            Error::rejected(
                provider,
                format!(
                    "{}: {}",
                    inner.code().unwrap_or("Unknown"),
                    inner.message().unwrap_or_default()
                ),
            )
        }
        _ => Error::rejected(provider, DisplayErrorContext(&err)),
    }
}
