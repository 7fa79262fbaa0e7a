//! Crate level errors.
//!
//! The monitor distinguishes four classes of failure:
//!
//! - **Fatal startup errors** ([`Error::Config`], [`Error::Compatibility`])
//!   abort [`Service::new`](crate::Service::new) or
//!   [`Service::start`](crate::Service::start).
//! - **Feature degradation** is not an error at all: the compatibility gate logs
//!   a warning and turns the feature off.
//! - **Transient per-message failures** ([`Error::Broker`], [`Error::Codec`]) are
//!   absorbed by the end-to-end loops and only show up in logs and metrics.
//! - **Cache population failures** are handed to every coalesced waiter. This is
//!   why [`Error`] is `Clone`.

use std::time::Duration;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the monitor.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// Configuration is invalid or could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A broker request failed.
    #[error("Broker error: {0}")]
    Broker(String),

    /// A broker request did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The broker capability check could not be completed.
    #[error("Failed to check feature compatibility against Kafka: {0}")]
    Compatibility(Box<Error>),

    /// A canary payload could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The requested feature is disabled, either by configuration or because the
    /// connected broker does not support it.
    #[error("Feature disabled: {0}")]
    FeatureDisabled(&'static str),

    /// The service is shutting down.
    #[error("Service is shutting down")]
    Shutdown,
}

impl Error {
    /// Returns true if retrying the same request may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Broker(_) | Error::Timeout(_))
    }

    /// Returns true if the error must abort service startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Compatibility(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::Config(e.to_string())
    }
}
