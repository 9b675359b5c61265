//! Error types for the pooled HTTP client.
//!
//! Every failure surfaced to callers is a [`ClientError`]. Variants carry the
//! context (URL, route, path) that the underlying source errors lack, so the
//! helper constructors are used instead of blanket `From` conversions.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed cause attached to configuration failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while configuring the client or dispatching a request.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Caller input is incomplete or inconsistent (empty URL, empty upload set, ...).
    ///
    /// Always raised before any network activity.
    #[error("validation failed: {reason}")]
    Validation {
        /// Human-readable description of what was wrong.
        reason: String,
    },

    /// The request URL could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The URL as supplied by the caller.
        url: String,
    },

    /// TLS, key material or settings could not be loaded. Fatal for initialization.
    #[error("configuration error: {message}")]
    Configuration {
        /// What was being configured when the failure happened.
        message: String,
        /// The underlying cause, when there is one.
        #[source]
        source: Option<BoxError>,
    },

    /// Connection or I/O failure while sending the request or draining the body.
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL being requested.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The peer did not answer within the response timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// No pooled connection became available within the acquisition timeout.
    #[error("timed out after {waited:?} waiting for a pooled connection to {route}")]
    PoolTimeout {
        /// The saturated route, rendered as `scheme://host:port`.
        route: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// Redirect handling gave up (too many hops, circular chain, bad `Location`).
    #[error("redirect from {url} rejected: {reason}")]
    Redirect {
        /// The URL whose response carried the offending redirect.
        url: String,
        /// Why the redirect was rejected.
        reason: String,
    },

    /// The request method is not one of GET, POST, PUT or DELETE.
    #[error("unrecognized request method: {method}")]
    UnrecognizedMethod {
        /// The method string as supplied by the caller.
        method: String,
    },

    /// The response carried no `Content-Type` and cannot be classified.
    #[error("unknown response type from {url} (HTTP {status}): missing content-type")]
    UnknownResponseType {
        /// The URL that produced the response.
        url: String,
        /// The response status code.
        status: u16,
    },

    /// A JSON request body could not be serialized.
    #[error("failed to serialize request body: {source}")]
    Serialization {
        /// The underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// Writing a downloaded artifact to disk failed.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The client context was shut down.
    #[error("client context has been shut down")]
    Shutdown,
}

impl ClientError {
    /// Creates a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a configuration error wrapping an underlying cause.
    pub fn configuration(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates a configuration error with no underlying cause.
    pub fn configuration_msg(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a network error, promoting reqwest timeouts to [`ClientError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::Timeout { url: url.into() };
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a pool acquisition timeout error.
    pub fn pool_timeout(route: impl Into<String>, waited: Duration) -> Self {
        Self::PoolTimeout {
            route: route.into(),
            waited,
        }
    }

    /// Creates a redirect error.
    pub fn redirect(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Redirect {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unrecognized method error.
    pub fn unrecognized_method(method: impl Into<String>) -> Self {
        Self::UnrecognizedMethod {
            method: method.into(),
        }
    }

    /// Creates an unknown response type error.
    pub fn unknown_response_type(url: impl Into<String>, status: u16) -> Self {
        Self::UnknownResponseType {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for errors raised before any network activity took place.
    #[must_use]
    pub fn is_pre_dispatch(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::InvalidUrl { .. }
                | Self::UnrecognizedMethod { .. }
                | Self::Serialization { .. }
        )
    }
}
