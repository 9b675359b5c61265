//! Request methods and the per-request execution policy applied to them.

use std::fmt;
use std::time::Duration;

use reqwest::header::{ACCEPT_ENCODING, HeaderValue};
use reqwest::{Client, RequestBuilder};
use url::Url;

use crate::constants::{ACQUIRE_TIMEOUT, MAX_REDIRECTS, RESPONSE_TIMEOUT};
use crate::error::ClientError;

/// Per-request timing, compression and redirect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestConfig {
    /// How long to wait for a pooled connection lease.
    pub acquire_timeout: Duration,
    /// How long to wait for the peer's response.
    pub response_timeout: Duration,
    /// Whether compressed response bodies may be negotiated.
    pub content_compression: bool,
    /// Whether 3xx responses with a `Location` are followed.
    pub redirects_enabled: bool,
    /// Maximum number of redirect hops per send.
    pub max_redirects: usize,
    /// Whether a redirect chain may revisit a URL.
    pub circular_redirects_allowed: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: ACQUIRE_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
            content_compression: true,
            redirects_enabled: true,
            max_redirects: MAX_REDIRECTS,
            circular_redirects_allowed: true,
        }
    }
}

/// Supported request methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Parses a method name, ignoring ASCII case and surrounding whitespace.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] if `method` is empty
    /// - [`ClientError::UnrecognizedMethod`] for anything but GET, POST, PUT or DELETE
    pub fn parse(method: &str) -> Result<Self, ClientError> {
        let trimmed = method.trim();
        if trimmed.is_empty() {
            return Err(ClientError::validation("request method must not be empty"));
        }
        match trimmed.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(ClientError::unrecognized_method(method)),
        }
    }

    /// The canonical upper-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }

    /// Starts a request of this method to `url` with `config`'s response
    /// timeout and compression policy applied.
    ///
    /// Redirect and lease policy are enforced by the dispatcher, not the builder.
    pub(crate) fn configured_request(
        self,
        client: &Client,
        url: Url,
        config: &RequestConfig,
    ) -> RequestBuilder {
        let builder = client
            .request(self.to_reqwest(), url)
            .timeout(config.response_timeout);
        if config.content_compression {
            builder
        } else {
            builder.header(ACCEPT_ENCODING, HeaderValue::from_static("identity"))
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
