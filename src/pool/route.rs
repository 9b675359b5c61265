//! Route identity: the `(scheme, host, port)` triple connections are pooled by.

use std::fmt;

use url::Url;

use crate::error::ClientError;

/// A connection route. Two URLs share pooled connections iff their routes are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    scheme: String,
    host: String,
    port: u16,
}

impl Route {
    /// Creates a route from its parts. Scheme and host are lower-cased.
    #[must_use]
    pub fn new(scheme: &str, host: &str, port: u16) -> Self {
        Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    /// Parses a URL string into its route, filling in the scheme's default port.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if the URL cannot be parsed, has no
    /// host, or uses a scheme without a known default port and no explicit one.
    pub fn parse(url: &str) -> Result<Self, ClientError> {
        let parsed = Url::parse(url.trim())
            .map_err(|e| ClientError::validation(format!("cannot parse route URL `{url}`: {e}")))?;
        Self::from_url(&parsed)
    }

    /// Derives the route of an already parsed URL.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if the URL has no host or no port
    /// can be determined.
    pub fn from_url(url: &Url) -> Result<Self, ClientError> {
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ClientError::validation(format!("URL `{url}` has no host")))?;
        let port = url.port_or_known_default().ok_or_else(|| {
            ClientError::validation(format!("URL `{url}` has no port for scheme `{}`", url.scheme()))
        })?;
        Ok(Self::new(url.scheme(), host, port))
    }

    /// The route's scheme, lower-case.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The route's host, lower-case.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The route's port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
