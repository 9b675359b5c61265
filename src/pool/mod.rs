//! Connection pool manager.
//!
//! A [`PoolManager`] owns the shared reqwest client (which keeps idle
//! connections alive per host), the [`TransportRegistry`] deciding which URL
//! schemes may be dialled, and the limiter enforcing the total and per-route
//! caps on requests in flight.

mod limiter;
mod route;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

use crate::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_MAX_PER_ROUTE, DEFAULT_MAX_TOTAL_CONNECTIONS, SOCKET_TIMEOUT_SECS,
};
use crate::error::ClientError;
use crate::tls::{TlsConfig, TlsContext, TlsContextBuilder};

pub use limiter::Lease;
pub use reqwest::ClientBuilder;
pub use route::Route;

use limiter::RouteLimiter;

/// Pool sizing and socket timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Cap on requests in flight across every route.
    pub max_total_connections: usize,
    /// Cap on requests in flight to one route unless overridden.
    pub default_max_per_route: usize,
    /// Per-route caps applied when the pool is initialized.
    pub per_route_overrides: HashMap<Route, usize>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Socket read timeout.
    pub socket_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total_connections: DEFAULT_MAX_TOTAL_CONNECTIONS,
            default_max_per_route: DEFAULT_MAX_PER_ROUTE,
            per_route_overrides: HashMap::new(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            socket_timeout: Duration::from_secs(SOCKET_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<(), ClientError> {
        if self.max_total_connections == 0 {
            return Err(ClientError::validation("max_total_connections must be at least 1"));
        }
        if self.default_max_per_route == 0 {
            return Err(ClientError::validation("default_max_per_route must be at least 1"));
        }
        if let Some((route, _)) = self.per_route_overrides.iter().find(|(_, limit)| **limit == 0) {
            return Err(ClientError::validation(format!(
                "per-route limit for {route} must be at least 1"
            )));
        }
        Ok(())
    }
}

/// How connections for one scheme are established.
#[derive(Debug, Clone)]
pub enum Transport {
    /// Plain TCP.
    Plain,
    /// TCP wrapped in TLS using the given context.
    Tls(TlsContext),
}

impl Transport {
    fn tls_context(&self) -> Option<&TlsContext> {
        match self {
            Self::Tls(context) => Some(context),
            Self::Plain => None,
        }
    }
}

/// Scheme → transport mapping. A scheme missing here cannot be requested.
#[derive(Debug, Clone, Default)]
pub struct TransportRegistry {
    transports: BTreeMap<String, Transport>,
}

impl TransportRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `http` over plain TCP and `https` over TLS built from `tls`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the TLS context cannot be built.
    pub fn with_tls(tls: &TlsConfig) -> Result<Self, ClientError> {
        let context = TlsContextBuilder::build(tls)?;
        Ok(Self::new()
            .register("http", Transport::Plain)
            .register("https", Transport::Tls(context)))
    }

    /// The default registry: [`TransportRegistry::with_tls`] with a default [`TlsConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the TLS context cannot be built.
    pub fn with_defaults() -> Result<Self, ClientError> {
        Self::with_tls(&TlsConfig::default())
    }

    /// Registers (or replaces) the transport for `scheme`.
    #[must_use]
    pub fn register(mut self, scheme: &str, transport: Transport) -> Self {
        self.transports.insert(scheme.to_ascii_lowercase(), transport);
        self
    }

    /// The transport registered for `scheme`, if any.
    #[must_use]
    pub fn get(&self, scheme: &str) -> Option<&Transport> {
        self.transports.get(&scheme.to_ascii_lowercase())
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.transports.keys().map(String::as_str)
    }

    /// The TLS context the shared client dials with: the `https` one, else the first TLS transport.
    fn tls_context(&self) -> Option<&TlsContext> {
        self.transports
            .get("https")
            .and_then(Transport::tls_context)
            .or_else(|| self.transports.values().find_map(Transport::tls_context))
    }
}

/// Shared pool state: the reqwest client, transport registry and connection caps.
#[derive(Debug)]
pub struct PoolManager {
    config: PoolConfig,
    registry: TransportRegistry,
    client: Client,
    limiter: RouteLimiter,
}

impl PoolManager {
    /// Builds a pool from `config`.
    ///
    /// Without a registry the default one is built (`http` plain, `https`
    /// over a default TLS context). A supplied registry is used as-is; the
    /// caps and socket timeouts always come from `config`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] if a cap in `config` is zero
    /// - [`ClientError::Configuration`] if the TLS context or HTTP client cannot be built
    pub fn initialize(
        config: PoolConfig,
        registry: Option<TransportRegistry>,
    ) -> Result<Self, ClientError> {
        Self::initialize_with(config, registry, |builder| builder)
    }

    /// Like [`PoolManager::initialize`], with a hook over the HTTP client builder.
    ///
    /// `customize` sees a builder already carrying the pool's timeouts, idle
    /// limit, compression and proxy settings, and may override any of them
    /// (for example to add default headers or a proxy). Redirect handling,
    /// the HTTP/1.1 restriction and the TLS configuration are applied after
    /// it and cannot be changed.
    ///
    /// # Errors
    ///
    /// Same as [`PoolManager::initialize`].
    #[instrument(skip_all, fields(
        max_total = config.max_total_connections,
        max_per_route = config.default_max_per_route,
    ))]
    pub fn initialize_with(
        config: PoolConfig,
        registry: Option<TransportRegistry>,
        customize: impl FnOnce(ClientBuilder) -> ClientBuilder,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let registry = match registry {
            Some(registry) => registry,
            None => TransportRegistry::with_defaults()?,
        };

        let builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.socket_timeout)
            .pool_max_idle_per_host(config.default_max_per_route)
            .gzip(true)
            .no_proxy();
        let mut builder = customize(builder)
            .redirect(reqwest::redirect::Policy::none())
            .http1_only();
        if let Some(tls) = registry.tls_context() {
            builder = builder.tls_backend_preconfigured(tls.client_config());
        }
        let client = builder
            .build()
            .map_err(|e| ClientError::configuration("failed to build HTTP client", e))?;

        let limiter = RouteLimiter::new(config.max_total_connections, config.default_max_per_route);
        for (route, limit) in &config.per_route_overrides {
            limiter.set_limit(route, *limit);
        }

        info!(
            schemes = ?registry.schemes().collect::<Vec<_>>(),
            connect_timeout_ms = config.connect_timeout.as_millis(),
            socket_timeout_ms = config.socket_timeout.as_millis(),
            "connection pool initialized"
        );
        Ok(Self {
            config,
            registry,
            client,
            limiter,
        })
    }

    /// Caps requests in flight to `route` at `limit`, effective for new acquisitions.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if `limit` is zero.
    pub fn set_per_route_limit(&self, route: &Route, limit: usize) -> Result<(), ClientError> {
        if limit == 0 {
            return Err(ClientError::validation(format!(
                "per-route limit for {route} must be at least 1"
            )));
        }
        self.limiter.set_limit(route, limit);
        Ok(())
    }

    /// Applies a `url → limit` map of per-route caps.
    ///
    /// Every entry is validated before any limit changes.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if the map is empty, a URL has no
    /// parsable route, or a limit is zero.
    pub fn set_per_route_limits<S: AsRef<str>>(
        &self,
        limits: &HashMap<S, usize>,
    ) -> Result<(), ClientError> {
        if limits.is_empty() {
            return Err(ClientError::validation("per-route limit map is empty"));
        }
        let parsed = limits
            .iter()
            .map(|(url, limit)| {
                let route = Route::parse(url.as_ref())?;
                if *limit == 0 {
                    return Err(ClientError::validation(format!(
                        "per-route limit for {route} must be at least 1"
                    )));
                }
                Ok((route, *limit))
            })
            .collect::<Result<Vec<_>, ClientError>>()?;
        for (route, limit) in &parsed {
            self.limiter.set_limit(route, *limit);
        }
        debug!(routes = parsed.len(), "per-route limits applied");
        Ok(())
    }

    /// Fails with [`ClientError::Validation`] unless `url`'s scheme has a registered transport.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn check_transport(&self, url: &Url) -> Result<(), ClientError> {
        if self.registry.get(url.scheme()).is_none() {
            return Err(ClientError::validation(format!(
                "no transport registered for scheme `{}`",
                url.scheme()
            )));
        }
        Ok(())
    }

    /// Waits up to `timeout` for a connection lease on `route`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::PoolTimeout`] if no slot frees up in time
    /// - [`ClientError::Shutdown`] once the pool has been closed
    pub async fn acquire(&self, route: &Route, timeout: Duration) -> Result<Lease, ClientError> {
        self.limiter.acquire(route, timeout).await
    }

    /// Current cap for `route`.
    #[must_use]
    pub fn route_limit(&self, route: &Route) -> usize {
        self.limiter.limit(route)
    }

    /// Leases currently held on `route`.
    #[must_use]
    pub fn leased(&self, route: &Route) -> usize {
        self.limiter.leased(route)
    }

    /// Free slots under the total cap.
    #[must_use]
    pub fn available_total(&self) -> usize {
        self.limiter.available_total()
    }

    /// The configuration the pool was built from (overrides as initially supplied).
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The transport registry in use.
    #[must_use]
    pub fn registry(&self) -> &TransportRegistry {
        &self.registry
    }

    pub(crate) fn http_client(&self) -> &Client {
        &self.client
    }

    /// Rejects all pending and future lease requests.
    pub fn close(&self) {
        info!(
            in_flight = self.limiter.max_total() - self.limiter.available_total(),
            "closing connection pool"
        );
        self.limiter.close();
    }
}
