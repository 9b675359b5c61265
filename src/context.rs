//! The caller-owned client context.
//!
//! A [`ClientContext`] owns the runtime that drives the async transport, the
//! current [`PoolManager`], the installed observers and the lazily built
//! dispatcher. Clones share all of it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::runtime::{Builder, Runtime};
use tracing::{info, instrument};

use crate::config::ClientSettings;
use crate::dispatch::{Dispatcher, Observers};
use crate::error::ClientError;
use crate::pool::{ClientBuilder, PoolConfig, PoolManager, Route, TransportRegistry};
use crate::request::{BodyEncoding, RequestSpec};
use crate::response::HttpResult;

/// Shared handle to a connection pool and everything needed to send through it.
///
/// All `send*` methods block the calling thread until the response has been
/// fully received and classified. Call them from plain threads (or from
/// `spawn_blocking`), never from inside an async task.
///
/// # Panics
///
/// The context owns a tokio runtime. Dropping the last clone from inside an
/// async task panics, because tokio refuses to shut a runtime down from
/// within another runtime's worker. Drop it on a plain thread, or move it
/// into `spawn_blocking` first.
///
/// # Example
///
/// ```no_run
/// use pooled_http::{ClientContext, RequestSpec};
///
/// # fn example() -> Result<(), pooled_http::ClientError> {
/// let context = ClientContext::initialize()?;
/// let spec = RequestSpec::builder()
///     .url("https://example.com/api/items")
///     .method("GET")
///     .query_param("page", "1")
///     .build();
/// let result = context.send(&spec)?;
/// println!("{} {:?}", result.status(), result.text());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    runtime: Runtime,
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    pool: Arc<PoolManager>,
    observers: Observers,
    dispatcher: Option<Arc<Dispatcher>>,
    shut_down: bool,
}

impl ClientContext {
    /// Context with the default pool (200 total, 10 per route) and TLS settings.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the TLS context, HTTP client
    /// or runtime cannot be built.
    pub fn initialize() -> Result<Self, ClientError> {
        Self::build(PoolConfig::default(), None)
    }

    /// Context with a custom pool configuration and the default transports.
    ///
    /// # Errors
    ///
    /// See [`PoolManager::initialize`].
    pub fn with_config(config: PoolConfig) -> Result<Self, ClientError> {
        Self::build(config, None)
    }

    /// Context with a custom pool configuration and transport registry.
    ///
    /// # Errors
    ///
    /// See [`PoolManager::initialize`].
    pub fn with_registry(config: PoolConfig, registry: TransportRegistry) -> Result<Self, ClientError> {
        Self::build(config, Some(registry))
    }

    /// Context configured from a settings file.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the TLS material named by
    /// the settings cannot be loaded.
    pub fn from_settings(settings: &ClientSettings) -> Result<Self, ClientError> {
        let registry = TransportRegistry::with_tls(&settings.tls_config())?;
        Self::build(settings.pool_config(), Some(registry))
    }

    /// Context whose HTTP client builder is adjusted by `customize` before the pool is built.
    ///
    /// # Errors
    ///
    /// See [`PoolManager::initialize_with`].
    pub fn with_client_builder(
        config: PoolConfig,
        registry: Option<TransportRegistry>,
        customize: impl FnOnce(ClientBuilder) -> ClientBuilder,
    ) -> Result<Self, ClientError> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("pooled-http")
            .build()
            .map_err(|e| ClientError::configuration("failed to start client runtime", e))?;
        let pool = PoolManager::initialize_with(config, registry, customize)?;
        Ok(Self {
            inner: Arc::new(Inner {
                runtime,
                state: RwLock::new(State {
                    pool: Arc::new(pool),
                    observers: Observers::default(),
                    dispatcher: None,
                    shut_down: false,
                }),
            }),
        })
    }

    fn build(config: PoolConfig, registry: Option<TransportRegistry>) -> Result<Self, ClientError> {
        Self::with_client_builder(config, registry, |builder| builder)
    }

    /// Swaps in a freshly built pool.
    ///
    /// Requests already running keep their leases on the old pool. The
    /// dispatcher is rebuilt against the new pool on the next send; installed
    /// observers are kept.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Shutdown`] after [`ClientContext::shutdown`]
    /// - anything [`PoolManager::initialize`] returns
    #[instrument(skip_all)]
    pub fn replace_pool(
        &self,
        config: PoolConfig,
        registry: Option<TransportRegistry>,
    ) -> Result<(), ClientError> {
        if self.is_shut_down() {
            return Err(ClientError::Shutdown);
        }
        let pool = Arc::new(PoolManager::initialize(config, registry)?);
        let mut state = self.write_state();
        if state.shut_down {
            return Err(ClientError::Shutdown);
        }
        state.pool = pool;
        state.dispatcher = None;
        info!("connection pool replaced");
        Ok(())
    }

    /// The current pool.
    #[must_use]
    pub fn pool(&self) -> Arc<PoolManager> {
        Arc::clone(&self.read_state().pool)
    }

    /// Caps requests in flight to the route of `url`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] if `url` has no route or `limit` is zero.
    pub fn set_per_route_limit(&self, url: &str, limit: usize) -> Result<(), ClientError> {
        let route = Route::parse(url)?;
        self.pool().set_per_route_limit(&route, limit)
    }

    /// Applies a `url → limit` map of per-route caps to the current pool.
    ///
    /// # Errors
    ///
    /// See [`PoolManager::set_per_route_limits`].
    pub fn set_per_route_limits<S: AsRef<str>>(
        &self,
        limits: &HashMap<S, usize>,
    ) -> Result<(), ClientError> {
        self.pool().set_per_route_limits(limits)
    }

    /// Replaces the request and response observers used from the next send on.
    pub fn install_observers(&self, observers: Observers) {
        let mut state = self.write_state();
        state.observers = observers;
        state.dispatcher = None;
    }

    /// Sends `spec` with its body as JSON (when it has one).
    ///
    /// # Errors
    ///
    /// See [`ClientContext::send_with`].
    pub fn send(&self, spec: &RequestSpec) -> Result<HttpResult, ClientError> {
        self.send_with(spec, BodyEncoding::Json)
    }

    /// Sends `spec` with its body as `application/x-www-form-urlencoded`.
    ///
    /// # Errors
    ///
    /// See [`ClientContext::send_with`].
    pub fn send_form(&self, spec: &RequestSpec) -> Result<HttpResult, ClientError> {
        self.send_with(spec, BodyEncoding::Form)
    }

    /// Uploads the files of `spec` as `multipart/form-data`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Validation`] ("nothing to upload") if the spec
    /// has no files, plus everything [`ClientContext::send_with`] returns.
    pub fn send_files(&self, spec: &RequestSpec) -> Result<HttpResult, ClientError> {
        self.send_with(spec, BodyEncoding::Multipart)
    }

    /// Sends `spec`, blocking until the response is classified.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async task.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`], [`ClientError::InvalidUrl`] or
    ///   [`ClientError::UnrecognizedMethod`] before any I/O
    /// - [`ClientError::PoolTimeout`] if no lease frees up within the acquire timeout
    /// - [`ClientError::Network`] / [`ClientError::Timeout`] for transport failures
    /// - [`ClientError::Redirect`] when the redirect policy rejects a hop
    /// - [`ClientError::UnknownResponseType`] without a `Content-Type`
    /// - [`ClientError::Shutdown`] after [`ClientContext::shutdown`]
    pub fn send_with(
        &self,
        spec: &RequestSpec,
        encoding: BodyEncoding,
    ) -> Result<HttpResult, ClientError> {
        let dispatcher = self.dispatcher()?;
        self.inner
            .runtime
            .block_on(dispatcher.execute(spec, encoding))
    }

    /// Closes the pool. Pending and later sends fail with [`ClientError::Shutdown`].
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.write_state();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        state.dispatcher = None;
        state.pool.close();
        info!("client context shut down");
    }

    /// Whether [`ClientContext::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.read_state().shut_down
    }

    fn dispatcher(&self) -> Result<Arc<Dispatcher>, ClientError> {
        {
            let state = self.read_state();
            if state.shut_down {
                return Err(ClientError::Shutdown);
            }
            if let Some(dispatcher) = &state.dispatcher {
                return Ok(Arc::clone(dispatcher));
            }
        }

        let mut state = self.write_state();
        if state.shut_down {
            return Err(ClientError::Shutdown);
        }
        let pool = Arc::clone(&state.pool);
        let observers = state.observers.clone();
        let dispatcher = state
            .dispatcher
            .get_or_insert_with(|| Arc::new(Dispatcher::new(pool, observers)));
        Ok(Arc::clone(dispatcher))
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
