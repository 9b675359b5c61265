//! Pooled HTTP client library
//!
//! A blocking HTTP/1.1 client built around a shared, bounded connection pool.
//! Callers describe a request as a [`RequestSpec`] and send it through a
//! [`ClientContext`]; the response comes back fully buffered as an
//! [`HttpResult`], classified as text or as a downloadable file.
//!
//! # Architecture
//!
//! - [`tls`] - TLS context: trust roots, pluggable trust strategy, client identity
//! - [`pool`] - Pool manager, transport registry and per-route caps
//! - [`request`] - Request specs, methods and per-request settings
//! - [`dispatch`] - Request/response observers
//! - [`response`] - Response classification and file artifacts
//! - [`context`] - The caller-owned client context
//! - [`config`] - File-backed client settings

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod request;
pub mod response;
pub mod tls;
mod user_agent;

// Re-export commonly used types
pub use config::{ClientSettings, resolve_default_config_path};
pub use context::ClientContext;
pub use dispatch::{
    LoggingObserver, NoopObserver, Observers, RequestObserver, RequestRecord, ResponseObserver,
    ResponseRecord,
};
pub use error::ClientError;
pub use pool::{
    ClientBuilder, Lease, PoolConfig, PoolManager, Route, Transport, TransportRegistry,
};
pub use request::{BodyEncoding, Method, RequestConfig, RequestSpec, RequestSpecBuilder};
pub use response::{FileArtifact, Headers, HttpResult, Payload};
pub use tls::{
    ClientCredential, DangerAcceptAnyCertificate, KeyMaterial, StandardValidation, TlsConfig,
    TlsContext, TlsContextBuilder, TrustStrategy,
};
