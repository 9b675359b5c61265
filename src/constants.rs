//! Defaults for the pool, per-request policy, and response classification.

use std::time::Duration;

/// Maximum number of pooled connections across all routes.
pub const DEFAULT_MAX_TOTAL_CONNECTIONS: usize = 200;

/// Maximum number of pooled connections to a single route unless overridden.
pub const DEFAULT_MAX_PER_ROUTE: usize = 10;

/// Pool-level TCP connect timeout (3 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 3;

/// Pool-level socket read timeout (20 seconds).
pub const SOCKET_TIMEOUT_SECS: u64 = 20;

/// Default wait for a pooled connection lease.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default wait for the peer's response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default redirect hop limit.
pub const MAX_REDIRECTS: usize = 3;

/// Multipart form field used for uploads unless the request names another.
pub const DEFAULT_FILE_FIELD: &str = "file";

/// Default `Accept` header.
pub const DEFAULT_ACCEPT: &str = "application/json, text/plain, */*";

/// Default `Accept-Language` header.
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;";

/// Media types whose responses are buffered as downloadable files.
pub const FILE_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "audio/mpeg",
    "audio/wav",
    "video/mp4",
    "video/mpeg",
    "application/pdf",
    "application/msword",
];
