//! Request and response hooks run by the dispatcher on every hop.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use crate::request::Method;

/// What an observer sees of an outgoing request.
#[derive(Debug, Clone, Copy)]
pub struct RequestRecord<'a> {
    /// The method actually sent (after any redirect rewrite).
    pub method: Method,
    /// The fully resolved URI, query included.
    pub uri: &'a Url,
    /// The declared body content type, if there is a body.
    pub content_type: Option<&'a str>,
    /// The text body, if there is one. `None` for multipart uploads.
    pub body: Option<&'a str>,
}

/// What an observer sees of an incoming response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseRecord<'a> {
    /// The URI the response came from.
    pub uri: &'a Url,
    /// Response status code.
    pub status: u16,
}

/// Called before each request hop is sent.
pub trait RequestObserver: Send + Sync {
    /// Observes one outgoing request.
    fn on_request(&self, record: &RequestRecord<'_>);
}

/// Called after each response hop arrives, before redirect handling.
pub trait ResponseObserver: Send + Sync {
    /// Observes one incoming response.
    fn on_response(&self, record: &ResponseRecord<'_>);
}

impl<F> RequestObserver for F
where
    F: Fn(&RequestRecord<'_>) + Send + Sync,
{
    fn on_request(&self, record: &RequestRecord<'_>) {
        self(record);
    }
}

impl<F> ResponseObserver for F
where
    F: Fn(&ResponseRecord<'_>) + Send + Sync,
{
    fn on_response(&self, record: &ResponseRecord<'_>) {
        self(record);
    }
}

/// Default observer: logs method and URI, JSON bodies, and status codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl RequestObserver for LoggingObserver {
    fn on_request(&self, record: &RequestRecord<'_>) {
        info!(method = %record.method, uri = %record.uri, "sending request");
        if let (Some(content_type), Some(body)) = (record.content_type, record.body) {
            if is_json(content_type) {
                debug!(body, "request body");
            }
        }
    }
}

impl ResponseObserver for LoggingObserver {
    fn on_response(&self, record: &ResponseRecord<'_>) {
        info!(status = record.status, uri = %record.uri, "response received");
    }
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RequestObserver for NoopObserver {
    fn on_request(&self, _record: &RequestRecord<'_>) {}
}

impl ResponseObserver for NoopObserver {
    fn on_response(&self, _record: &ResponseRecord<'_>) {}
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
}

/// The pair of observers a dispatcher runs.
#[derive(Clone)]
pub struct Observers {
    pub(crate) request: Arc<dyn RequestObserver>,
    pub(crate) response: Arc<dyn ResponseObserver>,
}

impl Observers {
    /// Pairs a request observer with a response observer.
    pub fn new(
        request: impl RequestObserver + 'static,
        response: impl ResponseObserver + 'static,
    ) -> Self {
        Self {
            request: Arc::new(request),
            response: Arc::new(response),
        }
    }

    /// Observers that do nothing.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(NoopObserver, NoopObserver)
    }
}

impl Default for Observers {
    fn default() -> Self {
        Self::new(LoggingObserver, LoggingObserver)
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").finish_non_exhaustive()
    }
}
