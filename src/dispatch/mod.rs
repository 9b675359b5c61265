//! Request execution: headers, bodies, leases, redirects and classification.

mod observer;
mod redirect;

use std::sync::Arc;

use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
    USER_AGENT,
};
use reqwest::multipart::{Form, Part};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::constants::{DEFAULT_ACCEPT, DEFAULT_ACCEPT_LANGUAGE};
use crate::error::ClientError;
use crate::pool::{PoolManager, Route};
use crate::request::{BodyEncoding, Method, RequestConfig, RequestSpec};
use crate::response::{HttpResult, classify, discard};
use crate::user_agent::default_user_agent;

pub use observer::{
    LoggingObserver, NoopObserver, Observers, RequestObserver, RequestRecord, ResponseObserver,
    ResponseRecord,
};

use redirect::{Hop, next_hop};

const JSON_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const OCTET_STREAM: &str = "application/octet-stream";

/// The body of one hop, rebuilt into a reqwest body for every send.
#[derive(Debug, Clone)]
enum OutgoingBody {
    Empty,
    Text {
        content_type: &'static str,
        text: String,
    },
    Multipart {
        field: String,
        /// (percent-encoded filename, content)
        files: Vec<(String, Vec<u8>)>,
    },
}

impl OutgoingBody {
    fn prepare(spec: &RequestSpec, encoding: BodyEncoding) -> Result<Self, ClientError> {
        let text = |content_type| {
            spec.body().map_or(Self::Empty, |text| Self::Text {
                content_type,
                text: text.to_string(),
            })
        };
        match encoding {
            BodyEncoding::None => Ok(Self::Empty),
            BodyEncoding::Json => Ok(text(JSON_CONTENT_TYPE)),
            BodyEncoding::Form => Ok(text(FORM_CONTENT_TYPE)),
            BodyEncoding::Multipart => {
                if spec.upload_files().is_empty() {
                    return Err(ClientError::validation("nothing to upload"));
                }
                let files = spec
                    .upload_files()
                    .iter()
                    .map(|(name, content)| (encode_upload_filename(name), content.clone()))
                    .collect();
                Ok(Self::Multipart {
                    field: spec.file_field().to_string(),
                    files,
                })
            }
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Text { content_type, .. } => Some(*content_type),
            Self::Multipart { .. } => Some("multipart/form-data"),
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text.as_str()),
            Self::Empty | Self::Multipart { .. } => None,
        }
    }

    fn attach(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ClientError> {
        match self {
            Self::Empty => Ok(builder),
            Self::Text { text, .. } => Ok(builder.body(text.clone())),
            Self::Multipart { field, files } => {
                let mut form = Form::new().percent_encode_noop();
                for (filename, content) in files {
                    let part = Part::bytes(content.clone())
                        .file_name(filename.clone())
                        .mime_str(OCTET_STREAM)
                        .map_err(|e| ClientError::configuration("invalid multipart part type", e))?;
                    form = form.part(field.clone(), part);
                }
                Ok(builder.multipart(form))
            }
        }
    }
}

/// Form-encodes an upload filename (UTF-8, spaces as `+`).
pub(crate) fn encode_upload_filename(name: &str) -> String {
    url::form_urlencoded::byte_serialize(name.as_bytes()).collect()
}

/// Defaults, then the body content type, then the caller's headers (which win).
fn assemble_headers(spec: &RequestSpec, body: &OutgoingBody) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    let user_agent = HeaderValue::from_str(&default_user_agent())
        .map_err(|e| ClientError::validation(format!("invalid default User-Agent: {e}")))?;
    headers.insert(USER_AGENT, user_agent);

    if let OutgoingBody::Text { content_type, .. } = body {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(*content_type));
    }

    for (name, value) in spec.headers() {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| ClientError::validation(format!("invalid header name `{name}`: {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::validation(format!("invalid value for header `{name}`: {e}")))?;
        headers.insert(header_name, header_value);
    }

    // The multipart boundary is generated per send.
    if matches!(body, OutgoingBody::Multipart { .. }) {
        headers.remove(CONTENT_TYPE);
    }
    Ok(headers)
}

/// Executes request specs against one pool with one pair of observers.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    pool: Arc<PoolManager>,
    observers: Observers,
}

impl Dispatcher {
    pub(crate) fn new(pool: Arc<PoolManager>, observers: Observers) -> Self {
        Self { pool, observers }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &Arc<PoolManager> {
        &self.pool
    }

    /// Sends `spec`, following redirects per its resolved config, and classifies the final response.
    ///
    /// Everything that can be checked without I/O is checked first. Each hop
    /// holds a lease on its own route; the final lease is released only once
    /// the body has been drained.
    #[instrument(skip(self, spec), fields(url = %spec.url(), method = %spec.method()))]
    pub(crate) async fn execute(
        &self,
        spec: &RequestSpec,
        encoding: BodyEncoding,
    ) -> Result<HttpResult, ClientError> {
        let mut method = spec.resolve_method()?;
        let mut url = spec.resolve_uri()?;
        let config = *spec.resolve_config();
        let mut body = OutgoingBody::prepare(spec, encoding)?;
        let headers = assemble_headers(spec, &body)?;

        let mut visited = vec![url.clone()];
        let mut hops = 0;
        loop {
            self.pool.check_transport(&url)?;
            let route = Route::from_url(&url)?;
            let lease = self.pool.acquire(&route, config.acquire_timeout).await?;

            let response = self
                .send_once(method, &url, &headers, &body, &config)
                .await?;
            let status = response.status().as_u16();
            self.observers.response.on_response(&ResponseRecord { uri: &url, status });

            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|value| value.to_str().ok());
            match next_hop(status, location, &url, method, &config, hops, &visited)? {
                Hop::Done => {
                    let result = classify(response).await;
                    drop(lease);
                    return result;
                }
                Hop::Follow {
                    url: next,
                    method: next_method,
                    keep_body,
                } => {
                    debug!(status, from = %url, to = %next, "following redirect");
                    discard(response).await;
                    drop(lease);
                    if !keep_body {
                        body = OutgoingBody::Empty;
                    }
                    method = next_method;
                    visited.push(next.clone());
                    url = next;
                    hops += 1;
                }
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        url: &Url,
        headers: &HeaderMap,
        body: &OutgoingBody,
        config: &RequestConfig,
    ) -> Result<reqwest::Response, ClientError> {
        self.observers.request.on_request(&RequestRecord {
            method,
            uri: url,
            content_type: body.content_type(),
            body: body.text(),
        });

        let mut headers = headers.clone();
        if matches!(body, OutgoingBody::Empty) {
            headers.remove(CONTENT_TYPE);
        }
        let builder = method
            .configured_request(self.pool.http_client(), url.clone(), config)
            .headers(headers);
        let builder = body.attach(builder)?;
        builder.send().await.map_err(|e| {
            warn!(%url, error = %e, "request failed");
            ClientError::network(url.as_str(), e)
        })
    }
}
