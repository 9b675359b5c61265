//! Immutable request descriptions and their builder.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::Serialize;
use url::Url;

use super::method::{Method, RequestConfig};
use crate::constants::DEFAULT_FILE_FIELD;
use crate::error::ClientError;

/// Everything needed to send one request. Reusable across sends.
///
/// Built with [`RequestSpec::builder`]; nothing is validated until the spec
/// is resolved at send time.
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    url: String,
    method: String,
    query_params: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    body: Option<String>,
    upload_files: BTreeMap<String, Vec<u8>>,
    file_field: Option<String>,
    request_config: Option<RequestConfig>,
    resolved_config: OnceLock<RequestConfig>,
}

impl RequestSpec {
    /// Starts a new builder.
    #[must_use]
    pub fn builder() -> RequestSpecBuilder {
        RequestSpecBuilder::default()
    }

    /// The URL as supplied.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The method as supplied.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Query parameters appended to the URL at send time.
    #[must_use]
    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.query_params
    }

    /// Explicit headers, applied over the defaults.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// The text body. An empty body counts as no body.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref().filter(|body| !body.is_empty())
    }

    /// Files to upload, keyed by filename.
    #[must_use]
    pub fn upload_files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.upload_files
    }

    /// Multipart field name for uploads (`file` unless set).
    #[must_use]
    pub fn file_field(&self) -> &str {
        self.file_field.as_deref().unwrap_or(DEFAULT_FILE_FIELD)
    }

    /// The per-request config, if one was supplied.
    #[must_use]
    pub fn request_config(&self) -> Option<&RequestConfig> {
        self.request_config.as_ref()
    }

    /// The URL with query parameters appended.
    ///
    /// Parameters are form-encoded and added after any query already on the URL.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] if the URL is empty
    /// - [`ClientError::InvalidUrl`] if it cannot be parsed
    pub fn resolve_uri(&self) -> Result<Url, ClientError> {
        let trimmed = self.url.trim();
        if trimmed.is_empty() {
            return Err(ClientError::validation("request URL must not be empty"));
        }
        let mut url = Url::parse(trimmed).map_err(|_| ClientError::invalid_url(&self.url))?;
        if !self.query_params.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query_params.iter());
        }
        Ok(url)
    }

    /// The effective per-request config: the supplied one, or the defaults.
    ///
    /// Computed on first use and cached for later sends of the same spec.
    pub fn resolve_config(&self) -> &RequestConfig {
        self.resolved_config
            .get_or_init(|| self.request_config.unwrap_or_default())
    }

    /// The parsed method.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Validation`] if the method is empty
    /// - [`ClientError::UnrecognizedMethod`] for anything but GET, POST, PUT or DELETE
    pub fn resolve_method(&self) -> Result<Method, ClientError> {
        Method::parse(&self.method)
    }
}

/// Fluent builder for [`RequestSpec`].
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct RequestSpecBuilder {
    spec: RequestSpec,
}

impl RequestSpecBuilder {
    /// Sets the target URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.spec.url = url.into();
        self
    }

    /// Sets the method (`GET`, `POST`, `PUT` or `DELETE`, any case).
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.spec.method = method.into();
        self
    }

    /// Adds one query parameter, replacing an earlier value for the same name.
    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.query_params.insert(name.into(), value.into());
        self
    }

    /// Adds several query parameters.
    pub fn query_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.spec
            .query_params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Adds one header. Replaces a default header of the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.headers.insert(name.into(), value.into());
        self
    }

    /// Adds several headers.
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.spec
            .headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the text body. For form sends it must already be `x-www-form-urlencoded`.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.spec.body = Some(body.into());
        self
    }

    /// Serializes `value` to JSON and uses it as the body.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Serialization`] if `value` cannot be serialized.
    pub fn json_body<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, ClientError> {
        let body = serde_json::to_string(value)
            .map_err(|source| ClientError::Serialization { source })?;
        self.spec.body = Some(body);
        Ok(self)
    }

    /// Overrides the default per-request config.
    pub fn request_config(mut self, config: RequestConfig) -> Self {
        self.spec.request_config = Some(config);
        self
    }

    /// Adds one file to upload. A second file with the same name replaces the first.
    pub fn upload_file(mut self, filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.spec.upload_files.insert(filename.into(), content.into());
        self
    }

    /// Adds several files to upload.
    pub fn upload_files<K, V>(mut self, files: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        self.spec
            .upload_files
            .extend(files.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the multipart field name uploads are sent under.
    pub fn file_field(mut self, name: impl Into<String>) -> Self {
        self.spec.file_field = Some(name.into());
        self
    }

    /// Finishes the spec. Never fails; validation happens at send time.
    pub fn build(self) -> RequestSpec {
        self.spec
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::*;

    fn query_of(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    #[test]
    fn test_resolve_uri_appends_query_independent_of_order() {
        let forward = RequestSpec::builder()
            .url("http://example.com/search")
            .method("get")
            .query_param("q", "rust lang")
            .query_param("page", "2")
            .build();
        let backward = RequestSpec::builder()
            .url("http://example.com/search")
            .method("GET")
            .query_params([("page", "2"), ("q", "rust lang")])
            .build();

        let a = forward.resolve_uri().unwrap();
        let b = backward.resolve_uri().unwrap();
        assert_eq!(query_of(&a), query_of(&b));
        assert_eq!(
            query_of(&a),
            HashMap::from([
                ("q".to_string(), "rust lang".to_string()),
                ("page".to_string(), "2".to_string()),
            ])
        );
        assert!(a.as_str().contains("q=rust+lang"), "got: {a}");
    }

    #[test]
    fn test_resolve_uri_without_params_keeps_url() {
        let spec = RequestSpec::builder().url("http://example.com/a?x=1").build();
        assert_eq!(spec.resolve_uri().unwrap().as_str(), "http://example.com/a?x=1");
    }

    #[test]
    fn test_resolve_uri_empty_url_is_validation_error() {
        let spec = RequestSpec::builder().method("GET").build();
        assert!(matches!(
            spec.resolve_uri().unwrap_err(),
            ClientError::Validation { .. }
        ));
    }

    #[test]
    fn test_resolve_uri_garbage_is_invalid_url() {
        let spec = RequestSpec::builder().url("no scheme here").build();
        assert!(matches!(
            spec.resolve_uri().unwrap_err(),
            ClientError::InvalidUrl { .. }
        ));
    }

    #[test]
    fn test_resolve_config_defaults_and_caches() {
        let spec = RequestSpec::builder().url("http://example.com").build();
        assert!(spec.request_config().is_none());
        let first: *const RequestConfig = spec.resolve_config();
        let second: *const RequestConfig = spec.resolve_config();
        assert_eq!(first, second);
        assert_eq!(*spec.resolve_config(), RequestConfig::default());
    }

    #[test]
    fn test_resolve_config_uses_supplied_config() {
        let config = RequestConfig {
            response_timeout: Duration::from_millis(500),
            redirects_enabled: false,
            ..RequestConfig::default()
        };
        let spec = RequestSpec::builder().request_config(config).build();
        assert_eq!(*spec.resolve_config(), config);
    }

    #[test]
    fn test_empty_body_counts_as_none() {
        let spec = RequestSpec::builder().body("").build();
        assert_eq!(spec.body(), None);
        let spec = RequestSpec::builder().body("{}").build();
        assert_eq!(spec.body(), Some("{}"));
    }

    #[test]
    fn test_json_body_serializes_value() {
        #[derive(Serialize)]
        struct Payload {
            a: u32,
        }
        let spec = RequestSpec::builder()
            .json_body(&Payload { a: 1 })
            .unwrap()
            .build();
        assert_eq!(spec.body(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_file_field_defaults_to_file() {
        let spec = RequestSpec::builder().upload_file("a.txt", b"x".to_vec()).build();
        assert_eq!(spec.file_field(), "file");
        let spec = RequestSpec::builder().file_field("attachment").build();
        assert_eq!(spec.file_field(), "attachment");
    }

    #[test]
    fn test_resolve_method_reports_raw_input() {
        let spec = RequestSpec::builder().method("patch").build();
        let error = spec.resolve_method().unwrap_err();
        assert!(error.to_string().contains("patch"));
    }
}
