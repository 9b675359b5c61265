//! Response classification: text bodies vs. downloadable files.
//!
//! Every response is fully buffered. Media types in [`FILE_CONTENT_TYPES`]
//! become a [`FileArtifact`] with a derived filename; everything else is
//! decoded as UTF-8 text. A response without `Content-Type` is an error.

mod filename;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use tracing::{debug, info, instrument};

use crate::constants::FILE_CONTENT_TYPES;
use crate::error::ClientError;

use filename::{resolve_filename, resolve_unique_path};

/// Response headers: lower-cased name → values in arrival order.
pub type Headers = BTreeMap<String, Vec<String>>;

/// A downloaded file: derived filename plus the full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileArtifact {
    filename: String,
    content: Vec<u8>,
}

impl FileArtifact {
    /// The derived filename (decoded, not yet sanitized).
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The file body.
    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Consumes the artifact, returning the body.
    #[must_use]
    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    /// Writes the artifact into `dir` and returns the path written.
    ///
    /// The filename is sanitized; if it is taken, `name_1.ext`, `name_2.ext`,
    /// ... is used instead. `dir` is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Io`] if the directory or file cannot be written.
    #[instrument(skip(self), fields(filename = %self.filename, bytes = self.content.len()))]
    pub fn save_to(&self, dir: &Path) -> Result<PathBuf, ClientError> {
        std::fs::create_dir_all(dir).map_err(|e| ClientError::io(dir, e))?;
        let path = resolve_unique_path(dir, &self.filename);
        std::fs::write(&path, &self.content).map_err(|e| ClientError::io(&path, e))?;
        info!(path = %path.display(), "file saved");
        Ok(path)
    }
}

/// The classified body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Decoded text body.
    Text(String),
    /// Downloadable file.
    File(FileArtifact),
}

/// A fully received, classified response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResult {
    status: u16,
    headers: Headers,
    payload: Payload,
}

impl HttpResult {
    /// The status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// All headers, lower-cased names.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of a header, looked up case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// The classified body.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// The text body, if the response was classified as text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text.as_str()),
            Payload::File(_) => None,
        }
    }

    /// The file, if the response was classified as a download.
    #[must_use]
    pub fn file(&self) -> Option<&FileArtifact> {
        match &self.payload {
            Payload::File(file) => Some(file),
            Payload::Text(_) => None,
        }
    }

    /// Consumes the result, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

/// Whether a media type is handled as text or as a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResponseKind {
    Text,
    File,
}

impl ResponseKind {
    fn detect(media_type: &str) -> Self {
        if FILE_CONTENT_TYPES.contains(&media_type) {
            Self::File
        } else {
            Self::Text
        }
    }
}

/// Folds a header map into lower-cased name → ordered values.
pub(crate) fn fold_headers(headers: &HeaderMap) -> Headers {
    let mut folded = Headers::new();
    for (name, value) in headers {
        folded
            .entry(name.as_str().to_ascii_lowercase())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    folded
}

/// `type/subtype` of a Content-Type value, parameters stripped, lower-cased.
fn media_type_of(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn first_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|values| values.first())
        .map(String::as_str)
}

/// Builds the result from an already drained body.
fn assemble(status: u16, headers: Headers, media_type: &str, body: Vec<u8>) -> HttpResult {
    let payload = match ResponseKind::detect(media_type) {
        ResponseKind::File => {
            let filename = resolve_filename(first_value(&headers, "content-disposition"), media_type);
            debug!(%filename, bytes = body.len(), "file response");
            Payload::File(FileArtifact {
                filename,
                content: body,
            })
        }
        ResponseKind::Text => {
            let text = String::from_utf8_lossy(&body).into_owned();
            debug!(body = %text, "text response");
            Payload::Text(text)
        }
    };
    HttpResult {
        status,
        headers,
        payload,
    }
}

/// Classifies a response, draining its whole body.
///
/// # Errors
///
/// - [`ClientError::UnknownResponseType`] when there is no `Content-Type`
/// - [`ClientError::Network`] / [`ClientError::Timeout`] if the body cannot be read
pub(crate) async fn classify(response: reqwest::Response) -> Result<HttpResult, ClientError> {
    let status = response.status().as_u16();
    let url = response.url().to_string();
    let headers = fold_headers(response.headers());

    let Some(media_type) = first_value(&headers, "content-type").map(media_type_of) else {
        discard(response).await;
        return Err(ClientError::unknown_response_type(&url, status));
    };

    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ClientError::network(&url, e))?;
        body.extend_from_slice(&chunk);
    }

    Ok(assemble(status, headers, &media_type, body))
}

/// Reads a response body to the end and throws it away.
///
/// A connection only goes back to the idle pool once its body has been
/// consumed. Read errors just mean the connection will not be reused.
pub(crate) async fn discard(response: reqwest::Response) -> usize {
    let url = response.url().clone();
    let mut discarded = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => discarded += chunk.len(),
            Err(error) => {
                debug!(%url, %error, "gave up draining response body");
                break;
            }
        }
    }
    debug!(%url, bytes = discarded, "response body discarded");
    discarded
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reqwest::header::{HeaderValue, SET_COOKIE};
    use tempfile::TempDir;

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut folded = Headers::new();
        for (name, value) in pairs {
            folded
                .entry((*name).to_string())
                .or_default()
                .push((*value).to_string());
        }
        folded
    }

    #[test]
    fn test_fold_headers_lowercases_and_keeps_order() {
        let mut map = HeaderMap::new();
        map.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        map.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        map.insert("X-Trace", HeaderValue::from_static("t"));

        let folded = fold_headers(&map);
        assert_eq!(folded["set-cookie"], vec!["a=1", "b=2"]);
        assert_eq!(folded["x-trace"], vec!["t"]);
    }

    #[test]
    fn test_media_type_strips_parameters() {
        assert_eq!(media_type_of("Application/PDF; name=x"), "application/pdf");
        assert_eq!(media_type_of("text/plain"), "text/plain");
    }

    #[test]
    fn test_detect_file_types() {
        for media in FILE_CONTENT_TYPES {
            assert_eq!(ResponseKind::detect(media), ResponseKind::File, "{media}");
        }
        assert_eq!(ResponseKind::detect("application/json"), ResponseKind::Text);
        assert_eq!(ResponseKind::detect("image/webp"), ResponseKind::Text);
    }

    #[test]
    fn test_json_is_text() {
        let result = assemble(
            200,
            headers(&[("content-type", "application/json")]),
            "application/json",
            br#"{"a":1}"#.to_vec(),
        );
        assert_eq!(result.text(), Some(r#"{"a":1}"#));
        assert!(result.file().is_none());
        assert_eq!(result.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn test_invalid_utf8_text_is_lossy() {
        let result = assemble(200, Headers::new(), "text/plain", vec![b'o', b'k', 0xFF]);
        assert_eq!(result.text(), Some("ok\u{FFFD}"));
    }

    #[test]
    fn test_pdf_without_disposition_is_file() {
        let result = assemble(
            200,
            headers(&[("content-type", "application/pdf")]),
            "application/pdf",
            b"%PDF-1.7".to_vec(),
        );
        let file = result.file().unwrap();
        assert!(file.filename().ends_with(".pdf"));
        assert!(file.filename().len() > ".pdf".len());
        assert_eq!(file.content(), b"%PDF-1.7");
        assert!(result.text().is_none());
    }

    #[test]
    fn test_file_uses_first_disposition() {
        let result = assemble(
            200,
            headers(&[
                ("content-disposition", "attachment; filename=first.png"),
                ("content-disposition", "attachment; filename=second.png"),
            ]),
            "image/png",
            vec![1, 2, 3],
        );
        assert_eq!(result.file().unwrap().filename(), "first.png");
    }

    #[test]
    fn test_save_to_avoids_collisions() {
        let dir = TempDir::new().unwrap();
        let file = FileArtifact {
            filename: "scan.pdf".to_string(),
            content: b"one".to_vec(),
        };
        let first = file.save_to(dir.path()).unwrap();
        let second = file.save_to(dir.path()).unwrap();
        assert_eq!(first, dir.path().join("scan.pdf"));
        assert_eq!(second, dir.path().join("scan_1.pdf"));
        assert_eq!(std::fs::read(second).unwrap(), b"one");
    }

    #[test]
    fn test_save_to_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let file = FileArtifact {
            filename: "x.gif".to_string(),
            content: vec![0],
        };
        let path = file.save_to(&nested).unwrap();
        assert!(path.starts_with(&nested));
    }

    /// A response whose body records how many chunks were pulled from it.
    fn counted_response(
        content_type: Option<&str>,
        chunks: &[&'static str],
    ) -> (reqwest::Response, Arc<AtomicUsize>) {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let stream = futures_util::stream::iter(chunks.to_vec()).map(move |chunk| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(chunk)
        });
        let mut builder = http::Response::builder().status(200);
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        let response = builder.body(reqwest::Body::wrap_stream(stream)).unwrap();
        (reqwest::Response::from(response), pulled)
    }

    #[tokio::test]
    async fn test_unknown_response_type_drains_body() {
        let (response, pulled) = counted_response(None, &["one", "two", "three"]);
        let error = classify(response).await.unwrap_err();
        assert!(matches!(error, ClientError::UnknownResponseType { status: 200, .. }));
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_discard_reads_to_end() {
        let (response, pulled) = counted_response(Some("text/html"), &["<p>", "moved", "</p>"]);
        assert_eq!(discard(response).await, 11);
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_classify_buffers_streamed_text() {
        let (response, _) = counted_response(Some("text/plain; charset=utf-8"), &["he", "llo"]);
        let result = classify(response).await.unwrap();
        assert_eq!(result.text(), Some("hello"));
    }
}
