//! Request descriptions: method, per-request policy and the immutable spec.

mod method;
mod spec;

pub use method::{Method, RequestConfig};
pub use spec::{RequestSpec, RequestSpecBuilder};

/// How the body of a [`RequestSpec`] is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyEncoding {
    /// No body, even if the spec has one.
    #[default]
    None,
    /// The text body as `application/json`.
    Json,
    /// The text body as `application/x-www-form-urlencoded`.
    Form,
    /// The upload files as `multipart/form-data`.
    Multipart,
}
