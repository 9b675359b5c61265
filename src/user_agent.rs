//! Default User-Agent sent with every request unless the caller overrides it.

/// Product token used in the User-Agent header.
const PRODUCT: &str = "pooled-http";

/// Default User-Agent (identifies the library and its version).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{PRODUCT}/{version}")
}
