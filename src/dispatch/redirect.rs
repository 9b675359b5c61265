//! Redirect decisions, driven by the per-request config.
//!
//! The shared client never follows redirects itself; the dispatcher asks
//! [`next_hop`] after every response so hop limits and circular-chain
//! rules can differ per request.

use url::Url;

use crate::error::ClientError;
use crate::request::{Method, RequestConfig};

/// What to do after a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Hop {
    /// Hand the response to the classifier.
    Done,
    /// Re-issue the request.
    Follow {
        url: Url,
        method: Method,
        /// False when the body must be dropped (method switched to GET).
        keep_body: bool,
    },
}

/// Decides whether the response to `current` is followed, and how.
///
/// `visited` holds every URL requested so far in this send, the current one included.
pub(crate) fn next_hop(
    status: u16,
    location: Option<&str>,
    current: &Url,
    method: Method,
    config: &RequestConfig,
    hops_taken: usize,
    visited: &[Url],
) -> Result<Hop, ClientError> {
    if !config.redirects_enabled {
        return Ok(Hop::Done);
    }
    let (method, keep_body) = match status {
        301..=303 => (Method::Get, false),
        307 | 308 => (method, true),
        _ => return Ok(Hop::Done),
    };
    let Some(location) = location.map(str::trim).filter(|l| !l.is_empty()) else {
        return Ok(Hop::Done);
    };

    let target = current.join(location).map_err(|e| {
        ClientError::redirect(current.as_str(), format!("invalid Location `{location}`: {e}"))
    })?;
    if hops_taken >= config.max_redirects {
        return Err(ClientError::redirect(
            current.as_str(),
            format!("maximum redirects ({}) exceeded", config.max_redirects),
        ));
    }
    if !config.circular_redirects_allowed && visited.contains(&target) {
        return Err(ClientError::redirect(
            current.as_str(),
            format!("circular redirect to {target}"),
        ));
    }
    Ok(Hop::Follow {
        url: target,
        method,
        keep_body,
    })
}
