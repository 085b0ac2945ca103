//! Target URL validation.
//!
//! The proxy is internal-use: buyers name the upstream themselves, so
//! private and loopback hosts are deliberately permitted. Only the URL
//! shape and the protocol are enforced.

use url::Url;

use crate::error::ProxyError;

/// Validates the `target` query parameter.
///
/// # Errors
///
/// Returns [`ProxyError::InvalidUrl`] if `raw` is not an absolute URL with
/// a host, and [`ProxyError::InvalidProtocol`] for schemes other than
/// `http`/`https`.
pub fn validate_target_url(raw: &str) -> Result<Url, ProxyError> {
    let parsed = Url::parse(raw).map_err(|_| ProxyError::InvalidUrl)?;

    match parsed.scheme() {
        "http" | "https" => {}
        _ => return Err(ProxyError::InvalidProtocol),
    }

    if parsed.host_str().is_none() {
        return Err(ProxyError::InvalidUrl);
    }

    Ok(parsed)
}
