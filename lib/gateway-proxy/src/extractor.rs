//! Proxy header extraction

use crate::error::{GatewayError, Result};
use hyper::header::{HeaderMap, HeaderName};
use reqwest::Url;

/// Header carrying the opaque proxy token
pub const PROXY_KEY: HeaderName = HeaderName::from_static("proxy-key");
/// Header carrying the absolute destination URL
pub const PROXY_TARGET: HeaderName = HeaderName::from_static("proxy-target");

/// Token and destination pulled from a proxied request
#[derive(Clone, Debug, PartialEq)]
pub struct ProxyTarget {
    pub token: String,
    pub destination: Url,
}

impl ProxyTarget {
    /// Destination hostname, matched by domain rules
    pub fn hostname(&self) -> &str {
        self.destination.host_str().unwrap_or_default()
    }

    /// Destination path, matched by path rules
    pub fn path(&self) -> &str {
        self.destination.path()
    }
}

/// Pull the token and destination out of the request headers.
///
/// Only syntax is checked: the token must be present, the destination must
/// be an absolute http(s) URL with a host. A missing token wins over a bad
/// destination.
pub fn extract(headers: &HeaderMap) -> Result<ProxyTarget> {
    let token = headers
        .get(&PROXY_KEY)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(GatewayError::Unauthenticated)?;

    let raw_target = headers
        .get(&PROXY_TARGET)
        .ok_or_else(|| {
            GatewayError::BadRequest(
                "Missing Target URL (Proxy-Target header required)".to_string(),
            )
        })?
        .to_str()
        .map_err(|_| invalid_target())?;

    let destination = Url::parse(raw_target).map_err(|_| invalid_target())?;
    if !matches!(destination.scheme(), "http" | "https") {
        return Err(GatewayError::BadRequest(format!(
            "Unsupported Target URL scheme: {}",
            destination.scheme()
        )));
    }
    if destination.host_str().map_or(true, str::is_empty) {
        return Err(invalid_target());
    }

    Ok(ProxyTarget {
        token: token.to_string(),
        destination,
    })
}

fn invalid_target() -> GatewayError {
    GatewayError::BadRequest("Invalid Target URL format".to_string())
}
