//! Typed failures of the gateway pipeline

use gateway_core::{RuleKind, StoreError};
use hyper::StatusCode;
use std::fmt;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Message returned when the destination cannot be reached
pub const UPSTREAM_UNREACHABLE: &str = "Gateway Error: Unable to reach target API";

/// Message returned when the metadata store fails during a lookup
pub const STORE_UNAVAILABLE: &str = "Gateway Error: metadata store unavailable";

/// Every way a request can be rejected. All of them are terminal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Missing or malformed `Proxy-Target`
    #[error("{0}")]
    BadRequest(String),

    /// Missing `Proxy-Key`
    #[error("Missing API Key (Proxy-Key header required)")]
    Unauthenticated,

    /// Token unknown or deleted; the two are indistinguishable
    #[error("Unauthorized: Invalid API Key")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(Denial),

    #[error("Rate Limit Exceeded: API Key quota exhausted")]
    QuotaExceeded,

    /// Inbound body larger than the forwarder's cap (bytes)
    #[error("Payload Too Large: request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// Destination (or metadata store) could not be reached
    #[error("{0}")]
    UpstreamUnreachable(String),
}

/// Why a request was refused with 403
#[derive(Debug, Clone, PartialEq)]
pub enum Denial {
    TokenDisabled,
    Boundary { kind: RuleKind, value: String },
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::TokenDisabled => f.write_str("Forbidden: API Key is disabled"),
            Denial::Boundary { kind, value } => {
                write!(f, "Access Denied: {} {} is blocked by edge policy", kind, value)
            }
        }
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthenticated | GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Unauthenticated => "unauthenticated",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::QuotaExceeded => "quota_exceeded",
            GatewayError::PayloadTooLarge(_) => "payload_too_large",
            GatewayError::UpstreamUnreachable(_) => "upstream_unreachable",
        }
    }

    /// Mask a store failure hit during a lookup stage
    pub fn from_store(stage: &'static str, err: StoreError) -> Self {
        error!(stage = stage, error = %err, "Metadata store lookup failed");
        GatewayError::UpstreamUnreachable(STORE_UNAVAILABLE.to_string())
    }
}
