//! Proxy token records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the hex token fingerprint used in logs
const FINGERPRINT_LEN: usize = 12;

/// Lifecycle status of a proxy token.
///
/// Anything the management surface stores other than `"active"` reads as
/// `Disabled`, so an unrecognised status is always refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    #[serde(other)]
    Disabled,
}

/// Metadata stored for a proxy token.
///
/// Field names follow the JSON records written by the management surface.
/// Fields the gateway does not interpret (display name, creation time, ...)
/// are kept in `extra` so a usage write-back never drops them.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyToken {
    pub status: TokenStatus,
    #[serde(default)]
    pub usage: u64,
    pub limit: u64,
    #[serde(rename = "userId", default)]
    pub owner_id: String,
    #[serde(rename = "targetApiKey", default, skip_serializing_if = "Option::is_none")]
    pub vaulted_secret: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProxyToken {
    /// Create an active token with zero usage
    pub fn new(owner_id: impl Into<String>, limit: u64) -> Self {
        Self {
            status: TokenStatus::Active,
            usage: 0,
            limit,
            owner_id: owner_id.into(),
            vaulted_secret: None,
            extra: Map::new(),
        }
    }

    pub fn with_status(mut self, status: TokenStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_usage(mut self, usage: u64) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_vaulted_secret(mut self, secret: impl Into<String>) -> Self {
        self.vaulted_secret = Some(secret.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == TokenStatus::Active
    }

    /// True once usage has reached the quota ceiling
    pub fn quota_exhausted(&self) -> bool {
        self.usage >= self.limit
    }

    /// The vaulted upstream secret, if one is set and non-empty
    pub fn vaulted_secret(&self) -> Option<&str> {
        self.vaulted_secret.as_deref().filter(|s| !s.is_empty())
    }

    /// Copy of this record with usage advanced by one.
    pub fn with_incremented_usage(&self) -> Self {
        let mut next = self.clone();
        next.usage = next.usage.saturating_add(1);
        next
    }
}

impl fmt::Debug for ProxyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyToken")
            .field("status", &self.status)
            .field("usage", &self.usage)
            .field("limit", &self.limit)
            .field("owner_id", &self.owner_id)
            .field("vaulted_secret", &self.vaulted_secret.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Short SHA-256 fingerprint of a token, safe to log
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut fingerprint = hex::encode(digest);
    fingerprint.truncate(FINGERPRINT_LEN);
    fingerprint
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_management_record() {
        let raw = r#"{
            "name": "Production",
            "usage": 12,
            "limit": 1000,
            "status": "active",
            "userId": "user_42",
            "targetApiKey": "sk-upstream",
            "createdAt": "2024-05-01T00:00:00Z"
        }"#;

        let token: ProxyToken = serde_json::from_str(raw).unwrap();
        assert!(token.is_active());
        assert_eq!(token.usage, 12);
        assert_eq!(token.limit, 1000);
        assert_eq!(token.owner_id, "user_42");
        assert_eq!(token.vaulted_secret(), Some("sk-upstream"));
        assert_eq!(token.extra.get("name"), Some(&Value::from("Production")));
    }

    #[test]
    fn test_missing_usage_defaults_to_zero() {
        let token: ProxyToken =
            serde_json::from_str(r#"{"status":"active","limit":5,"userId":"u"}"#).unwrap();
        assert_eq!(token.usage, 0);
        assert!(!token.quota_exhausted());
    }

    #[test]
    fn test_unknown_status_reads_as_disabled() {
        let token: ProxyToken =
            serde_json::from_str(r#"{"status":"suspended","limit":5}"#).unwrap();
        assert_eq!(token.status, TokenStatus::Disabled);
        assert!(!token.is_active());
    }

    #[test]
    fn test_increment_preserves_unknown_fields() {
        let token: ProxyToken = serde_json::from_str(
            r#"{"status":"active","usage":1,"limit":5,"userId":"u","name":"ci"}"#,
        )
        .unwrap();

        let next = token.with_incremented_usage();
        assert_eq!(next.usage, 2);
        assert_eq!(token.usage, 1);

        let written = serde_json::to_value(&next).unwrap();
        assert_eq!(written["name"], "ci");
        assert_eq!(written["usage"], 2);
        assert_eq!(written["userId"], "u");
        assert!(written.get("targetApiKey").is_none());
    }

    #[test]
    fn test_increment_saturates() {
        let token = ProxyToken::new("u", u64::MAX).with_usage(u64::MAX);
        assert_eq!(token.with_incremented_usage().usage, u64::MAX);
    }

    #[test]
    fn test_quota_boundary() {
        let token = ProxyToken::new("u", 2).with_usage(1);
        assert!(!token.quota_exhausted());
        assert!(token.with_usage(2).quota_exhausted());
        assert!(ProxyToken::new("u", 0).quota_exhausted());
    }

    #[test]
    fn test_empty_vaulted_secret_is_ignored() {
        let token = ProxyToken::new("u", 1).with_vaulted_secret("");
        assert_eq!(token.vaulted_secret(), None);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = ProxyToken::new("u", 1).with_vaulted_secret("abc123");
        let rendered = format!("{:?}", token);
        assert!(!rendered.contains("abc123"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_token_fingerprint() {
        let a = token_fingerprint("ping_0123abcd");
        assert_eq!(a.len(), FINGERPRINT_LEN);
        assert_eq!(a, token_fingerprint("ping_0123abcd"));
        assert_ne!(a, token_fingerprint("ping_0123abce"));
        assert!(!a.contains("ping"));
    }
}
