//! Metadata store collaborator interface

use crate::{BoundaryRule, ProxyToken, Result};

/// Prefix of every token record key in the metadata store
pub const TOKEN_KEY_PREFIX: &str = "key:";

/// Key under which a token's record is stored
pub fn token_key(token: &str) -> String {
    format!("{}{}", TOKEN_KEY_PREFIX, token)
}

/// External key/value store holding token records and boundary rules.
///
/// The gateway owns none of this data. It reads tokens and rules and writes
/// back usage; it must not assume the store is strongly consistent.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str {
        "UnnamedStore"
    }

    /// Look up a token record. A deleted token is `Ok(None)`, same as one that never existed.
    async fn get_token(&self, token: &str) -> Result<Option<ProxyToken>>;

    /// Point lookup of a single block rule
    async fn rule_exists(&self, rule: &BoundaryRule) -> Result<bool>;

    /// Overwrite a token record
    async fn put_token(&self, token: &str, record: &ProxyToken) -> Result<()>;

    /// Advance a token's usage by one.
    ///
    /// `observed` is the record read when the request was authorised. The
    /// default writes `observed` plus one, a read-then-write that can lose
    /// increments under concurrent requests for the same token. Backends with
    /// an atomic counter should override this.
    async fn increment_usage(&self, token: &str, observed: &ProxyToken) -> Result<()> {
        self.put_token(token, &observed.with_incremented_usage()).await
    }
}
