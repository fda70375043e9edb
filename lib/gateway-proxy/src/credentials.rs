//! Credential resolution against the metadata store

use crate::error::{Denial, GatewayError, Result};
use gateway_core::{token_fingerprint, MetadataStore, ProxyToken};
use std::sync::Arc;
use tracing::debug;

/// Resolves a proxy token to its record and checks it may be used.
///
/// Checks run in a fixed order (existence, then status, then quota) so a
/// disabled token never reveals its quota and an unknown token reveals nothing.
pub struct CredentialResolver {
    store: Arc<dyn MetadataStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, token: &str) -> Result<ProxyToken> {
        let fingerprint = token_fingerprint(token);

        let record = self
            .store
            .get_token(token)
            .await
            .map_err(|e| GatewayError::from_store("credentials", e))?
            .ok_or_else(|| {
                debug!(token = %fingerprint, "Token lookup missed");
                GatewayError::Unauthorized
            })?;

        if !record.is_active() {
            debug!(token = %fingerprint, "Token is disabled");
            return Err(GatewayError::Forbidden(Denial::TokenDisabled));
        }

        if record.quota_exhausted() {
            debug!(
                token = %fingerprint,
                usage = record.usage,
                limit = record.limit,
                "Token quota exhausted"
            );
            return Err(GatewayError::QuotaExceeded);
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{MemoryStore, TokenStatus};

    async fn resolver_with(token: &str, record: ProxyToken) -> CredentialResolver {
        let store = MemoryStore::new();
        store.insert_token(token, record).await;
        CredentialResolver::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_resolves_active_token() {
        let resolver = resolver_with("ping_ok", ProxyToken::new("u", 10).with_usage(9)).await;
        let record = resolver.resolve("ping_ok").await.unwrap();
        assert_eq!(record.usage, 9);
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let resolver = resolver_with("ping_ok", ProxyToken::new("u", 10)).await;
        assert_eq!(
            resolver.resolve("ping_other").await.unwrap_err(),
            GatewayError::Unauthorized
        );
    }

    #[tokio::test]
    async fn test_deleted_token_matches_unknown() {
        let store = MemoryStore::new();
        store.insert_token("ping_old", ProxyToken::new("u", 10)).await;
        store.remove_token("ping_old").await;
        let resolver = CredentialResolver::new(Arc::new(store));

        let deleted = resolver.resolve("ping_old").await.unwrap_err();
        let never = resolver.resolve("ping_never").await.unwrap_err();
        assert_eq!(deleted, never);
        assert_eq!(deleted.to_string(), never.to_string());
    }

    #[tokio::test]
    async fn test_disabled_before_quota() {
        let record = ProxyToken::new("u", 1)
            .with_usage(5)
            .with_status(TokenStatus::Disabled);
        let resolver = resolver_with("ping_off", record).await;

        let err = resolver.resolve("ping_off").await.unwrap_err();
        assert_eq!(err, GatewayError::Forbidden(Denial::TokenDisabled));
    }

    #[tokio::test]
    async fn test_quota_exhausted() {
        let resolver = resolver_with("ping_full", ProxyToken::new("u", 2).with_usage(2)).await;
        assert_eq!(
            resolver.resolve("ping_full").await.unwrap_err(),
            GatewayError::QuotaExceeded
        );
    }
}
