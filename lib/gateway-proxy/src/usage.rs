//! Usage recording after a successful forward

use gateway_core::{token_fingerprint, MetadataStore, ProxyToken, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Advances a token's usage counter once per forwarded request.
///
/// Runs only after the destination answered (any status). The quota check
/// and this write are separate round trips, so concurrent requests for one
/// token can overshoot `limit` unless the store increments atomically.
pub struct UsageRecorder {
    store: Arc<dyn MetadataStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        token: &str,
        observed: &ProxyToken,
    ) -> std::result::Result<(), StoreError> {
        match self.store.increment_usage(token, observed).await {
            Ok(()) => {
                debug!(
                    token = %token_fingerprint(token),
                    store = self.store.name(),
                    "Recorded usage"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    token = %token_fingerprint(token),
                    store = self.store.name(),
                    error = %e,
                    "Failed to record usage"
                );
                Err(e)
            }
        }
    }
}
