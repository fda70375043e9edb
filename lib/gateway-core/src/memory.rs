//! In-memory metadata store for local runs and tests

use crate::{BoundaryRule, MetadataStore, ProxyToken, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Initial contents of a `MemoryStore`, loaded from YAML or JSON
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub tokens: HashMap<String, ProxyToken>,
    #[serde(default)]
    pub rules: Vec<BoundaryRule>,
}

impl Seed {
    /// Parse a seed document. YAML is a superset of JSON, so either works.
    pub fn from_document(document: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(document)?)
    }
}

/// MemoryStore keeps token records and block rules in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    tokens: Arc<RwLock<HashMap<String, ProxyToken>>>,
    rules: Arc<RwLock<HashSet<BoundaryRule>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        debug!(
            "Seeding memory store with {} tokens and {} rules",
            seed.tokens.len(),
            seed.rules.len()
        );
        Self {
            tokens: Arc::new(RwLock::new(seed.tokens)),
            rules: Arc::new(RwLock::new(seed.rules.into_iter().collect())),
        }
    }

    /// Create or replace a token record
    pub async fn insert_token(&self, token: impl Into<String>, record: ProxyToken) {
        self.tokens.write().await.insert(token.into(), record);
    }

    /// Delete a token; later lookups treat it as never having existed
    pub async fn remove_token(&self, token: &str) -> Option<ProxyToken> {
        self.tokens.write().await.remove(token)
    }

    /// Current record for a token
    pub async fn token(&self, token: &str) -> Option<ProxyToken> {
        self.tokens.read().await.get(token).cloned()
    }

    pub async fn add_rule(&self, rule: BoundaryRule) {
        self.rules.write().await.insert(rule);
    }

    pub async fn remove_rule(&self, rule: &BoundaryRule) -> bool {
        self.rules.write().await.remove(rule)
    }

    pub async fn token_count(&self) -> usize {
        self.tokens.read().await.len()
    }
}

#[async_trait::async_trait]
impl MetadataStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_token(&self, token: &str) -> Result<Option<ProxyToken>> {
        Ok(self.token(token).await)
    }

    async fn rule_exists(&self, rule: &BoundaryRule) -> Result<bool> {
        Ok(self.rules.read().await.contains(rule))
    }

    async fn put_token(&self, token: &str, record: &ProxyToken) -> Result<()> {
        self.insert_token(token, record.clone()).await;
        Ok(())
    }

    /// Increments the current record under the write lock, so concurrent
    /// requests never lose an increment. A token deleted since it was
    /// authorised stays deleted.
    async fn increment_usage(&self, token: &str, _observed: &ProxyToken) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        match tokens.get_mut(token) {
            Some(record) => {
                record.usage = record.usage.saturating_add(1);
            }
            None => {
                debug!("Skipping usage increment for a token deleted mid-request");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokenStatus;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryStore::new();
        store.insert_token("ping_a", ProxyToken::new("u", 10)).await;

        let record = store.get_token("ping_a").await.unwrap();
        assert_eq!(record.map(|t| t.limit), Some(10));
        assert!(store.get_token("ping_b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_removed_token_is_a_miss() {
        let store = MemoryStore::new();
        store.insert_token("ping_a", ProxyToken::new("u", 10)).await;
        store.remove_token("ping_a").await;
        assert!(store.get_token("ping_a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rules_are_exact_match() {
        let store = MemoryStore::new();
        store.add_rule(BoundaryRule::block_path("/admin")).await;

        assert!(store.rule_exists(&BoundaryRule::block_path("/admin")).await.unwrap());
        assert!(!store.rule_exists(&BoundaryRule::block_path("/admin/users")).await.unwrap());
        assert!(!store.rule_exists(&BoundaryRule::block_domain("/admin")).await.unwrap());

        assert!(store.remove_rule(&BoundaryRule::block_path("/admin")).await);
        assert!(!store.rule_exists(&BoundaryRule::block_path("/admin")).await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_uses_current_record() {
        let store = MemoryStore::new();
        store.insert_token("ping_a", ProxyToken::new("u", 10).with_usage(3)).await;

        // A stale observation must not roll the counter back
        let stale = ProxyToken::new("u", 10).with_usage(0);
        store.increment_usage("ping_a", &stale).await.unwrap();

        assert_eq!(store.token("ping_a").await.unwrap().usage, 4);
    }

    #[tokio::test]
    async fn test_increment_does_not_resurrect_deleted_token() {
        let store = MemoryStore::new();
        let observed = ProxyToken::new("u", 10);
        store.increment_usage("ping_gone", &observed).await.unwrap();
        assert_eq!(store.token_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = MemoryStore::new();
        store.insert_token("ping_a", ProxyToken::new("u", 1000)).await;
        let observed = ProxyToken::new("u", 1000);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let observed = observed.clone();
            handles.push(tokio::spawn(async move {
                store.increment_usage("ping_a", &observed).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.token("ping_a").await.unwrap().usage, 50);
    }

    #[test]
    fn test_seed_from_yaml() {
        let seed = Seed::from_document(
            r#"
tokens:
  ping_demo:
    status: active
    usage: 0
    limit: 100
    userId: user_1
    targetApiKey: sk-demo
  ping_off:
    status: disabled
    limit: 100
rules:
  - kind: domain
    value: evil.example.com
  - kind: ip
    value: 203.0.113.9
"#,
        )
        .unwrap();

        assert_eq!(seed.tokens.len(), 2);
        assert_eq!(seed.tokens["ping_off"].status, TokenStatus::Disabled);
        assert_eq!(seed.tokens["ping_demo"].vaulted_secret(), Some("sk-demo"));
        assert_eq!(seed.rules.len(), 2);
    }

    #[test]
    fn test_seed_from_json() {
        let seed = Seed::from_document(
            r#"{"tokens":{"ping_x":{"status":"active","limit":1}},"rules":[]}"#,
        )
        .unwrap();
        assert_eq!(seed.tokens["ping_x"].limit, 1);
    }

    #[test]
    fn test_invalid_seed() {
        assert!(Seed::from_document("tokens: [1, 2").is_err());
    }

    #[tokio::test]
    async fn test_from_seed() {
        let mut seed = Seed::default();
        seed.tokens.insert("ping_x".to_string(), ProxyToken::new("u", 1));
        seed.rules.push(BoundaryRule::block_ip("10.0.0.1"));

        let store = MemoryStore::from_seed(seed);
        assert!(store.get_token("ping_x").await.unwrap().is_some());
        assert!(store.rule_exists(&BoundaryRule::block_ip("10.0.0.1")).await.unwrap());
    }
}
