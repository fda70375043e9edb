//! REST key/value store client
//!
//! Talks to a key/value namespace exposed as `GET`/`PUT {base}/values/{key}`,
//! the shape used by hosted edge KV services. A `404` is a miss.

use crate::store::token_key;
use crate::{BoundaryRule, MetadataStore, ProxyToken, Result, StoreError};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, warn};

pub struct RemoteKvStore {
    client: Client,
    base_url: Url,
    /// Optional bearer credential for the store's API
    api_token: Option<String>,
}

impl RemoteKvStore {
    /// Create a client for the namespace rooted at `base_url`
    pub fn new(base_url: &str, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StoreError::Internal(format!("invalid store URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Internal(format!(
                "store URL {} cannot carry a path",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn value_url(&self, key: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Internal("store URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push("values")
            .push(key);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>> {
        let url = self.value_url(key)?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| StoreError::Unavailable(e.to_string()))?;
                Ok(Some(body))
            }
            status => {
                warn!("Metadata store GET returned {}", status);
                Err(StoreError::Rejected {
                    status: status.as_u16(),
                })
            }
        }
    }

    async fn put_value(&self, key: &str, value: String) -> Result<()> {
        let url = self.value_url(key)?;
        let response = self
            .authorize(self.client.put(url))
            .body(value)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            warn!("Metadata store PUT returned {}", response.status());
            return Err(StoreError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetadataStore for RemoteKvStore {
    fn name(&self) -> &'static str {
        "remote-kv"
    }

    async fn get_token(&self, token: &str) -> Result<Option<ProxyToken>> {
        let key = token_key(token);
        match self.get_value(&key).await? {
            Some(raw) => {
                let record = serde_json::from_str(&raw)
                    .map_err(|source| StoreError::Corrupt { key, source })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn rule_exists(&self, rule: &BoundaryRule) -> Result<bool> {
        let present = self
            .get_value(&rule.store_key())
            .await?
            .is_some_and(|value| !value.is_empty());
        debug!("Rule lookup {} -> {}", rule.kind, present);
        Ok(present)
    }

    async fn put_token(&self, token: &str, record: &ProxyToken) -> Result<()> {
        let body = serde_json::to_string(record).map_err(|source| StoreError::Corrupt {
            key: token_key(token),
            source,
        })?;
        self.put_value(&token_key(token), body).await
    }
}
