//! Boundary policy evaluation for proxied requests

use crate::error::{Denial, GatewayError, Result};
use crate::extractor::ProxyTarget;
use gateway_core::{BoundaryRule, MetadataStore, ProxyToken};
use hyper::header::{HeaderMap, HeaderName};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Where the caller's IP address is read from
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ClientIpSource {
    /// The TCP peer address of the inbound connection
    #[default]
    Peer,
    /// A header set by a trusted front proxy (first comma-separated entry)
    Header(HeaderName),
}

impl ClientIpSource {
    /// Caller IP as a rule lookup value. Absent resolves to an empty string,
    /// which never matches a stored rule.
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        match self {
            ClientIpSource::Peer => peer.map(|addr| addr.ip().to_string()).unwrap_or_default(),
            ClientIpSource::Header(name) => headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Checks the ip, domain and path block rules, in that order, stopping at
/// the first match. Each check is an independent point lookup.
pub struct PolicyEvaluator {
    store: Arc<dyn MetadataStore>,
}

impl PolicyEvaluator {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub async fn evaluate(
        &self,
        token: &ProxyToken,
        client_ip: &str,
        target: &ProxyTarget,
    ) -> Result<()> {
        let checks = [
            BoundaryRule::block_ip(client_ip),
            BoundaryRule::block_domain(target.hostname()),
            BoundaryRule::block_path(target.path()),
        ];

        for rule in checks {
            let blocked = self
                .store
                .rule_exists(&rule)
                .await
                .map_err(|e| GatewayError::from_store("policy", e))?;

            if blocked {
                debug!(
                    owner = %token.owner_id,
                    boundary = %rule.kind,
                    "Request blocked by boundary rule"
                );
                return Err(GatewayError::Forbidden(Denial::Boundary {
                    kind: rule.kind,
                    value: rule.value,
                }));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::extract;
    use crate::extractor::{PROXY_KEY, PROXY_TARGET};
    use gateway_core::{MemoryStore, RuleKind};
    use hyper::header::HeaderValue;

    fn target(url: &str) -> ProxyTarget {
        let mut headers = HeaderMap::new();
        headers.insert(PROXY_KEY, HeaderValue::from_static("ping_abc"));
        headers.insert(PROXY_TARGET, HeaderValue::from_str(url).unwrap());
        extract(&headers).unwrap()
    }

    async fn evaluator_with(rules: Vec<BoundaryRule>) -> PolicyEvaluator {
        let store = MemoryStore::new();
        for rule in rules {
            store.add_rule(rule).await;
        }
        PolicyEvaluator::new(Arc::new(store))
    }

    fn blocked_kind(err: GatewayError) -> RuleKind {
        match err {
            GatewayError::Forbidden(Denial::Boundary { kind, .. }) => kind,
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_rules_passes() {
        let evaluator = evaluator_with(vec![]).await;
        let token = ProxyToken::new("u", 10);
        assert!(evaluator
            .evaluate(&token, "203.0.113.7", &target("https://api.example.com/x"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_ip_block() {
        let evaluator = evaluator_with(vec![BoundaryRule::block_ip("203.0.113.7")]).await;
        let token = ProxyToken::new("u", 10);
        let err = evaluator
            .evaluate(&token, "203.0.113.7", &target("https://api.example.com/x"))
            .await
            .unwrap_err();
        assert_eq!(blocked_kind(err), RuleKind::Ip);
    }

    #[tokio::test]
    async fn test_domain_is_exact_match() {
        let evaluator = evaluator_with(vec![BoundaryRule::block_domain("example.com")]).await;
        let token = ProxyToken::new("u", 10);

        assert!(evaluator
            .evaluate(&token, "", &target("https://api.example.com/x"))
            .await
            .is_ok());
        let err = evaluator
            .evaluate(&token, "", &target("https://example.com/x"))
            .await
            .unwrap_err();
        assert_eq!(blocked_kind(err), RuleKind::Domain);
    }

    #[tokio::test]
    async fn test_path_is_exact_match() {
        let evaluator = evaluator_with(vec![BoundaryRule::block_path("/admin")]).await;
        let token = ProxyToken::new("u", 10);

        assert!(evaluator
            .evaluate(&token, "", &target("https://api.example.com/admin/users"))
            .await
            .is_ok());
        let err = evaluator
            .evaluate(&token, "", &target("https://api.example.com/admin?x=1"))
            .await
            .unwrap_err();
        assert_eq!(blocked_kind(err), RuleKind::Path);
    }

    #[tokio::test]
    async fn test_ip_checked_first() {
        let evaluator = evaluator_with(vec![
            BoundaryRule::block_ip("198.51.100.1"),
            BoundaryRule::block_domain("evil.example.com"),
            BoundaryRule::block_path("/x"),
        ])
        .await;
        let token = ProxyToken::new("u", 10);

        let err = evaluator
            .evaluate(&token, "198.51.100.1", &target("https://evil.example.com/x"))
            .await
            .unwrap_err();
        assert_eq!(blocked_kind(err), RuleKind::Ip);

        let err = evaluator
            .evaluate(&token, "198.51.100.2", &target("https://evil.example.com/x"))
            .await
            .unwrap_err();
        assert_eq!(blocked_kind(err), RuleKind::Domain);
    }

    #[tokio::test]
    async fn test_empty_client_ip_is_not_an_error() {
        let evaluator = evaluator_with(vec![BoundaryRule::block_ip("127.0.0.1")]).await;
        let token = ProxyToken::new("u", 10);
        assert!(evaluator
            .evaluate(&token, "", &target("https://api.example.com/"))
            .await
            .is_ok());
    }

    #[test]
    fn test_client_ip_from_peer() {
        let peer: SocketAddr = "192.0.2.10:51000".parse().unwrap();
        let source = ClientIpSource::Peer;
        assert_eq!(source.client_ip(&HeaderMap::new(), Some(peer)), "192.0.2.10");
        assert_eq!(source.client_ip(&HeaderMap::new(), None), "");
    }

    #[test]
    fn test_client_ip_from_header() {
        let source = ClientIpSource::Header(HeaderName::from_static("x-forwarded-for"));
        let peer: SocketAddr = "10.0.0.1:443".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(source.client_ip(&headers, Some(peer)), "");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(source.client_ip(&headers, Some(peer)), "203.0.113.7");
    }
}
