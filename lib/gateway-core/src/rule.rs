//! Boundary rules read by the policy evaluator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of every block rule key in the metadata store
pub const RULE_KEY_PREFIX: &str = "rule:block:";

/// What a boundary rule is matched against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Caller's network address
    Ip,
    /// Destination hostname
    Domain,
    /// Destination path
    Path,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Ip => "ip",
            RuleKind::Domain => "domain",
            RuleKind::Path => "path",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block-list entry. Presence in the store means "block"; matching is exact.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundaryRule {
    pub kind: RuleKind,
    pub value: String,
}

impl BoundaryRule {
    pub fn new(kind: RuleKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn block_ip(value: impl Into<String>) -> Self {
        Self::new(RuleKind::Ip, value)
    }

    pub fn block_domain(value: impl Into<String>) -> Self {
        Self::new(RuleKind::Domain, value)
    }

    pub fn block_path(value: impl Into<String>) -> Self {
        Self::new(RuleKind::Path, value)
    }

    /// Composite key under which the management surface stores this rule
    pub fn store_key(&self) -> String {
        format!("{}{}:{}", RULE_KEY_PREFIX, self.kind, self.value)
    }
}
