//! Core data model and metadata store access for the edge gateway
//!
//! This library provides:
//! - Proxy token records and boundary rules as the management surface stores them
//! - The `MetadataStore` collaborator trait the gateway reads and writes through
//! - In-memory and remote key/value store backends

pub mod error;
pub mod memory;
pub mod remote;
pub mod rule;
pub mod store;
pub mod token;

pub use error::{Result, StoreError};
pub use memory::{MemoryStore, Seed};
pub use remote::RemoteKvStore;
pub use rule::{BoundaryRule, RuleKind};
pub use store::MetadataStore;
pub use token::{token_fingerprint, ProxyToken, TokenStatus};
