//! Edge request-gateway pipeline
//!
//! A proxied request flows through five stages, each of which can end it:
//! header extraction, credential resolution, boundary policy evaluation,
//! forwarding to the destination, and usage recording.

pub mod credentials;
pub mod error;
pub mod extractor;
pub mod forwarder;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod usage;

pub use credentials::CredentialResolver;
pub use error::{Denial, GatewayError};
pub use extractor::{extract, ProxyTarget, PROXY_KEY, PROXY_TARGET};
pub use forwarder::{RequestForwarder, DEFAULT_MAX_BODY_BYTES};
pub use http::{BoxError, ResponseBody};
pub use gateway::Gateway;
pub use metrics::{MetricsCollector, MetricsMiddleware};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, RequestContext};
pub use policy::{ClientIpSource, PolicyEvaluator};
pub use usage::UsageRecorder;
