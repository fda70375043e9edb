//! Middleware hooks around the gateway pipeline

use crate::error::GatewayError;
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Instrument, Level};
use uuid::Uuid;

/// Per-request facts passed through the middleware chain.
///
/// Filled in as the pipeline advances; the token is only ever held as a
/// fingerprint.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub method: String,
    pub client_ip: String,
    pub token_fingerprint: Option<String>,
    pub target_host: Option<String>,
    /// Set once the destination has answered
    pub forwarded: bool,
    /// CORS preflight answered by the gateway itself
    pub preflight: bool,
    pub started: Instant,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            method: method.into(),
            client_ip: client_ip.into(),
            token_fingerprint: None,
            target_host: None,
            forwarded: false,
            preflight: false,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Middleware trait for observing requests, responses and rejections
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str {
        "UnnamedMiddleware"
    }

    /// Called before the pipeline runs
    async fn on_request(&self, _context: &RequestContext) -> Result<()> {
        Ok(())
    }

    /// Called with the status of every response, including rejections
    async fn on_response(&self, _context: &RequestContext, _status: u16) -> Result<()> {
        Ok(())
    }

    /// Called when a stage rejects the request
    async fn on_error(&self, _context: &RequestContext, _error: &GatewayError) -> Result<()> {
        Ok(())
    }
}

/// Chain of middleware to execute in order
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self {
            middleware: Vec::new(),
        }
    }

    /// Add middleware to the chain
    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub async fn on_request(&self, context: &RequestContext) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_request(context).instrument(span).await?;
        }
        Ok(())
    }

    /// Process response through all middleware (in reverse order)
    pub async fn on_response(&self, context: &RequestContext, status: u16) -> Result<()> {
        for mw in self.middleware.iter().rev() {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_response(context, status).instrument(span).await?;
        }
        Ok(())
    }

    pub async fn on_error(&self, context: &RequestContext, error: &GatewayError) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_error(context, error).instrument(span).await?;
        }
        Ok(())
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Structured request logging
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }

    async fn on_request(&self, context: &RequestContext) -> Result<()> {
        debug!(
            request_id = %context.request_id,
            method = %context.method,
            client_ip = %context.client_ip,
            "Request received"
        );
        Ok(())
    }

    async fn on_response(&self, context: &RequestContext, status: u16) -> Result<()> {
        info!(
            request_id = %context.request_id,
            method = %context.method,
            token = context.token_fingerprint.as_deref().unwrap_or("-"),
            target = context.target_host.as_deref().unwrap_or("-"),
            forwarded = context.forwarded,
            status = status,
            duration_ms = context.elapsed().as_millis() as u64,
            "Request completed"
        );
        Ok(())
    }

    async fn on_error(&self, context: &RequestContext, error: &GatewayError) -> Result<()> {
        match error {
            GatewayError::UpstreamUnreachable(_) => warn!(
                request_id = %context.request_id,
                kind = error.kind(),
                target = context.target_host.as_deref().unwrap_or("-"),
                "Request failed"
            ),
            _ => debug!(
                request_id = %context.request_id,
                kind = error.kind(),
                error = %error,
                "Request rejected"
            ),
        }
        Ok(())
    }
}
