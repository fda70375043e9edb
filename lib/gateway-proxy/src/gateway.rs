//! The request pipeline: extract, resolve, evaluate, forward, record

use crate::credentials::CredentialResolver;
use crate::error::Result;
use crate::extractor::extract;
use crate::forwarder::RequestForwarder;
use crate::http::{error_response, preflight_response, BoxError, ResponseBody};
use crate::middleware::{MiddlewareChain, RequestContext};
use crate::policy::{ClientIpSource, PolicyEvaluator};
use crate::usage::UsageRecorder;
use gateway_core::{token_fingerprint, MetadataStore};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Stateless handler for proxied requests.
///
/// Holds only the stage objects and the store handle; nothing about one
/// request survives into the next. Each stage can end the request with a
/// typed error, after which nothing downstream runs.
pub struct Gateway {
    resolver: CredentialResolver,
    policy: PolicyEvaluator,
    forwarder: RequestForwarder,
    usage: UsageRecorder,
    client_ip: ClientIpSource,
    middleware: MiddlewareChain,
}

impl Gateway {
    pub fn new(store: Arc<dyn MetadataStore>, forwarder: RequestForwarder) -> Self {
        Self {
            resolver: CredentialResolver::new(store.clone()),
            policy: PolicyEvaluator::new(store.clone()),
            forwarder,
            usage: UsageRecorder::new(store),
            client_ip: ClientIpSource::default(),
            middleware: MiddlewareChain::new(),
        }
    }

    pub fn with_client_ip_source(mut self, source: ClientIpSource) -> Self {
        self.client_ip = source;
        self
    }

    pub fn with_middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    /// Handle one inbound request. Never fails: rejections become JSON
    /// error envelopes.
    ///
    /// Dropping the returned future (client went away) cancels any in-flight
    /// lookup or forward and skips the usage increment.
    pub async fn handle<B>(&self, req: Request<B>, peer: Option<SocketAddr>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let client_ip = self.client_ip.client_ip(req.headers(), peer);
        let mut context = RequestContext::new(req.method().as_str(), client_ip);

        if let Err(e) = self.middleware.on_request(&context).await {
            debug!("Middleware on_request error: {}", e);
        }

        let response = if req.method() == Method::OPTIONS {
            context.preflight = true;
            preflight_response()
        } else {
            match self.run(req, &mut context).await {
                Ok(response) => response,
                Err(err) => {
                    if let Err(e) = self.middleware.on_error(&context, &err).await {
                        debug!("Middleware on_error error: {}", e);
                    }
                    error_response(&err)
                }
            }
        };

        if let Err(e) = self
            .middleware
            .on_response(&context, response.status().as_u16())
            .await
        {
            debug!("Middleware on_response error: {}", e);
        }

        response
    }

    async fn run<B>(&self, req: Request<B>, context: &mut RequestContext) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let target = extract(req.headers())?;
        context.token_fingerprint = Some(token_fingerprint(&target.token));
        context.target_host = Some(target.hostname().to_string());

        let record = self.resolver.resolve(&target.token).await?;

        self.policy
            .evaluate(&record, &context.client_ip, &target)
            .await?;

        let (parts, body) = req.into_parts();
        let response = self
            .forwarder
            .forward(parts, body, &target, record.vaulted_secret())
            .await?;
        context.forwarded = true;

        // A failed write is logged by the recorder; the destination has
        // already answered, so its response is still returned.
        let _ = self.usage.record(&target.token, &record).await;

        Ok(response)
    }
}
