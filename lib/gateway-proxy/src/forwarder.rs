//! Outbound request forwarding to the proxied destination
//!
//! Rewrites gateway-private headers, injects the vaulted secret, follows
//! redirects and streams the destination's response back with CORS headers.

use crate::error::{GatewayError, Result, UPSTREAM_UNREACHABLE};
use crate::extractor::{ProxyTarget, PROXY_KEY, PROXY_TARGET};
use crate::http::{apply_cors, BoxError, ResponseBody};
use futures::TryStreamExt;
use http_body_util::{BodyExt, LengthLimitError, Limited, StreamBody};
use hyper::body::{Body, Bytes, Frame};
use hyper::header::{
    HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH,
    CONTENT_LOCATION, CONTENT_TYPE, HOST, LOCATION,
};
use hyper::http::request;
use hyper::{Method, Response, StatusCode};
use reqwest::{redirect, Client, Url};
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, info, warn};

/// Largest inbound body forwarded by default (10 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// HTTP/HTTPS forwarder for proxied requests, with connection pooling and
/// a deadline that runs until the final response headers arrive.
pub struct RequestForwarder {
    client: Client,
    timeout: Duration,
    max_redirects: usize,
    max_body_bytes: usize,
}

impl RequestForwarder {
    /// Create a forwarder. Redirects are followed here rather than by the
    /// client so `Host` and credentials are recomputed on every hop.
    pub fn new(timeout: Duration, max_redirects: usize) -> anyhow::Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;

        info!(
            "RequestForwarder initialized ({}s timeout, up to {} redirects)",
            timeout.as_secs(),
            max_redirects
        );

        Ok(Self {
            client,
            timeout,
            max_redirects,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Cap the inbound body; larger bodies are refused with 413
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Forward a request to the target destination and return its response.
    ///
    /// Any status the destination returns is a success here. Only failing to
    /// reach it before the deadline (or to read the inbound body) is an error.
    /// The deadline stops at the response headers; the body is streamed back
    /// for as long as the destination keeps sending.
    pub async fn forward<B>(
        &self,
        parts: request::Parts,
        body: B,
        target: &ProxyTarget,
        vaulted_secret: Option<&str>,
    ) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        // Buffered so redirects can replay it
        let body_bytes = if Self::carries_body(&parts.method) {
            let collected = Limited::new(body, self.max_body_bytes)
                .collect()
                .await
                .map_err(|e| {
                    if e.downcast_ref::<LengthLimitError>().is_some() {
                        debug!("Inbound body exceeds {} bytes", self.max_body_bytes);
                        GatewayError::PayloadTooLarge(self.max_body_bytes)
                    } else {
                        warn!("Failed to read inbound request body: {}", e);
                        GatewayError::UpstreamUnreachable(UPSTREAM_UNREACHABLE.to_string())
                    }
                })?;
            Some(collected.to_bytes())
        } else {
            None
        };

        let headers = Self::outbound_headers(&parts.headers, vaulted_secret);

        debug!(
            "Forwarding {} to {} ({} headers, {} body bytes)",
            parts.method,
            target.hostname(),
            headers.len(),
            body_bytes.as_ref().map_or(0, Bytes::len)
        );

        let exchange = self.exchange(
            parts.method,
            target.destination.clone(),
            headers,
            body_bytes,
        );

        match tokio_timeout(self.timeout, exchange).await {
            Ok(upstream) => Ok(Self::into_response(upstream?)),
            Err(_) => {
                warn!(
                    "Destination {} timed out after {}s",
                    target.hostname(),
                    self.timeout.as_secs()
                );
                Err(GatewayError::UpstreamUnreachable(UPSTREAM_UNREACHABLE.to_string()))
            }
        }
    }

    /// Send the request, following redirects, until a final response's
    /// headers arrive
    async fn exchange(
        &self,
        mut method: Method,
        mut url: Url,
        mut headers: HeaderMap,
        mut body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        let mut hops = 0;

        loop {
            Self::set_host(&mut headers, &url);

            let mut outbound = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(bytes) = &body {
                outbound = outbound.body(bytes.clone());
            }

            let upstream = outbound.send().await.map_err(|e| {
                warn!("Destination request error: {}", e);
                GatewayError::UpstreamUnreachable(UPSTREAM_UNREACHABLE.to_string())
            })?;

            let status = upstream.status();
            let next = match Self::redirect_location(status, upstream.headers(), &url) {
                Some(next) => next,
                None => return Ok(upstream),
            };

            // Following disabled: the redirect itself is the answer
            if self.max_redirects == 0 {
                return Ok(upstream);
            }
            if hops >= self.max_redirects {
                warn!("Destination exceeded {} redirects", self.max_redirects);
                return Err(GatewayError::UpstreamUnreachable(UPSTREAM_UNREACHABLE.to_string()));
            }
            hops += 1;

            debug!("Following {} redirect to {}", status, next.host_str().unwrap_or_default());

            if status == StatusCode::SEE_OTHER
                || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
                    && method == Method::POST)
            {
                if method != Method::HEAD {
                    method = Method::GET;
                }
                body = None;
                for name in [CONTENT_TYPE, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LOCATION] {
                    headers.remove(name);
                }
            }

            if next.origin() != url.origin() {
                headers.remove(AUTHORIZATION);
            }

            url = next;
        }
    }

    fn into_response(upstream: reqwest::Response) -> Response<ResponseBody> {
        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        Self::strip_hop_by_hop(&mut headers);

        debug!("Destination responded {}", status);

        let frames = upstream
            .bytes_stream()
            .map_ok(Frame::data)
            .map_err(|e| {
                warn!("Destination response body interrupted: {}", e);
                BoxError::from(e)
            });

        let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        apply_cors(response.headers_mut());
        response
    }

    /// Target of a followable redirect, if this response is one
    fn redirect_location(status: StatusCode, headers: &HeaderMap, current: &Url) -> Option<Url> {
        if !matches!(
            status,
            StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT
        ) {
            return None;
        }

        let location = headers.get(LOCATION)?.to_str().ok()?;
        let next = current.join(location).ok()?;
        matches!(next.scheme(), "http" | "https").then_some(next)
    }

    /// Headers sent to the destination.
    ///
    /// Drops the gateway-private headers, hop-by-hop headers, the client's
    /// `Host` and `Content-Length`. A vaulted secret becomes a bearer
    /// credential unless the client supplied its own `Authorization`.
    pub fn outbound_headers(incoming: &HeaderMap, vaulted_secret: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(incoming.len() + 2);
        for (name, value) in incoming.iter() {
            if name == PROXY_KEY
                || name == PROXY_TARGET
                || name == HOST
                || name == CONTENT_LENGTH
                || Self::is_hop_by_hop_header(name.as_str())
            {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }

        if let Some(secret) = vaulted_secret {
            if !headers.contains_key(AUTHORIZATION) {
                match HeaderValue::from_str(&format!("Bearer {}", secret)) {
                    Ok(mut value) => {
                        value.set_sensitive(true);
                        headers.insert(AUTHORIZATION, value);
                    }
                    Err(_) => warn!("Vaulted secret is not a valid header value; not injected"),
                }
            }
        }

        headers
    }

    fn set_host(headers: &mut HeaderMap, url: &Url) {
        if let Some(value) = url
            .host_str()
            .and_then(|host| HeaderValue::from_str(host).ok())
        {
            headers.insert(HOST, value);
        }
    }

    fn strip_hop_by_hop(headers: &mut HeaderMap) {
        let hop_by_hop: Vec<_> = headers
            .keys()
            .filter(|name| Self::is_hop_by_hop_header(name.as_str()))
            .cloned()
            .collect();
        for name in hop_by_hop {
            headers.remove(name);
        }
    }

    /// GET and HEAD are forwarded without a body
    fn carries_body(method: &Method) -> bool {
        !matches!(*method, Method::GET | Method::HEAD)
    }

    /// Check if header is hop-by-hop (should not be forwarded)
    fn is_hop_by_hop_header(name: &str) -> bool {
        matches!(
            name,
            "connection"
                | "keep-alive"
                | "proxy-authenticate"
                | "proxy-authorization"
                | "te"
                | "trailers"
                | "transfer-encoding"
                | "upgrade"
        )
    }
}
