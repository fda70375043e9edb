//! Prometheus metrics for the gateway

use crate::error::GatewayError;
use crate::middleware::{Middleware, RequestContext};
use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::debug;

/// Prometheus metrics collector for gateway traffic
#[derive(Clone)]
pub struct MetricsCollector {
    /// Requests received, by method
    pub requests_total: CounterVec,
    /// Responses sent, by status code
    pub responses_total: CounterVec,
    /// Rejections, by failure kind
    pub rejections_total: CounterVec,
    /// Requests that reached the destination
    pub forwarded_total: Counter,
    /// End-to-end latency, by outcome (`forwarded`, `preflight` or `rejected`)
    pub request_duration_seconds: HistogramVec,
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new("gateway_requests_total", "Total proxied requests received"),
            &["method"],
        )?;

        let responses_total = CounterVec::new(
            Opts::new("gateway_responses_total", "Total responses by status"),
            &["status"],
        )?;

        let rejections_total = CounterVec::new(
            Opts::new("gateway_rejections_total", "Requests rejected by the gateway"),
            &["kind"],
        )?;

        let forwarded_total = Counter::new(
            "gateway_forwarded_total",
            "Requests answered by the destination",
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_duration_seconds",
                "Gateway request latency in seconds",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(responses_total.clone()))?;
        registry.register(Box::new(rejections_total.clone()))?;
        registry.register(Box::new(forwarded_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(Self {
            requests_total,
            responses_total,
            rejections_total,
            forwarded_total,
            request_duration_seconds,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub struct MetricsMiddleware {
    pub collector: MetricsCollector,
}

impl MetricsMiddleware {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }
}

#[async_trait::async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "MetricsMiddleware"
    }

    async fn on_request(&self, context: &RequestContext) -> Result<()> {
        self.collector
            .requests_total
            .with_label_values(&[context.method.as_str()])
            .inc();
        Ok(())
    }

    async fn on_response(&self, context: &RequestContext, status: u16) -> Result<()> {
        debug!("Recording response metrics for {} -> {}", context.method, status);

        self.collector
            .responses_total
            .with_label_values(&[status.to_string().as_str()])
            .inc();

        let outcome = if context.forwarded {
            self.collector.forwarded_total.inc();
            "forwarded"
        } else if context.preflight {
            "preflight"
        } else {
            "rejected"
        };
        self.collector
            .request_duration_seconds
            .with_label_values(&[outcome])
            .observe(context.elapsed().as_secs_f64());

        Ok(())
    }

    async fn on_error(&self, _context: &RequestContext, error: &GatewayError) -> Result<()> {
        self.collector
            .rejections_total
            .with_label_values(&[error.kind()])
            .inc();
        Ok(())
    }
}
