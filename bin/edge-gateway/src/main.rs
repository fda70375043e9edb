use anyhow::{Context, Result};
use gateway_core::{MemoryStore, MetadataStore, RemoteKvStore, Seed};
use gateway_proxy::{
    Gateway, LoggingMiddleware, MetricsCollector, MetricsMiddleware, MiddlewareChain,
    RequestForwarder,
};
use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::tokio::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{Config, LogFormat, StoreConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("invalid gateway configuration")?;
    init_tracing(config.log_format());

    info!("Starting edge-gateway...");

    let store = build_store(&config).await?;
    info!("Metadata store initialized ({})", store.name());

    let forwarder = RequestForwarder::new(config.upstream_timeout(), config.max_redirects())?
        .with_max_body_bytes(config.max_body_bytes());

    let metrics_collector = Arc::new(MetricsCollector::new()?);
    info!("Metrics collector initialized");

    let middleware = MiddlewareChain::new()
        .add(LoggingMiddleware)
        .add(MetricsMiddleware::new((*metrics_collector).clone()));
    info!("Middleware chain initialized with logging and metrics");

    let gateway = Arc::new(
        Gateway::new(store, forwarder)
            .with_client_ip_source(config.client_ip().clone())
            .with_middleware(middleware),
    );

    let admin_listener = TcpListener::bind(config.admin_addr())
        .await
        .with_context(|| format!("failed to bind admin listener on {}", config.admin_addr()))?;
    info!("Admin server listening on {}", config.admin_addr());
    tokio::task::spawn(accept_admin_connections(admin_listener, metrics_collector));

    let listener = TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind gateway listener on {}", config.listen_addr()))?;
    info!("Gateway listening on {}", config.listen_addr());

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Error accepting connection: {}", e);
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let gateway = gateway.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let gateway = gateway.clone();
                async move { Ok::<_, Infallible>(gateway.handle(req, Some(peer_addr)).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving connection from {}: {}", peer_addr, e);
            }
        });
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn build_store(config: &Config) -> Result<Arc<dyn MetadataStore>> {
    match config.store() {
        StoreConfig::Remote { url, token } => {
            let store = RemoteKvStore::new(url, token.clone(), config.upstream_timeout())
                .with_context(|| format!("invalid store URL {}", url))?;
            if token.is_none() {
                warn!("GATEWAY_STORE_TOKEN not set; store requests are unauthenticated");
            }
            Ok(Arc::new(store))
        }
        StoreConfig::Memory { seed_file: Some(path) } => {
            let document = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read seed file {}", path.display()))?;
            let store = MemoryStore::from_seed(Seed::from_document(&document)?);
            info!(
                "Loaded {} tokens from {}",
                store.token_count().await,
                path.display()
            );
            Ok(Arc::new(store))
        }
        StoreConfig::Memory { seed_file: None } => {
            warn!("No GATEWAY_STORE_URL or GATEWAY_SEED_FILE set; every token will be rejected");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn accept_admin_connections(listener: TcpListener, metrics_collector: Arc<MetricsCollector>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let metrics_collector = metrics_collector.clone();
                tokio::task::spawn(async move {
                    let service = service_fn(move |req| {
                        let metrics_collector = metrics_collector.clone();
                        async move { Ok::<_, Infallible>(handle_admin(req, &metrics_collector)) }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!("Error serving admin connection from {}: {}", peer_addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting admin connection: {}", e);
            }
        }
    }
}

fn handle_admin(req: Request<Incoming>, metrics_collector: &MetricsCollector) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => (StatusCode::OK, "text/plain", "OK\n".to_string()),
        (&Method::GET, "/metrics") => match metrics_collector.gather() {
            Ok(text) => (StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "Failed to gather metrics\n".to_string(),
                )
            }
        },
        _ => (StatusCode::NOT_FOUND, "text/plain", "Not Found\n".to_string()),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static(content_type),
    );
    response
}
