//! Minimal HTTP server exposing `/metrics` and an index page, the
//! idiomatic-axum equivalent of the original's bare `net/http` server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::Html, routing::get, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use storm_control_core::{Error, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

const INDEX_PAGE: &str = r#"<html>
<head><title>eBPF Storm Control Exporter</title></head>
<body>
<h1>eBPF Storm Control Exporter</h1>
<p><a href='/metrics'>Metrics</a></p>
</body>
</html>"#;

struct ExporterState {
    registry: Registry,
}

/// Serves `/metrics` (Prometheus text exposition format) and `/` (a
/// one-line index page) on `addr` until `cancel` fires.
#[instrument(skip(registry, cancel))]
pub async fn serve(addr: SocketAddr, registry: Registry, cancel: CancellationToken) -> Result<()> {
    let state = Arc::new(ExporterState { registry });
    let app = Router::new().route("/", get(index)).route("/metrics", get(metrics)).with_state(state);

    let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
    info!(%addr, "starting exporter API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(Error::Io)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn metrics(State(state): State<Arc<ExporterState>>) -> Result<String, StatusCode> {
    let families = state.registry.gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&families, &mut buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
