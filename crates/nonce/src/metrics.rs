//! Prometheus text exposition over HTTP.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Router serving `GET /metrics` from `registry`.
pub fn metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(registry)
}

/// Serve `registry` on `listener` until the task is dropped.
pub async fn serve_metrics(listener: TcpListener, registry: Registry) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "Metrics endpoint listening");
    }
    axum::serve(listener, metrics_router(registry)).await
}

async fn render_metrics(State(registry): State<Registry>) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{NonceMetrics, NonceService};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn registry_with_nonce() -> Registry {
        let registry = Registry::new();
        let metrics = NonceMetrics::new(&registry).unwrap();
        let ns = NonceService::new(Some("zinc".into()), 0, metrics).unwrap();
        let nonce = ns.nonce().unwrap();
        assert!(ns.valid(&nonce));
        registry
    }

    #[tokio::test]
    async fn test_render_metrics() {
        let response = render_metrics(State(registry_with_nonce())).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("nonce_creates 1"));
        assert!(text.contains("nonce_redeems{error=\"\",result=\"valid\"} 1"));
        assert!(text.contains("nonce_heap_latency_count 0"));
    }

    #[tokio::test]
    async fn test_serve_metrics_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_metrics(listener, registry_with_nonce()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("nonce_creates 1"));
        server.abort();
    }
}
