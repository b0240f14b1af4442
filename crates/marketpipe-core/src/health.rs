//! Container health endpoint.
//!
//! A minimal HTTP server answering `GET /health`, run as a background task
//! so orchestration phases never block it. Only started inside containers,
//! where the compose healthcheck polls it.

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;

async fn health() -> &'static str {
    "OK"
}

pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

async fn serve(port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind health endpoint on port {port}"))?;
    tracing::info!(port, "Health endpoint listening");
    axum::serve(listener, router())
        .await
        .context("Health endpoint server failed")
}

/// Start the endpoint in the background. Failures are logged, never fatal to
/// the pipeline.
pub fn spawn(port: u16) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = serve(port).await {
            tracing::error!(error = %e, "Health endpoint stopped");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_answers_ok() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 16).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
