//! HTTP server for the rendered dashboard.
//!
//! The dashboard is rendered once before the listener starts; every
//! request is answered from the same immutable payloads.

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Pre-rendered response bodies.
#[derive(Debug, Clone)]
pub struct DashboardPayload {
    pub html: String,
    pub json: String,
}

/// Build the dashboard routes. Unknown paths get 404, non-GET methods 405.
pub fn build_router(payload: DashboardPayload) -> Router {
    Router::new()
        .route("/", get(dashboard_page))
        .route("/index.html", get(dashboard_page))
        .route("/api/dashboard.json", get(dashboard_json))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(payload))
}

async fn dashboard_page(State(payload): State<Arc<DashboardPayload>>) -> Html<String> {
    Html(payload.html.clone())
}

async fn dashboard_json(State(payload): State<Arc<DashboardPayload>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        payload.json.clone(),
    )
}

async fn health_check() -> &'static str {
    "ok"
}

/// Serve the dashboard until Ctrl-C.
pub async fn serve(host: &str, port: u16, payload: DashboardPayload) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Serving dashboard on http://{}", addr);
    println!("🌐 Dashboard available at http://{}", addr);
    println!("   Press Ctrl-C to stop.");

    axum::serve(listener, build_router(payload))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Dashboard server failed")?;

    info!("Dashboard server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, shutting down"),
        Err(e) => {
            // without a handler the server runs until killed
            warn!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
