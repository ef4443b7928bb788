use axum::{
    routing::get,
    extract::Request,
    response::IntoResponse,
    Json,
    Router,
    ServiceExt
};

use serde_json::json;

use std::sync::Arc;
use tracing::info;

use tower_http::trace::TraceLayer;
use tower_http::normalize_path::NormalizePathLayer;
use tower::Layer;

use crate::config::REFRESH_PATH;
use crate::handlers::config_refresh;

pub use crate::AppState;

pub struct Server {
    state: Arc<AppState>,
    addr: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(REFRESH_PATH, get(config_refresh))
        .route("/health", get(health))
        .route("/version", get(version))
        .layer(TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let path = request.uri().path().to_owned();
                let method = request.method().clone();
                tracing::info_span!("http-request", %path, %method)
            })
            .on_request(|_request: &Request<_>, _span: &tracing::Span| {
                tracing::event!(tracing::Level::INFO, "request received");
            })
            .on_response(|response: &axum::response::Response, latency: std::time::Duration, _span: &tracing::Span| {
                let status = response.status().as_u16();
                tracing::event!(tracing::Level::INFO, status = status, latency = ?latency, "sent response");
            })
            .on_failure(|error, _latency, _span: &tracing::Span| {
                tracing::error!("request failed: {}", error);
            })
        )
        .with_state(state)
}

impl Server {

    pub fn new(state: Arc<AppState>, addr: impl Into<String>) -> Self {
        Self {
            state,
            addr: addr.into(),
        }
    }

    pub async fn run(&self) -> Result<(), anyhow::Error> {
        let app = NormalizePathLayer::trim_trailing_slash()
            .layer(router(self.state.clone()));

        let listener = tokio::net::TcpListener::bind(&self.addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to address {}: {}", self.addr, e))?;

        info!("Listening on {}", self.addr);
        axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;

        Ok(())
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "healthy": true,
    }))
}

pub async fn version() -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let hash = env!("GIT_COMMIT_HASH");

    Json(json!({
        "version": version,
        "commit": hash,
    }))
}
