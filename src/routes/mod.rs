//! Router assembly: HTTP endpoints, static files, CORS, body limit and HTTP tracing.

use std::sync::Arc;

use axum::{
  extract::DefaultBodyLimit,
  routing::{get, post},
  Router,
};
use tower_http::{
  cors::{Any, CorsLayer},
  services::{ServeDir, ServeFile},
  trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - JSON API under `/api/...` plus `/health`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - Request body limit from `MAX_UPLOAD_MB`
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
  let static_service = ServeDir::new("./static")
    .append_index_html_on_directories(true)
    .not_found_service(ServeFile::new("./static/index.html"));
  let body_limit = state.config.max_upload_bytes;

  Router::new()
    .route("/health", get(http::http_health))
    .route("/api/health", get(http::http_health))
    .route("/api/upload", post(http::http_upload))
    .route("/api/docs", post(http::http_upload))
    .route("/api/hurdle/:doc_id", get(http::http_get_hurdle).post(http::http_post_hurdle))
    .route("/api/progress/:doc_id", get(http::http_get_progress))
    .route("/api/roadmap/:doc_id", get(http::http_get_roadmap))
    .with_state(state)
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(
      CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any),
    )
    .layer(
      TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
    .fallback_service(static_service)
}
