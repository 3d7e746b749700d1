mod body;
mod chat;
mod health;
mod metrics;
mod models;


use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, header};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::timeout::RequestBodyTimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Level, Span, info_span};

use chat::chat_handler;
use health::health_handler;
use metrics::{error_handler, llama_cpp_handler, log_handler, scrape_handler, summary_handler};
use models::models_handler;

use crate::error::AppError;
use crate::middleware::{answer_options, track_requests};
use crate::state::AppState;

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

/// Main API router.
///
/// Everything except the scrape and summary reads goes through request
/// accounting, so polling the dashboard does not show up as traffic.
pub fn app_router(state: Arc<AppState>, tracing_enabled: bool) -> Router {
    let tracked = Router::new()
        .route("/chat", post(chat_handler))
        .route("/metrics/log", post(log_handler))
        .route("/metrics/error", post(error_handler))
        .route("/metrics/llamacpp", post(llama_cpp_handler))
        .route("/health", get(health_handler))
        .route("/models", get(models_handler))
        .method_not_allowed_fallback(method_not_allowed)
        .layer(RequestBodyTimeoutLayer::new(state.settings.read_timeout))
        .layer(from_fn_with_state(state.clone(), track_requests));

    let untracked = Router::new()
        .route("/metrics", get(scrape_handler))
        .route("/metrics/summary", get(summary_handler))
        .method_not_allowed_fallback(method_not_allowed);

    let mut router = tracked.merge(untracked).layer(from_fn(answer_options));
    if tracing_enabled {
        router = router.layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );
    }
    router.layer(CorsLayer::permissive()).with_state(state)
}

/// Scrape-only router for the dedicated metrics listener.
pub fn metrics_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(scrape_handler))
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state)
}

fn request_span(req: &Request<Body>) -> Span {
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    info_span!(
        "http_request",
        method = %req.method(),
        uri = %req.uri(),
        user_agent,
    )
}
