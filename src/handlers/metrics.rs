use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, info};

use crate::error::{AppError, decode_json};
use crate::metrics::{ERROR_INVALID_REQUEST, Metrics};
use crate::models::{ErrorLog, LlamaCppMetrics, MetricLog, MetricsSummary};
use crate::state::AppState;
use crate::summary::summarize;

use super::body::RawBody;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

pub async fn scrape_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.encode() {
        Ok(text) => {
            let mut res = text.into_response();
            res.headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
            res
        }
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

pub async fn summary_handler(State(state): State<Arc<AppState>>) -> Json<MetricsSummary> {
    let model = state.settings.default_model.as_str();
    Json(summarize(
        &state.metrics,
        model,
        state.is_llama_cpp(model),
        state.settings.response_time,
    ))
}

// Body is decoded by hand so clients need not send a JSON content type.
fn decode_report<T: serde::de::DeserializeOwned>(
    metrics: &Metrics,
    body: &[u8],
) -> Result<T, AppError> {
    decode_json(body).inspect_err(|err| {
        debug!(error = %err, "rejected metrics report");
        metrics.record_error(ERROR_INVALID_REQUEST);
    })
}

pub async fn log_handler(
    State(state): State<Arc<AppState>>,
    RawBody(body): RawBody,
) -> Result<StatusCode, AppError> {
    let log: MetricLog = decode_report(&state.metrics, &body)?;
    debug!(
        message_id = %log.message_id,
        tokens_in = log.tokens_in,
        tokens_out = log.tokens_out,
        response_time_ms = log.response_time_ms,
        "client metrics"
    );

    if log.time_to_first_token_ms > 0.0 {
        if let Ok(ttft) = Duration::try_from_secs_f64(log.time_to_first_token_ms / 1000.0) {
            state
                .metrics
                .observe_first_token(&state.settings.default_model, ttft);
        }
    }
    Ok(StatusCode::OK)
}

pub async fn error_handler(
    State(state): State<Arc<AppState>>,
    RawBody(body): RawBody,
) -> Result<StatusCode, AppError> {
    let report: ErrorLog = decode_report(&state.metrics, &body)?;
    info!(
        error_type = %report.error_type,
        status_code = report.status_code,
        input_length = report.input_length,
        timestamp = %report.timestamp,
        "client error reported"
    );

    state.metrics.record_error(&report.error_type);
    Ok(StatusCode::OK)
}

pub async fn llama_cpp_handler(
    State(state): State<Arc<AppState>>,
    RawBody(body): RawBody,
) -> Result<StatusCode, AppError> {
    let snapshot: LlamaCppMetrics = decode_report(&state.metrics, &body)?;
    debug!(
        context_size = snapshot.context_size,
        tokens_per_second = snapshot.tokens_per_second,
        "llama.cpp metrics received"
    );

    state
        .metrics
        .record_llama_cpp(&state.settings.default_model, &snapshot);
    Ok(StatusCode::OK)
}
