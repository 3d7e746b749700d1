use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, warn};

use crate::backend::RelayError;
use crate::error::{AppError, decode_json};
use crate::metrics::{
    ERROR_INVALID_REQUEST, ERROR_UNREACHABLE_BACKEND, ERROR_UPSTREAM_STREAM, TokenDirection,
};
use crate::models::{ChatRequest, CompletionRequest};
use crate::relay::{self, StreamObservation};
use crate::state::AppState;

use super::body::RawBody;

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    RawBody(body): RawBody,
) -> Result<Response, AppError> {
    let req: ChatRequest = decode_json(&body).inspect_err(|err| {
        warn!(error = %err, "rejected chat request");
        state.metrics.record_error(ERROR_INVALID_REQUEST);
    })?;
    if req.messages.is_empty() && req.message.is_empty() {
        state.metrics.record_error(ERROR_INVALID_REQUEST);
        return Err(AppError::InvalidRequest("no messages".to_string()));
    }

    let model = relay::resolve_model(&req, &state.settings.default_model).to_string();
    let llama_cpp = state.is_llama_cpp(&model);
    let markdown = state
        .policies
        .wants_markdown(req.format.as_deref(), &req.message);

    state.metrics.add_tokens(
        TokenDirection::Input,
        &model,
        relay::estimate_input_tokens(&req),
    );

    let completion = CompletionRequest {
        model: model.clone(),
        messages: relay::build_messages(&req, markdown),
        stream: true,
    };
    debug!(%model, markdown, llama_cpp, messages = completion.messages.len(), "relaying chat");

    // the stream deadline also bounds connecting to the backend
    let deadline = Instant::now() + state.settings.stream_timeout;
    let observation = StreamObservation::start(state.metrics.clone(), &model, llama_cpp);

    let upstream = match timeout_at(deadline, state.backend.stream_chat(completion)).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(err)) => {
            error!(error = %err, %model, "failed to open completion stream");
            let kind = match err {
                RelayError::Unreachable(_) => ERROR_UNREACHABLE_BACKEND,
                _ => ERROR_UPSTREAM_STREAM,
            };
            state.metrics.record_error(kind);
            return Err(err.into());
        }
        Err(_) => {
            error!(%model, "timed out opening completion stream");
            state.metrics.record_error(ERROR_UPSTREAM_STREAM);
            return Err(AppError::UpstreamStream("stream deadline reached".to_string()));
        }
    };

    let rx = relay::spawn(upstream, observation, deadline);
    relay::into_response(rx).await
}
