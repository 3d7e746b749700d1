use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::registry::read;
use crate::state::AppState;
use crate::summary::LLAMA_CPP_MODEL_TYPE;

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let model = state.settings.default_model.as_str();

    let mut model_info = json!({ "model": model });
    if state.is_llama_cpp(model) {
        let ingested = read::gauge_value(&state.metrics.llamacpp_context_size, &[model]) as i64;
        let context_window = if ingested > 0 {
            ingested
        } else {
            default_context_window(model)
        };
        model_info["modelType"] = json!(LLAMA_CPP_MODEL_TYPE);
        model_info["contextWindow"] = json!(context_window);
    }

    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "model_info": model_info,
    }))
}

// guess from the size tag in the model name until a real value is ingested
fn default_context_window(model: &str) -> i64 {
    if model.contains("1B") {
        2048
    } else if model.contains("70B") {
        8192
    } else {
        4096
    }
}
