use std::sync::Arc;

use axum::Json;
use axum::extract::State;

use crate::catalog;
use crate::models::ModelDescriptor;
use crate::state::AppState;

pub async fn models_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ModelDescriptor>> {
    Json(catalog::list_or_fallback(state.catalog.as_ref()).await)
}
