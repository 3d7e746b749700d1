use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use tracing::warn;

use crate::error::AppError;
use crate::metrics::ERROR_INVALID_REQUEST;
use crate::state::AppState;

/// Raw request body. A body that cannot be read (client too slow, broken
/// connection) is rejected like any other invalid body.
pub struct RawBody(pub Bytes);

impl FromRequest<Arc<AppState>> for RawBody {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        Bytes::from_request(req, state)
            .await
            .map(RawBody)
            .map_err(|rejection| {
                warn!(error = %rejection, "failed to read request body");
                state.metrics.record_error(ERROR_INVALID_REQUEST);
                AppError::InvalidRequest(rejection.body_text())
            })
    }
}
