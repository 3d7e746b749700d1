use std::sync::Arc;

use axum::body::{Body, HttpBody};
use axum::extract::{MatchedPath, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use futures::stream;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::state::AppState;

pub const UNMATCHED_ENDPOINT: &str = "unmatched";

/// RAII request accounting.
///
/// Created when a request enters the router and dropped once its response
/// body has been fully sent or abandoned. The active gauge goes up on
/// creation; on drop it goes back down and the request counter and duration
/// histogram are recorded with the last known status (500 until a response
/// was produced).
pub struct RequestGuard {
    metrics: Arc<Metrics>,
    method: Method,
    endpoint: String,
    status: StatusCode,
    timer: Instant,
}

impl RequestGuard {
    pub fn new(metrics: Arc<Metrics>, method: Method, endpoint: String) -> Self {
        metrics.request_started();
        Self {
            metrics,
            method,
            endpoint,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            timer: Instant::now(),
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let duration = self.timer.elapsed();
        self.metrics.request_finished(
            self.method.as_str(),
            &self.endpoint,
            self.status.as_u16(),
            duration,
        );

        if self.status.is_server_error() {
            warn!(
                method = %self.method,
                path = %self.endpoint,
                status = self.status.as_u16(),
                duration = duration.as_secs_f64(),
                "request failed"
            );
        } else {
            debug!(
                method = %self.method,
                path = %self.endpoint,
                status = self.status.as_u16(),
                duration = duration.as_secs_f64(),
                "request completed"
            );
        }
    }
}

pub async fn track_requests(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());
    let mut guard = RequestGuard::new(state.metrics.clone(), req.method().clone(), endpoint);

    let res = next.run(req).await;
    guard.set_status(res.status());

    // in-memory bodies are complete already; keep their length
    if res.body().size_hint().exact().is_some() {
        return res;
    }

    // a streamed body carries the guard and drops it when it ends
    let (parts, body) = res.into_parts();
    let body = stream::unfold((body.into_data_stream(), guard), |(mut data, guard)| async move {
        data.next().await.map(|chunk| (chunk, (data, guard)))
    });
    Response::from_parts(parts, Body::from_stream(body))
}

/// Bare 200 for any `OPTIONS` request that is not a CORS preflight.
pub async fn answer_options(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::read;
    use std::time::Duration;

    #[test]
    fn test_guard_defaults_to_server_error() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let guard = RequestGuard::new(metrics.clone(), Method::POST, "/chat".to_string());
        assert_eq!(read::gauge_value(&metrics.active_requests, &[]), 1.0);
        drop(guard);

        assert_eq!(read::gauge_value(&metrics.active_requests, &[]), 0.0);
        assert_eq!(
            read::counter_value(&metrics.http_requests, &["POST", "/chat", "500"]),
            1.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_records_status_and_duration() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let mut guard = RequestGuard::new(metrics.clone(), Method::GET, "/health".to_string());
        tokio::time::sleep(Duration::from_millis(300)).await;
        guard.set_status(StatusCode::OK);
        drop(guard);

        assert_eq!(
            read::counter_value(&metrics.http_requests, &["GET", "/health", "200"]),
            1.0
        );
        let mean = read::histogram_mean(&metrics.http_duration, &["GET", "/health"]);
        assert!((mean - 0.3).abs() < 1e-6, "duration was {mean}");
    }
}
