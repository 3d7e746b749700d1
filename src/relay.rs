//! Streaming chat relay.
//!
//! A producer task reads content deltas from the inference backend and hands
//! them to the HTTP response body through a single-slot channel. The
//! per-request [`StreamObservation`] lives inside the producer and publishes
//! its terminal metrics when dropped, so they are recorded exactly once on
//! every exit path: end of stream, upstream error, client disconnect or
//! stream deadline.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::backend::{DeltaStream, RelayError};
use crate::error::AppError;
use crate::metrics::{ERROR_UPSTREAM_STREAM, Metrics, TokenDirection};
use crate::models::{ChatRequest, Message};
use crate::policy::MARKDOWN_INSTRUCTION;

pub const INFERENCE_OPERATION: &str = "inference";

/// Rough input size: a quarter of the byte length of every message. Not a
/// tokenizer and not meant to be exact.
pub fn estimate_input_tokens(req: &ChatRequest) -> u64 {
    let history: usize = req.messages.iter().map(|m| m.content.len() / 4).sum();
    (history + req.message.len() / 4) as u64
}

pub fn resolve_model<'a>(req: &'a ChatRequest, default_model: &'a str) -> &'a str {
    match req.model.as_deref() {
        Some(model) if !model.is_empty() => model,
        _ => default_model,
    }
}

/// Outbound conversation: optional markdown instruction, the history, then
/// the current message.
pub fn build_messages(req: &ChatRequest, markdown: bool) -> Vec<Message> {
    let mut messages = Vec::with_capacity(req.messages.len() + 2);
    if markdown {
        messages.push(Message::system(MARKDOWN_INSTRUCTION));
    }
    messages.extend(req.messages.iter().cloned());
    if !req.message.is_empty() {
        messages.push(Message::user(req.message.as_str()));
    }
    messages
}

/// Per-request timing and token bookkeeping for one relayed stream.
pub struct StreamObservation {
    metrics: Arc<Metrics>,
    model: String,
    llama_cpp: bool,
    started: Instant,
    first_token: Option<Instant>,
    output_tokens: u64,
}

impl StreamObservation {
    pub fn start(metrics: Arc<Metrics>, model: &str, llama_cpp: bool) -> Self {
        Self {
            metrics,
            model: model.to_string(),
            llama_cpp,
            started: Instant::now(),
            first_token: None,
            output_tokens: 0,
        }
    }

    /// Accounts one forwarded, non-empty delta that arrived at `received`.
    pub fn observe_delta(&mut self, received: Instant) {
        if self.first_token.is_none() {
            self.first_token = Some(received);
            let ttft = received.saturating_duration_since(self.started);
            info!(model = %self.model, seconds = ttft.as_secs_f64(), "time to first token");
            self.metrics.observe_first_token(&self.model, ttft);
            if self.llama_cpp {
                self.metrics.observe_prompt_eval(&self.model, ttft);
            }
        }
        // one per delta event, not per real token
        self.output_tokens += 1;
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn time_to_first_token(&self) -> Option<Duration> {
        self.first_token
            .map(|first| first.saturating_duration_since(self.started))
    }
}

impl Drop for StreamObservation {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.metrics
            .add_tokens(TokenDirection::Output, &self.model, self.output_tokens);
        self.metrics
            .observe_model_latency(&self.model, INFERENCE_OPERATION, elapsed);

        if self.llama_cpp && self.output_tokens > 0 {
            if let Some(first) = self.first_token {
                let since_first = first.elapsed().as_secs_f64();
                if since_first > 0.0 {
                    self.metrics.set_tokens_per_second(
                        &self.model,
                        self.output_tokens as f64 / since_first,
                    );
                }
            }
        }

        debug!(
            model = %self.model,
            output_tokens = self.output_tokens,
            ttft = ?self.time_to_first_token(),
            elapsed = elapsed.as_secs_f64(),
            "stream finished"
        );
    }
}

pub type Relayed = Result<Bytes, RelayError>;

/// Starts the producer for `upstream`. Dropping the receiver stops it.
pub fn spawn(
    upstream: DeltaStream,
    observation: StreamObservation,
    deadline: Instant,
) -> mpsc::Receiver<Relayed> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(pump(upstream, tx, observation, deadline));
    rx
}

async fn pump(
    mut upstream: DeltaStream,
    tx: mpsc::Sender<Relayed>,
    mut observation: StreamObservation,
    deadline: Instant,
) {
    loop {
        let next = tokio::select! {
            next = timeout_at(deadline, upstream.next()) => next,
            _ = tx.closed() => {
                debug!("client disconnected, stopping relay");
                break;
            }
        };

        match next {
            Err(_) => {
                warn!(
                    output_tokens = observation.output_tokens(),
                    "stream deadline reached, closing response"
                );
                if observation.output_tokens() == 0 {
                    observation.metrics.record_error(ERROR_UPSTREAM_STREAM);
                    let _ = tx
                        .send(Err(RelayError::Interrupted(
                            "stream deadline reached".to_string(),
                        )))
                        .await;
                }
                break;
            }
            Ok(None) => break,
            Ok(Some(Ok(delta))) => {
                if delta.is_empty() {
                    continue;
                }
                let received = Instant::now();
                if tx.send(Ok(Bytes::from(delta))).await.is_err() {
                    debug!("client disconnected, stopping relay");
                    break;
                }
                observation.observe_delta(received);
            }
            Ok(Some(Err(err))) => {
                error!(error = %err, output_tokens = observation.output_tokens(), "error in stream");
                observation.metrics.record_error(ERROR_UPSTREAM_STREAM);
                // once bytes went out the response can only be cut short
                if observation.output_tokens() == 0 {
                    let _ = tx.send(Err(err)).await;
                }
                break;
            }
        }
    }

    // terminal metrics land before the body sees end of stream
    drop(observation);
    drop(tx);
}

/// Waits for the first relayed item and commits the response status.
pub async fn into_response(mut rx: mpsc::Receiver<Relayed>) -> Result<Response, AppError> {
    let first = match rx.recv().await {
        Some(Ok(bytes)) => Some(bytes),
        Some(Err(err)) => return Err(err.into()),
        None => None,
    };

    let rest = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Some(Ok(bytes)) => Some((Ok::<_, Infallible>(bytes), rx)),
            _ => None,
        }
    });
    let body = match first {
        Some(bytes) => Body::from_stream(stream::once(async move { Ok(bytes) }).chain(rest)),
        None => Body::empty(),
    };

    let mut res = body.into_response();
    let headers = res.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::registry::{Sample, read};

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            messages: vec![
                Message::user("12345678"),
                Message {
                    role: Role::Assistant,
                    content: "abcd".to_string(),
                },
            ],
            message: message.to_string(),
            ..ChatRequest::default()
        }
    }

    fn deltas(items: Vec<Result<&'static str, &'static str>>) -> DeltaStream {
        stream::iter(items.into_iter().map(|item| {
            item.map(str::to_string)
                .map_err(|e| RelayError::Interrupted(e.to_string()))
        }))
        .boxed()
    }

    async fn drain(rx: mpsc::Receiver<Relayed>) -> Vec<Relayed> {
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
            .collect()
            .await
    }

    #[test]
    fn test_input_token_estimate_uses_integer_division() {
        // 8/4 + 4/4 + 7/4
        assert_eq!(estimate_input_tokens(&request("1234567")), 4);
        assert_eq!(estimate_input_tokens(&ChatRequest::default()), 0);
    }

    #[test]
    fn test_model_override_is_per_request() {
        let mut req = request("hi");
        assert_eq!(resolve_model(&req, "ai/default"), "ai/default");
        req.model = Some(String::new());
        assert_eq!(resolve_model(&req, "ai/default"), "ai/default");
        req.model = Some("ai/qwen3".to_string());
        assert_eq!(resolve_model(&req, "ai/default"), "ai/qwen3");
    }

    #[test]
    fn test_build_messages_order() {
        let messages = build_messages(&request("now"), true);
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(messages[0].content, MARKDOWN_INSTRUCTION);
        assert_eq!(messages[3].content, "now");

        let plain = build_messages(&request(""), false);
        assert_eq!(plain.len(), 2);
    }

    #[tokio::test]
    async fn test_relay_forwards_in_order_and_accounts_once() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let observation = StreamObservation::start(metrics.clone(), "m", false);
        let rx = spawn(
            deltas(vec![Ok("a"), Ok(""), Ok("b"), Ok("c")]),
            observation,
            Instant::now() + Duration::from_secs(5),
        );

        let items: Vec<Bytes> = drain(rx).await.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(items, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
        assert_eq!(
            read::counter_value(&metrics.chat_tokens, &["output", "m"]),
            3.0
        );
        assert!(matches!(
            metrics.first_token_latency.samples()[..],
            [Sample::Histogram { count: 1, .. }]
        ));
        assert_eq!(
            read::counter_value(&metrics.errors, &[ERROR_UPSTREAM_STREAM]),
            0.0
        );
    }

    #[tokio::test]
    async fn test_empty_stream_records_no_first_token() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let observation = StreamObservation::start(metrics.clone(), "m", true);
        let rx = spawn(
            deltas(vec![Ok(""), Ok("")]),
            observation,
            Instant::now() + Duration::from_secs(5),
        );

        assert!(drain(rx).await.is_empty());
        assert_eq!(
            read::counter_value(&metrics.chat_tokens, &["output", "m"]),
            0.0
        );
        assert!(metrics.first_token_latency.samples().is_empty());
        assert!(metrics.llamacpp_prompt_eval.samples().is_empty());
        assert!(metrics.llamacpp_tokens_per_second.samples().is_empty());
        // the stream still finished, so latency was recorded once
        assert_eq!(metrics.model_latency.samples().len(), 1);
    }

    #[tokio::test]
    async fn test_error_before_output_is_forwarded() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let observation = StreamObservation::start(metrics.clone(), "m", false);
        let rx = spawn(
            deltas(vec![Err("boom"), Ok("never")]),
            observation,
            Instant::now() + Duration::from_secs(5),
        );

        let items = drain(rx).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(RelayError::Interrupted(_))));
        assert_eq!(
            read::counter_value(&metrics.errors, &[ERROR_UPSTREAM_STREAM]),
            1.0
        );
    }

    #[tokio::test]
    async fn test_error_after_output_truncates_without_error_item() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let observation = StreamObservation::start(metrics.clone(), "m", false);
        let rx = spawn(
            deltas(vec![Ok("partial"), Err("reset"), Ok("never")]),
            observation,
            Instant::now() + Duration::from_secs(5),
        );

        let items: Vec<Bytes> = drain(rx).await.into_iter().map(|i| i.unwrap()).collect();
        assert_eq!(items, vec![Bytes::from("partial")]);
        assert_eq!(
            read::counter_value(&metrics.chat_tokens, &["output", "m"]),
            1.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_per_second_counts_from_first_token() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let observation = StreamObservation::start(metrics.clone(), "ai/llama3.2", true);
        // ten chunks, 200ms apart, first one after 200ms
        let upstream = stream::iter(0..10)
            .then(|i| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, RelayError>(format!("t{i}"))
            })
            .boxed();
        let rx = spawn(upstream, observation, Instant::now() + Duration::from_secs(90));

        assert_eq!(drain(rx).await.len(), 10);

        let model = ["ai/llama3.2"];
        let tps = read::gauge_value(&metrics.llamacpp_tokens_per_second, &model);
        assert!((tps - 10.0 / 1.8).abs() < 1e-6, "tokens/sec was {tps}");
        let prompt_eval = read::histogram_mean(&metrics.llamacpp_prompt_eval, &model);
        assert!((prompt_eval - 0.2).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_a_stalled_stream() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let observation = StreamObservation::start(metrics.clone(), "m", false);
        let upstream = stream::once(async { Ok::<_, RelayError>("first".to_string()) })
            .chain(stream::pending())
            .boxed();
        let rx = spawn(upstream, observation, Instant::now() + Duration::from_secs(3));

        let items = drain(rx).await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_ok());
        assert_eq!(
            read::counter_value(&metrics.chat_tokens, &["output", "m"]),
            1.0
        );
        assert_eq!(
            read::counter_value(&metrics.errors, &[ERROR_UPSTREAM_STREAM]),
            0.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_before_first_delta_is_an_error() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let observation = StreamObservation::start(metrics.clone(), "m", false);
        let upstream = stream::pending::<Result<String, RelayError>>().boxed();
        let rx = spawn(upstream, observation, Instant::now() + Duration::from_secs(1));

        let items = drain(rx).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(RelayError::Interrupted(_))));
        assert_eq!(
            read::counter_value(&metrics.errors, &[ERROR_UPSTREAM_STREAM]),
            1.0
        );
        assert_eq!(metrics.model_latency.samples().len(), 1);
    }

    #[tokio::test]
    async fn test_client_disconnect_still_finalizes() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let observation = StreamObservation::start(metrics.clone(), "m", false);
        let upstream = stream::once(async { Ok::<_, RelayError>("first".to_string()) })
            .chain(stream::pending())
            .boxed();
        let mut rx = spawn(upstream, observation, Instant::now() + Duration::from_secs(60));

        assert_eq!(rx.recv().await.unwrap().unwrap(), Bytes::from("first"));
        drop(rx);

        // the producer notices the closed channel and publishes its metrics
        for _ in 0..100 {
            if !metrics.model_latency.samples().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(metrics.model_latency.samples().len(), 1);
        assert_eq!(
            read::counter_value(&metrics.chat_tokens, &["output", "m"]),
            1.0
        );
    }

    #[tokio::test]
    async fn test_response_is_500_when_nothing_was_sent() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(Err(RelayError::Interrupted("boom".into()))).await.unwrap();
        drop(tx);

        let err = into_response(rx).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_response_sets_event_stream_headers() {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        let res = into_response(rx).await.unwrap();
        assert_eq!(res.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(res.headers()[header::CACHE_CONTROL], "no-cache");
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}
