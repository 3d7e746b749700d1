use std::time::Duration;

use tracing::warn;

use crate::models::LlamaCppMetrics;
use crate::registry::{MetricKind, MetricRegistry, RegistryError, SeriesHandle};

pub const HTTP_REQUESTS_TOTAL: &str = "aiwatch_http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "aiwatch_http_request_duration_seconds";
pub const CHAT_TOKENS_TOTAL: &str = "aiwatch_chat_tokens_total";
pub const MODEL_LATENCY: &str = "aiwatch_model_latency_seconds";
pub const ACTIVE_REQUESTS: &str = "aiwatch_active_requests";
pub const ERRORS_TOTAL: &str = "aiwatch_errors_total";
pub const FIRST_TOKEN_LATENCY: &str = "aiwatch_first_token_latency_seconds";
pub const LLAMACPP_CONTEXT_SIZE: &str = "aiwatch_llamacpp_context_size";
pub const LLAMACPP_PROMPT_EVAL: &str = "aiwatch_llamacpp_prompt_eval_seconds";
pub const LLAMACPP_TOKENS_PER_SECOND: &str = "aiwatch_llamacpp_tokens_per_second";
pub const LLAMACPP_MEMORY_PER_TOKEN: &str = "aiwatch_llamacpp_memory_per_token_bytes";
pub const LLAMACPP_THREADS_USED: &str = "aiwatch_llamacpp_threads_used";
pub const LLAMACPP_BATCH_SIZE: &str = "aiwatch_llamacpp_batch_size";

// Error types recorded by the server itself; clients report their own.
pub const ERROR_INVALID_REQUEST: &str = "invalid_request";
pub const ERROR_UPSTREAM_STREAM: &str = "upstream_stream";
pub const ERROR_UNREACHABLE_BACKEND: &str = "unreachable_backend";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDirection {
    Input,
    Output,
}

impl TokenDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenDirection::Input => "input",
            TokenDirection::Output => "output",
        }
    }
}

/// All series the gateway publishes, declared once on a shared registry.
pub struct Metrics {
    registry: MetricRegistry,
    pub http_requests: SeriesHandle,
    pub http_duration: SeriesHandle,
    pub chat_tokens: SeriesHandle,
    pub model_latency: SeriesHandle,
    pub active_requests: SeriesHandle,
    pub errors: SeriesHandle,
    pub first_token_latency: SeriesHandle,
    pub llamacpp_context_size: SeriesHandle,
    pub llamacpp_prompt_eval: SeriesHandle,
    pub llamacpp_tokens_per_second: SeriesHandle,
    pub llamacpp_memory_per_token: SeriesHandle,
    pub llamacpp_threads_used: SeriesHandle,
    pub llamacpp_batch_size: SeriesHandle,
}

fn histogram(buckets: &[f64]) -> MetricKind {
    MetricKind::Histogram {
        buckets: buckets.to_vec(),
    }
}

impl Metrics {
    pub fn new() -> Result<Self, RegistryError> {
        let registry = MetricRegistry::new();

        let http_requests = registry.declare(
            HTTP_REQUESTS_TOTAL,
            "Total number of HTTP requests",
            MetricKind::Counter,
            &["method", "endpoint", "status"],
        )?;
        let http_duration = registry.declare(
            HTTP_REQUEST_DURATION,
            "HTTP request duration in seconds",
            histogram(prometheus::DEFAULT_BUCKETS),
            &["method", "endpoint"],
        )?;
        let chat_tokens = registry.declare(
            CHAT_TOKENS_TOTAL,
            "Total number of tokens processed in chat",
            MetricKind::Counter,
            &["direction", "model"],
        )?;
        let model_latency = registry.declare(
            MODEL_LATENCY,
            "Model response time in seconds",
            histogram(&[0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 30.0, 60.0]),
            &["model", "operation"],
        )?;
        let active_requests = registry.declare(
            ACTIVE_REQUESTS,
            "Number of currently active requests",
            MetricKind::Gauge,
            &[],
        )?;
        let errors = registry.declare(
            ERRORS_TOTAL,
            "Total number of errors",
            MetricKind::Counter,
            &["type"],
        )?;
        let first_token_latency = registry.declare(
            FIRST_TOKEN_LATENCY,
            "Time to first token in seconds",
            histogram(&[0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
            &["model"],
        )?;
        let llamacpp_context_size = registry.declare(
            LLAMACPP_CONTEXT_SIZE,
            "Context window size in tokens for llama.cpp models",
            MetricKind::Gauge,
            &["model"],
        )?;
        let llamacpp_prompt_eval = registry.declare(
            LLAMACPP_PROMPT_EVAL,
            "Time spent evaluating the prompt in seconds",
            histogram(&[0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0]),
            &["model"],
        )?;
        let llamacpp_tokens_per_second = registry.declare(
            LLAMACPP_TOKENS_PER_SECOND,
            "Tokens generated per second",
            MetricKind::Gauge,
            &["model"],
        )?;
        let llamacpp_memory_per_token = registry.declare(
            LLAMACPP_MEMORY_PER_TOKEN,
            "Memory usage per token in bytes",
            MetricKind::Gauge,
            &["model"],
        )?;
        let llamacpp_threads_used = registry.declare(
            LLAMACPP_THREADS_USED,
            "Number of threads used for inference",
            MetricKind::Gauge,
            &["model"],
        )?;
        let llamacpp_batch_size = registry.declare(
            LLAMACPP_BATCH_SIZE,
            "Batch size used for inference",
            MetricKind::Gauge,
            &["model"],
        )?;

        Ok(Self {
            registry,
            http_requests,
            http_duration,
            chat_tokens,
            model_latency,
            active_requests,
            errors,
            first_token_latency,
            llamacpp_context_size,
            llamacpp_prompt_eval,
            llamacpp_tokens_per_second,
            llamacpp_memory_per_token,
            llamacpp_threads_used,
            llamacpp_batch_size,
        })
    }

    #[cfg(test)]
    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    pub fn encode(&self) -> Result<String, RegistryError> {
        self.registry.encode()
    }

    pub fn request_started(&self) {
        report(self.active_requests.increment(&[], 1.0));
    }

    pub fn request_finished(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        report(self.active_requests.increment(&[], -1.0));
        report(
            self.http_requests
                .increment(&[method, endpoint, status.as_str()], 1.0),
        );
        report(
            self.http_duration
                .observe(&[method, endpoint], duration.as_secs_f64()),
        );
    }

    pub fn add_tokens(&self, direction: TokenDirection, model: &str, count: u64) {
        report(
            self.chat_tokens
                .increment(&[direction.as_str(), model], count as f64),
        );
    }

    pub fn observe_model_latency(&self, model: &str, operation: &str, elapsed: Duration) {
        report(
            self.model_latency
                .observe(&[model, operation], elapsed.as_secs_f64()),
        );
    }

    pub fn observe_first_token(&self, model: &str, elapsed: Duration) {
        report(
            self.first_token_latency
                .observe(&[model], elapsed.as_secs_f64()),
        );
    }

    pub fn observe_prompt_eval(&self, model: &str, elapsed: Duration) {
        report(
            self.llamacpp_prompt_eval
                .observe(&[model], elapsed.as_secs_f64()),
        );
    }

    pub fn set_tokens_per_second(&self, model: &str, rate: f64) {
        report(self.llamacpp_tokens_per_second.set(&[model], rate));
    }

    pub fn record_error(&self, error_type: &str) {
        report(self.errors.increment(&[error_type], 1.0));
    }

    /// Folds a client-pushed llama.cpp snapshot into the per-model series.
    pub fn record_llama_cpp(&self, model: &str, snapshot: &LlamaCppMetrics) {
        report(
            self.llamacpp_context_size
                .set(&[model], snapshot.context_size as f64),
        );
        report(
            self.llamacpp_prompt_eval
                .observe(&[model], snapshot.prompt_eval_time_ms / 1000.0),
        );
        report(
            self.llamacpp_tokens_per_second
                .set(&[model], snapshot.tokens_per_second),
        );
        report(
            self.llamacpp_memory_per_token
                .set(&[model], snapshot.memory_per_token_bytes),
        );
        report(
            self.llamacpp_threads_used
                .set(&[model], snapshot.threads_used as f64),
        );
        report(
            self.llamacpp_batch_size
                .set(&[model], snapshot.batch_size as f64),
        );
    }
}

// metrics never fail a request
fn report(result: Result<(), RegistryError>) {
    if let Err(err) = result {
        warn!(error = %err, "failed to record metric");
    }
}
