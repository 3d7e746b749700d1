use crate::metrics::Metrics;
use crate::models::{LlamaCppMetrics, MetricsSummary};
use crate::registry::read;

/// Value reported as `averageResponseTime` while it is not measured.
pub const PLACEHOLDER_RESPONSE_TIME: f64 = 0.5;

pub const LLAMA_CPP_MODEL_TYPE: &str = "llama.cpp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseTimeMode {
    /// Report the fixed placeholder. Known limitation kept for dashboard
    /// compatibility.
    #[default]
    Placeholder,
    /// Mean of every observed request duration, in seconds.
    Measured,
}

/// Point-in-time snapshot for the UI; recomputed on every call.
pub fn summarize(
    metrics: &Metrics,
    default_model: &str,
    llama_cpp: bool,
    mode: ResponseTimeMode,
) -> MetricsSummary {
    let total_requests = read::counter_sum(&metrics.http_requests);
    let total_errors = read::counter_sum(&metrics.errors);

    MetricsSummary {
        total_requests,
        average_response_time: match mode {
            ResponseTimeMode::Placeholder => PLACEHOLDER_RESPONSE_TIME,
            ResponseTimeMode::Measured => read::histogram_mean_all(&metrics.http_duration),
        },
        tokens_generated: read::counter_value(&metrics.chat_tokens, &["output", default_model]),
        tokens_processed: read::counter_value(&metrics.chat_tokens, &["input", default_model]),
        active_users: read::gauge_value(&metrics.active_requests, &[]),
        error_rate: if total_requests == 0.0 {
            0.0
        } else {
            total_errors / total_requests
        },
        llama_cpp_metrics: if llama_cpp {
            llama_cpp_snapshot(metrics, default_model)
        } else {
            None
        },
    }
}

// None until a context size was reported for `model`
pub fn llama_cpp_snapshot(metrics: &Metrics, model: &str) -> Option<LlamaCppMetrics> {
    let labels = [model];
    let context_size = read::gauge_value(&metrics.llamacpp_context_size, &labels) as i64;
    if context_size == 0 {
        return None;
    }

    Some(LlamaCppMetrics {
        context_size,
        prompt_eval_time_ms: read::histogram_mean(&metrics.llamacpp_prompt_eval, &labels) * 1000.0,
        tokens_per_second: read::gauge_value(&metrics.llamacpp_tokens_per_second, &labels),
        memory_per_token_bytes: read::gauge_value(&metrics.llamacpp_memory_per_token, &labels),
        threads_used: read::gauge_value(&metrics.llamacpp_threads_used, &labels) as i64,
        batch_size: read::gauge_value(&metrics.llamacpp_batch_size, &labels) as i64,
        model_type: LLAMA_CPP_MODEL_TYPE.to_string(),
    })
}
