use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

// Chat request as sent by the UI
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

// OpenAI-compatible streaming completion request sent upstream
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
}

// One `data:` payload of the upstream event stream
#[derive(Deserialize, Debug, Default)]
pub struct CompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

// Client-measured timings for one message
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct MetricLog {
    pub message_id: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub response_time_ms: f64,
    pub time_to_first_token_ms: f64,
}

// Client-side error report
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ErrorLog {
    pub error_type: String,
    pub status_code: i64,
    pub input_length: i64,
    pub timestamp: String,
}

/// llama.cpp engine snapshot, used both as ingestion body and inside the summary.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct LlamaCppMetrics {
    pub context_size: i64,
    pub prompt_eval_time_ms: f64,
    pub tokens_per_second: f64,
    pub memory_per_token_bytes: f64,
    pub threads_used: i64,
    pub batch_size: i64,
    pub model_type: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub total_requests: f64,
    pub average_response_time: f64,
    pub tokens_generated: f64,
    pub tokens_processed: f64,
    pub active_users: f64,
    pub error_rate: f64,
    pub llama_cpp_metrics: Option<LlamaCppMetrics>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub name: String,
    pub parameters: String,
    pub quantization: String,
    pub architecture: String,
    pub model_id: String,
    pub created: String,
    pub size: String,
}
