use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::future;
use futures::stream::{BoxStream, StreamExt};
use thiserror::Error;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::models::{CompletionChunk, CompletionRequest};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("inference backend unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("inference backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream stream interrupted: {0}")]
    Interrupted(String),

    #[error("malformed completion chunk: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Content deltas in upstream order. Empty strings are deltas without text
/// (role-only or keep-alive chunks).
pub type DeltaStream = BoxStream<'static, Result<String, RelayError>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Opens one streaming completion. Never retried.
    async fn stream_chat(&self, request: CompletionRequest) -> Result<DeltaStream, RelayError>;
}

// OpenAI-compatible engine (Docker Model Runner, llama.cpp server, ...)
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: (!api_key.is_empty()).then(|| api_key.to_string()),
        }
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn stream_chat(&self, request: CompletionRequest) -> Result<DeltaStream, RelayError> {
        let url = self.completions_url();
        debug!(%url, model = %request.model, "opening completion stream");

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let res = builder.send().await.map_err(RelayError::Unreachable)?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(RelayError::Status { status, body });
        }

        Ok(deltas(res.bytes_stream().boxed()))
    }
}

// Turns the raw event-stream body into content deltas, stopping at `[DONE]`
// or after the first error.
fn deltas(body: BoxStream<'static, reqwest::Result<Bytes>>) -> DeltaStream {
    let reader = StreamReader::new(body.map(|chunk| chunk.map_err(io::Error::other)));
    FramedRead::new(reader, SseCodec::default())
        .scan(false, |stopped, event| {
            let item = match event {
                _ if *stopped => None,
                Ok(SseEvent::Done) => None,
                Ok(SseEvent::Data(data)) => Some(parse_delta(&data)),
                Err(err) => Some(Err(RelayError::Interrupted(err.to_string()))),
            };
            *stopped = matches!(item, Some(Err(_)));
            future::ready(item)
        })
        .boxed()
}

fn parse_delta(data: &str) -> Result<String, RelayError> {
    let chunk: CompletionChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(RelayError::Interrupted(error.to_string()));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// `text/event-stream` decoder. Only `data` fields matter here; multi-line
/// data is joined with `\n` and dispatched on a blank line.
#[derive(Debug, Default)]
pub struct SseCodec {
    lines: LinesCodec,
    data: Vec<String>,
}

impl SseCodec {
    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // comments, event names, ids and retry hints are ignored
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        if data.trim() == "[DONE]" {
            Some(SseEvent::Done)
        } else {
            Some(SseEvent::Data(data))
        }
    }
}

impl Decoder for SseCodec {
    type Item = SseEvent;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<SseEvent>, LinesCodecError> {
        while let Some(line) = self.lines.decode(src)? {
            if let Some(event) = self.feed_line(&line) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    // flushes a trailing event that was not followed by a blank line
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<SseEvent>, LinesCodecError> {
        while let Some(line) = self.lines.decode_eof(src)? {
            if let Some(event) = self.feed_line(&line) {
                return Ok(Some(event));
            }
        }
        Ok(self.dispatch())
    }
}
