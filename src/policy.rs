//! Content heuristics used by the relay.
//!
//! They are plain substring checks and carry no protocol guarantee, so each
//! one sits behind [`TextClassifier`] and can be swapped for an exact
//! fixture in tests.

use std::sync::Arc;

pub trait TextClassifier: Send + Sync {
    fn classify(&self, text: &str) -> bool;
}

/// Matches when `text` contains any needle, ignoring ASCII case.
#[derive(Debug, Clone)]
pub struct ContainsAny {
    needles: Vec<String>,
}

impl ContainsAny {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            needles: needles
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl TextClassifier for ContainsAny {
    fn classify(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.needles.iter().any(|n| text.contains(n.as_str()))
    }
}

pub const MARKDOWN_FORMAT: &str = "markdown";

pub const MARKDOWN_INSTRUCTION: &str = "Please format your response using markdown. Use proper headings, bullet points, numbered lists, code blocks with syntax highlighting, and tables where appropriate.";

#[derive(Clone)]
pub struct Policies {
    /// Free-text message asks for markdown output.
    pub markdown: Arc<dyn TextClassifier>,
    /// Model name looks like a llama family model.
    pub llama_model: Arc<dyn TextClassifier>,
    /// Backend base URL points at a llama.cpp engine.
    pub llama_endpoint: Arc<dyn TextClassifier>,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            markdown: Arc::new(ContainsAny::new(["in markdown", "using markdown"])),
            llama_model: Arc::new(ContainsAny::new(["llama"])),
            llama_endpoint: Arc::new(ContainsAny::new(["llama.cpp"])),
        }
    }
}

impl Policies {
    pub fn wants_markdown(&self, format: Option<&str>, message: &str) -> bool {
        format == Some(MARKDOWN_FORMAT) || self.markdown.classify(message)
    }

    pub fn is_llama_cpp(&self, model: &str, base_url: &str) -> bool {
        self.llama_model.classify(model) || self.llama_endpoint.classify(base_url)
    }
}
