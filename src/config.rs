use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::summary::ResponseTimeMode;

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "aiwatch")]
#[command(about = "Streaming chat relay with Prometheus metrics for local inference engines")]
pub struct Args {
    // Port of the main HTTP server
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    // Port of the dedicated scrape listener
    #[arg(long, env = "METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    // OpenAI-compatible engine root
    #[arg(
        long,
        env = "BASE_URL",
        default_value = "http://localhost:12434/engines/llama.cpp/v1"
    )]
    pub base_url: String,

    // Default model when a request names none
    #[arg(short, long, env = "MODEL", default_value = "ai/llama3.2:1B-Q8_0")]
    pub model: String,

    #[arg(long, env = "API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    // Human readable logs instead of JSON lines
    #[arg(long, env = "LOG_PRETTY", default_value_t = true, action = ArgAction::Set)]
    pub log_pretty: bool,

    // Per-request spans
    #[arg(long, env = "TRACING_ENABLED", default_value_t = false, action = ArgAction::Set)]
    pub tracing_enabled: bool,

    #[arg(long, env = "OTLP_ENDPOINT", default_value = "jaeger:4318")]
    pub otlp_endpoint: String,

    // Request body read timeout in seconds
    #[arg(long = "read-timeout", env = "READ_TIMEOUT_SECS", default_value_t = 30)]
    pub read_timeout_secs: u64,

    // Upper bound on one streamed response in seconds
    #[arg(long = "write-timeout", env = "WRITE_TIMEOUT_SECS", default_value_t = 90)]
    pub write_timeout_secs: u64,

    // Report the measured mean request duration in the summary
    #[arg(
        long,
        env = "MEASURED_RESPONSE_TIME",
        default_value_t = false,
        action = ArgAction::Set
    )]
    pub measured_response_time: bool,
}

/// Runtime knobs the handlers need, derived once from [`Args`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub default_model: String,
    pub base_url: String,
    pub read_timeout: Duration,
    pub stream_timeout: Duration,
    pub response_time: ResponseTimeMode,
}

impl From<&Args> for Settings {
    fn from(args: &Args) -> Self {
        Self {
            default_model: args.model.clone(),
            base_url: args.base_url.clone(),
            read_timeout: Duration::from_secs(args.read_timeout_secs),
            stream_timeout: Duration::from_secs(args.write_timeout_secs),
            response_time: if args.measured_response_time {
                ResponseTimeMode::Measured
            } else {
                ResponseTimeMode::Placeholder
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_model: "ai/llama3.2:1B-Q8_0".to_string(),
            base_url: "http://localhost:12434/engines/llama.cpp/v1".to_string(),
            read_timeout: Duration::from_secs(30),
            stream_timeout: Duration::from_secs(90),
            response_time: ResponseTimeMode::Placeholder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_defaults() {
        let args = Args::try_parse_from(["aiwatch"]).unwrap();
        assert_eq!(args.port, 8080);
        assert_eq!(args.metrics_port, 9090);
        assert_eq!(args.otlp_endpoint, "jaeger:4318");
        assert!(args.log_pretty);
        assert!(!args.tracing_enabled);

        let settings = Settings::from(&args);
        assert_eq!(settings.stream_timeout, Duration::from_secs(90));
        assert_eq!(settings.read_timeout, Duration::from_secs(30));
        assert_eq!(settings.response_time, ResponseTimeMode::Placeholder);
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::try_parse_from([
            "aiwatch",
            "--model",
            "ai/qwen3",
            "--log-pretty",
            "false",
            "--measured-response-time",
            "true",
            "--write-timeout",
            "5",
        ])
        .unwrap();

        assert_eq!(args.model, "ai/qwen3");
        assert!(!args.log_pretty);

        let settings = Settings::from(&args);
        assert_eq!(settings.default_model, "ai/qwen3");
        assert_eq!(settings.stream_timeout, Duration::from_secs(5));
        assert_eq!(settings.response_time, ResponseTimeMode::Measured);
    }

    #[test]
    fn test_rejects_non_boolean_flag_value() {
        assert!(Args::try_parse_from(["aiwatch", "--tracing-enabled", "maybe"]).is_err());
    }
}
