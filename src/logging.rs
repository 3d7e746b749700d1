use std::str::FromStr;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::{Directive, LevelFilter};

// transport crates only speak up when something is wrong
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2"];

/// Parses a log level name, falling back to `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim() {
        "" => LevelFilter::INFO,
        level => LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO),
    }
}

pub fn filter(level: &str) -> EnvFilter {
    let mut filter = EnvFilter::default().add_directive(parse_level(level).into());
    for target in QUIET_TARGETS {
        if let Ok(directive) = Directive::from_str(&format!("{target}=warn")) {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Installs the global subscriber. Pretty output carries file and line,
/// otherwise one JSON object per line.
pub fn init(level: &str, pretty: bool) {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(level));
    let result = if pretty {
        builder
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .try_init()
    } else {
        builder
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("logging already initialized: {err}");
    }
}
