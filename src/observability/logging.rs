//! Logging setup and span macros
//!
//! Output is configured from the environment:
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO (default), DEBUG or TRACE
//! - `LOG_FORMAT`: `json` (default), `pretty` or `compact`
//! - `LOG_SPANS`: `true` to log span open and close events
//! - `RUST_LOG`: replaces the generated filter
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG ask-daf ask "Quelles factures sont en retard ?"
//! ```
//!
//! Every question runs inside an `ask` span, so tool, retrieval and
//! validation events can be grouped by conversation.

use std::env;
use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, for log shipping
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Unknown values fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// HTTP and runtime crates that flood INFO
const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "warp", "tokio", "h2", "rustls"];

/// Level filter with the noisy dependencies held at WARN; `RUST_LOG` wins
pub fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.to_string());
    for target in QUIET_TARGETS {
        if let Ok(directive) = format!("{target}=warn").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let registry = tracing_subscriber::registry().with(build_filter(level));
    let events = span_events(include_spans);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_span_events(events))
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_ansi(true).with_span_events(events))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_span_events(events),
            )
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("Logging already initialised");
    }
}

/// Install the subscriber described by `LOG_LEVEL`, `LOG_FORMAT` and `LOG_SPANS`
pub fn init_default_logging() {
    let level = env::var("LOG_LEVEL")
        .map(|value| parse_level(&value))
        .unwrap_or(Level::INFO);
    let format = env::var("LOG_FORMAT")
        .map(|value| LogFormat::parse(&value))
        .unwrap_or(LogFormat::Json);
    let include_spans = env::var("LOG_SPANS")
        .map(|value| parse_flag(&value))
        .unwrap_or(false);

    init_logging(level, format, include_spans);
}

/// `LOG_LEVEL` value, INFO when unrecognised
pub fn parse_level(value: &str) -> Level {
    match value.trim().to_ascii_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" | "WARNING" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Span covering one question, from validation of the input to the answer
#[macro_export]
macro_rules! ask_span {
    ($($field:tt)*) => {
        tracing::info_span!("ask", $($field)*)
    };
}

#[macro_export]
macro_rules! tool_span {
    ($($field:tt)*) => {
        tracing::info_span!("tool_execution", $($field)*)
    };
}

#[macro_export]
macro_rules! ingest_span {
    ($($field:tt)*) => {
        tracing::info_span!("document_ingest", $($field)*)
    };
}

#[macro_export]
macro_rules! retrieval_span {
    ($($field:tt)*) => {
        tracing::info_span!("retrieval", $($field)*)
    };
}

#[macro_export]
macro_rules! extract_span {
    ($($field:tt)*) => {
        tracing::info_span!("invoice_extraction", $($field)*)
    };
}

pub use {ask_span, extract_span, ingest_span, retrieval_span, tool_span};
