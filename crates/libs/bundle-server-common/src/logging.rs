//! Tracing subscriber setup.
//!
//! Log level and format are chosen on the command line (or via the
//! `OPA_BUNDLE_SERVER_LOG_*` environment variables) and applied once at
//! startup. `RUST_LOG` still wins when set, so operators can scope noisy
//! modules the usual way.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseError {
    kind: &'static str,
    value: String,
}

/// Log verbosity. Unknown values are a startup error rather than a silent
/// fallback so a typo in a unit file is caught immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ParseError {
                kind: "log level",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

/// Output encoding for log lines.
///
/// `json-pretty` is accepted for compatibility with existing deployments but
/// emitted as line JSON: tracing-subscriber has no pretty JSON encoder, and
/// multi-line log records break most collectors anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Text,
    #[default]
    Json,
    JsonPretty,
}

impl FromStr for LogFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "json-pretty" => Ok(LogFormat::JsonPretty),
            _ => Err(ParseError {
                kind: "log format",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
            LogFormat::JsonPretty => f.write_str("json-pretty"),
        }
    }
}

/// Install the global tracing subscriber.
///
/// Call once from the binary before anything logs. Panics if a global
/// subscriber is already set, which is always a programming error.
pub fn setup_tracing(level: LogLevel, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", level.as_filter())));

    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
        LogFormat::Json | LogFormat::JsonPretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
            if format == LogFormat::JsonPretty {
                tracing::warn!("log format json-pretty is emitted as line json");
            }
        }
    }
}
