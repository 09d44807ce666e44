//! Shared pieces used by every bundle-server crate: log level/format types
//! and the tracing subscriber setup.

pub mod logging;

pub use logging::{LogFormat, LogLevel, setup_tracing};
