//! HTTP server error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] bundle_server_core::Error),

    #[error("invalid listen address: {0}")]
    Address(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
