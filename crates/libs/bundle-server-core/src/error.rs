//! Error types for bundle-server-core operations.
//!
//! Errors fall into the categories the service treats differently:
//!
//! - **External errors**: wrapped errors from dependencies (io, git2, serde,
//!   reqwest, minijinja)
//! - **Configuration errors**: fatal at load/reload time, never partially
//!   applied
//! - **Not-found errors**: surfaced as 404 by the HTTP layer
//! - **Precondition errors**: double connect, re-activate, and friends
//! - **Lock sentinels**: the two distinguished session-end values the
//!   acquisition loop dispatches on

use thiserror::Error;

/// The error type for bundle-server-core operations.
#[derive(Debug, Error)]
pub enum Error {
    // -- External errors from dependencies
    /// Standard I/O error.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// Git repository error.
    #[error("Git Error: {0}")]
    Git2(#[from] git2::Error),

    /// JSON serialization/deserialization error.
    #[error("Serde JSON Error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("Serde YAML Error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    /// Config template rendering error.
    #[error("Template Error: {0}")]
    Template(#[from] minijinja::Error),

    /// HTTP client error from an upstream adapter call.
    #[error("HTTP Error: {0}")]
    Http(#[from] reqwest::Error),

    // -- Configuration errors (fatal at load/reload)
    /// Malformed or semantically invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A `type` in the config does not name a registered provider.
    #[error("invalid {kind} provider type {provider}")]
    UnknownProvider { kind: &'static str, provider: String },

    /// A bundle references an adapter name that was not configured.
    #[error("{kind} {name} for bundle {bundle} not found")]
    MissingReference {
        kind: &'static str,
        name: String,
        bundle: String,
    },

    // -- Not-found errors (404 at the HTTP edge)
    /// Bundle lookup by name failed.
    #[error("bundle {0} not found")]
    BundleNotFound(String),

    /// Webhook lookup by name failed.
    #[error("webhook {0} not found")]
    WebhookNotFound(String),

    /// Store entry lookup by key failed.
    #[error("entry {0} not found")]
    EntryNotFound(String),

    // -- Precondition errors (defensive)
    /// Adapter `connect` called while already connected.
    #[error("already connected")]
    AlreadyConnected,

    /// Adapter operation that requires a connection, without one.
    #[error("not connected")]
    NotConnected,

    /// `activate` called on an active bundle.
    #[error("bundle {0} is already active")]
    AlreadyActive(String),

    /// `deactivate` called on an inactive bundle.
    #[error("bundle {0} is not active")]
    NotActive(String),

    /// `subscribe` called on a running subscriber.
    #[error("subscriber {0} is already subscribed")]
    AlreadySubscribed(String),

    /// `unsubscribe` called on a stopped subscriber.
    #[error("subscriber {0} is not subscribed")]
    NotSubscribed(String),

    // -- Upstream errors (transient, retried by the polling loop)
    /// Store fetch failure; the bundle state is left untouched.
    #[error("store error: {0}")]
    Store(String),

    /// Inbound webhook that failed parsing or authentication.
    #[error("webhook rejected: {0}")]
    WebhookRejected(String),

    // -- Lock sentinels (see `lock::acquire`)
    /// The lock session ended without a deliberate shutdown: lost to another
    /// holder, session expired, or never acquired. Recoverable by retrying.
    #[error("lock failed")]
    LockFailed,

    /// The lock was deliberately closed; the acquisition loop terminates.
    #[error("lock closed")]
    LockClosed,
}

impl Error {
    /// Creates a configuration error from anything printable.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a store error from anything printable.
    pub fn store(msg: impl Into<String>) -> Self {
        Error::Store(msg.into())
    }

    /// True for errors the HTTP layer maps to 404.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::BundleNotFound(_) | Error::WebhookNotFound(_) | Error::EntryNotFound(_)
        )
    }
}

/// A specialized [`Result`] type for bundle-server-core operations.
pub type Result<T> = core::result::Result<T, Error>;
