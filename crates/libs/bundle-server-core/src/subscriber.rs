//! Subscriber adapter contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Change-notification callback. Implementations forward into the service's
/// routing channel, so invoking it is cheap and non-blocking.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Construction options handed to a subscriber factory by the registry.
#[derive(Clone)]
pub struct SubscriberOptions {
    pub name: String,
    pub config: serde_json::Value,
    pub callback: Callback,
}

impl std::fmt::Debug for SubscriberOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberOptions")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A long-lived watch on an external source that invokes the callback for
/// every qualifying upstream event. Bursts are debounced inside the adapter.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Starts the watch task. Returns an error if already watching.
    async fn subscribe(&self) -> Result<()>;

    /// Stops the watch task with a deterministic completion signal.
    async fn unsubscribe(&self) -> Result<()>;
}
