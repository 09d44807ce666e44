//! Publisher adapter contract.

use async_trait::async_trait;

use crate::error::Result;

/// Construction options handed to a publisher factory by the registry.
#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub name: String,
    pub config: serde_json::Value,
}

/// Emits a payload to an external event sink.
///
/// The bundle engine fires publishes in detached tasks and never awaits
/// them, so implementations must be safe to call concurrently; failures are
/// logged by the caller and do not affect bundle state.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<()>;
}
