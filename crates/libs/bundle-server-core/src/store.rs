//! Store adapter contract.
//!
//! A store assembles raw bundle bytes from one upstream. The returned bytes
//! must be a complete archive the policy engine can consume, and must be
//! byte-identical for identical upstream content so that the etag is stable.

use async_trait::async_trait;

use crate::error::Result;

/// Construction options handed to a store factory by the registry.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Configured adapter name, used in log lines and error messages.
    pub name: String,
    /// Opaque provider config; the adapter re-decodes it into its own shape.
    pub config: serde_json::Value,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Establishes any long-lived upstream connection. Optional.
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Releases upstream resources. Optional, must be idempotent-tolerant.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Produces complete bundle bytes from current upstream state.
    ///
    /// Any upstream read failure is an error; partial archives are never
    /// returned.
    async fn bundle(&self) -> Result<Vec<u8>>;
}
