//! Deployer adapter contract.

use async_trait::async_trait;

use crate::error::Result;

/// Construction options handed to a deployer factory by the registry.
#[derive(Debug, Clone)]
pub struct DeployerOptions {
    pub name: String,
    pub config: serde_json::Value,
}

/// Performs an externally visible deployment of a built bundle.
///
/// The engine only invokes deployers on a changing build, and only while
/// this process holds the leader lock.
#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self) -> Result<()>;
}
