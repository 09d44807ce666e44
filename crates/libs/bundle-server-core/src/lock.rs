//! Cluster-wide leader lock contract and the acquisition loop.
//!
//! `lock()` blocks for the whole lock session: it returns only when the
//! session ends, and the error value says why. The two sentinels separate
//! recoverable contention from intended termination so the loop never spins
//! after shutdown and never exits on a transient failure:
//!
//! - [`Error::LockFailed`]: lost or never acquired; retry.
//! - [`Error::LockClosed`]: deliberate shutdown; stop cleanly.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

/// Construction options handed to a lock factory by the registry.
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub config: serde_json::Value,
}

#[async_trait]
pub trait Lock: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Acquires the lock and then holds it, returning when the session ends
    /// (TTL expiry, contention loss, or [`Lock::unlock`]).
    async fn lock(&self) -> Result<()>;

    /// Ends the session deliberately; the pending `lock()` call returns
    /// [`Error::LockClosed`]. Safe to call when the lock is not held.
    async fn unlock(&self) -> Result<()>;

    /// Non-blocking leadership query used to gate deployer invocation.
    fn has_lock(&self) -> bool;
}

/// Runs lock sessions until the lock is closed or an unrecoverable error
/// occurs. One task per process calls this after `connect`.
pub async fn acquire(lock: Arc<dyn Lock>) -> Result<()> {
    loop {
        match lock.lock().await {
            Err(Error::LockFailed) => {
                debug!("lock session ended, re-acquiring");
            }
            Err(Error::LockClosed) => {
                debug!("lock closed, acquisition loop exiting");
                return Ok(());
            }
            other => return other,
        }
    }
}
