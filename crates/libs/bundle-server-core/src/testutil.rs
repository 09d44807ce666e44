//! In-memory adapter doubles shared by the engine and service tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::deployer::Deployer;
use crate::error::{Error, Result};
use crate::lock::Lock;
use crate::publisher::Publisher;
use crate::store::Store;

/// Store that replays a fixed script of results, then errors.
pub(crate) struct ScriptedStore {
    script: tokio::sync::Mutex<VecDeque<Result<Vec<u8>>>>,
    calls: AtomicUsize,
}

impl ScriptedStore {
    pub(crate) fn new(script: Vec<Result<Vec<u8>>>) -> Arc<Self> {
        Arc::new(ScriptedStore {
            script: tokio::sync::Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn ok(values: Vec<Vec<u8>>) -> Arc<Self> {
        ScriptedStore::new(values.into_iter().map(Ok).collect())
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(Error::store("store script exhausted")))
    }
}

/// Store whose `bundle` blocks until the test releases it, counting calls.
pub(crate) struct GatedStore {
    calls: AtomicUsize,
    started_tx: tokio::sync::mpsc::UnboundedSender<()>,
    started_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<()>>,
    release_tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    release_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl GatedStore {
    pub(crate) fn new() -> Arc<Self> {
        let (started_tx, started_rx) = tokio::sync::mpsc::unbounded_channel();
        let (release_tx, release_rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(GatedStore {
            calls: AtomicUsize::new(0),
            started_tx,
            started_rx: tokio::sync::Mutex::new(started_rx),
            release_tx,
            release_rx: tokio::sync::Mutex::new(release_rx),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Unblocks one in-flight (or future) `bundle` call with `data`.
    pub(crate) fn release(&self, data: Vec<u8>) {
        self.release_tx.send(data).unwrap();
    }

    /// Waits until a `bundle` call has started.
    pub(crate) async fn wait_for_call(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.started_rx.lock().await.recv())
            .await
            .expect("timed out waiting for a store call")
            .expect("gated store closed");
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started_tx.send(()).ok();
        let data = self
            .release_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::store("gate closed"))?;
        Ok(data)
    }
}

/// Store that returns fixed content and counts invocations.
pub(crate) struct CountingStore {
    data: Vec<u8>,
    calls: AtomicUsize,
}

impl CountingStore {
    pub(crate) fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(CountingStore {
            data,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.clone())
    }
}

/// Publisher that records payloads and lets tests await the fan-out.
pub(crate) struct RecordingPublisher {
    payloads: tokio::sync::Mutex<Vec<Vec<u8>>>,
    notify_tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    notify_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl RecordingPublisher {
    pub(crate) fn new() -> Arc<Self> {
        let (notify_tx, notify_rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(RecordingPublisher {
            payloads: tokio::sync::Mutex::new(Vec::new()),
            notify_tx,
            notify_rx: tokio::sync::Mutex::new(notify_rx),
        })
    }

    pub(crate) async fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().await.clone()
    }

    /// Blocks until one publish lands (publishes are fire-and-forget).
    pub(crate) async fn wait_for_payload(&self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), self.notify_rx.lock().await.recv())
            .await
            .expect("timed out waiting for a publish")
            .expect("publisher channel closed")
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        self.payloads.lock().await.push(payload.clone());
        self.notify_tx.send(payload).ok();
        Ok(())
    }
}

/// Deployer that counts invocations.
pub(crate) struct CountingDeployer {
    count: AtomicUsize,
}

impl CountingDeployer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(CountingDeployer {
            count: AtomicUsize::new(0),
        })
    }

    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Deployer for CountingDeployer {
    async fn deploy(&self) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Lock with a directly settable leadership flag.
pub(crate) struct TestLock {
    pub(crate) held: AtomicBool,
    closed: tokio_util::sync::CancellationToken,
}

impl TestLock {
    pub(crate) fn new(held: bool) -> Arc<Self> {
        Arc::new(TestLock {
            held: AtomicBool::new(held),
            closed: tokio_util::sync::CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Lock for TestLock {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn lock(&self) -> Result<()> {
        self.held.store(true, Ordering::SeqCst);
        self.closed.cancelled().await;
        self.held.store(false, Ordering::SeqCst);
        Err(Error::LockClosed)
    }

    async fn unlock(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }

    fn has_lock(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}
