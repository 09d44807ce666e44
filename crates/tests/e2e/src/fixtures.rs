//! Adapter doubles and wiring helpers for end-to-end scenarios.
//!
//! Everything here goes through the public registry, exactly as a real
//! deployment would: tests register instrumented providers, point a config
//! file at them, and drive the service over the HTTP router.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use bundle_server_core::deployer::{Deployer, DeployerOptions};
use bundle_server_core::error::{Error, Result};
use bundle_server_core::lock::{Lock, LockOptions};
use bundle_server_core::publisher::{Publisher, PublisherOptions};
use bundle_server_core::registry::Registry;
use bundle_server_core::service::{Service, ServiceConfig};
use bundle_server_core::store::{Store, StoreOptions};

/// Store serving whatever `set_data` last installed, counting fetches.
pub struct SwappableStore {
    data: StdMutex<Vec<u8>>,
    calls: AtomicUsize,
}

impl SwappableStore {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(SwappableStore {
            data: StdMutex::new(data),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_data(&self, data: Vec<u8>) {
        *self.data.lock().unwrap() = data;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for SwappableStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.lock().unwrap().clone())
    }
}

/// Store that blocks every fetch until the test releases it.
pub struct GatedStore {
    calls: AtomicUsize,
    started_tx: tokio::sync::mpsc::UnboundedSender<()>,
    started_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<()>>,
    release_tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    release_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl GatedStore {
    pub fn new() -> Arc<Self> {
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

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self, data: Vec<u8>) {
        self.release_tx.send(data).unwrap();
    }

    pub async fn wait_for_call(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.started_rx.lock().await.recv())
            .await
            .expect("timed out waiting for a store call")
            .expect("gate closed");
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started_tx.send(()).ok();
        self.release_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::store("gate closed"))
    }
}

/// Store that always fails, recording when each attempt happened.
pub struct FailingStore {
    attempts: StdMutex<Vec<Instant>>,
}

impl FailingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(FailingStore {
            attempts: StdMutex::new(Vec::new()),
        })
    }

    pub fn attempt_instants(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        self.attempts.lock().unwrap().push(Instant::now());
        Err(Error::store("upstream permanently broken"))
    }
}

/// Publisher recording every payload it receives.
pub struct RecordingPublisher {
    payloads: StdMutex<Vec<Vec<u8>>>,
    notify_tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    notify_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        let (notify_tx, notify_rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(RecordingPublisher {
            payloads: StdMutex::new(Vec::new()),
            notify_tx,
            notify_rx: tokio::sync::Mutex::new(notify_rx),
        })
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().unwrap().clone()
    }

    pub async fn wait_for_payload(&self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), self.notify_rx.lock().await.recv())
            .await
            .expect("timed out waiting for a publish")
            .expect("publisher closed")
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        self.payloads.lock().unwrap().push(payload.clone());
        self.notify_tx.send(payload).ok();
        Ok(())
    }
}

/// Deployer counting invocations.
pub struct CountingDeployer {
    count: AtomicUsize,
}

impl CountingDeployer {
    pub fn new() -> Arc<Self> {
        Arc::new(CountingDeployer {
            count: AtomicUsize::new(0),
        })
    }

    pub fn count(&self) -> usize {
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

/// One cluster-wide lock shared by every [`SharedLock`] built from the same
/// hub, standing in for an external lock service in two-process scenarios.
pub struct LockHub {
    holder: tokio::sync::Mutex<Option<String>>,
    freed: tokio::sync::Notify,
}

impl LockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(LockHub {
            holder: tokio::sync::Mutex::new(None),
            freed: tokio::sync::Notify::new(),
        })
    }

    /// Current holder id, if any.
    pub async fn holder(&self) -> Option<String> {
        self.holder.lock().await.clone()
    }

    pub fn lock_for(self: &Arc<Self>, id: impl Into<String>) -> Arc<SharedLock> {
        Arc::new(SharedLock {
            hub: Arc::clone(self),
            id: id.into(),
            held: AtomicBool::new(false),
            close: CancellationToken::new(),
        })
    }
}

pub struct SharedLock {
    hub: Arc<LockHub>,
    id: String,
    held: AtomicBool,
    close: CancellationToken,
}

#[async_trait]
impl Lock for SharedLock {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn lock(&self) -> Result<()> {
        loop {
            // arm the wakeup before checking, so a release between the check
            // and the await is not missed
            let freed = self.hub.freed.notified();
            {
                let mut holder = self.hub.holder.lock().await;
                if holder.is_none() {
                    *holder = Some(self.id.clone());
                    break;
                }
            }
            tokio::select! {
                _ = self.close.cancelled() => return Err(Error::LockClosed),
                _ = freed => {}
            }
        }

        self.held.store(true, Ordering::SeqCst);
        self.close.cancelled().await;
        self.held.store(false, Ordering::SeqCst);

        let mut holder = self.hub.holder.lock().await;
        if holder.as_deref() == Some(self.id.as_str()) {
            *holder = None;
            self.hub.freed.notify_waiters();
        }
        Err(Error::LockClosed)
    }

    async fn unlock(&self) -> Result<()> {
        self.close.cancel();
        Ok(())
    }

    fn has_lock(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

/// Instrumented providers handed out by [`test_registry`], keyed by the
/// adapter name each instance was configured under.
#[derive(Default)]
pub struct Instruments {
    pub stores: StdMutex<HashMap<String, Arc<SwappableStore>>>,
    pub gated_stores: StdMutex<HashMap<String, Arc<GatedStore>>>,
    pub failing_stores: StdMutex<HashMap<String, Arc<FailingStore>>>,
    pub publishers: StdMutex<HashMap<String, Arc<RecordingPublisher>>>,
    pub deployers: StdMutex<HashMap<String, Arc<CountingDeployer>>>,
}

impl Instruments {
    pub fn store(&self, name: &str) -> Arc<SwappableStore> {
        self.stores.lock().unwrap()[name].clone()
    }

    pub fn gated_store(&self, name: &str) -> Arc<GatedStore> {
        self.gated_stores.lock().unwrap()[name].clone()
    }

    pub fn failing_store(&self, name: &str) -> Arc<FailingStore> {
        self.failing_stores.lock().unwrap()[name].clone()
    }

    pub fn publisher(&self, name: &str) -> Arc<RecordingPublisher> {
        self.publishers.lock().unwrap()[name].clone()
    }

    pub fn deployer(&self, name: &str) -> Arc<CountingDeployer> {
        self.deployers.lock().unwrap()[name].clone()
    }
}

/// A registry with the built-in providers plus instrumented test providers
/// (`swappable` / `gated` / `failing` stores, `recording` publisher,
/// `counting` deployer, and optionally a `shared` lock bound to `hub`).
pub fn test_registry(hub: Option<&Arc<LockHub>>) -> (Registry, Arc<Instruments>) {
    let instruments = Arc::new(Instruments::default());
    let mut registry = Registry::with_defaults();

    let handles = Arc::clone(&instruments);
    registry.register_store(
        "swappable",
        Arc::new(move |options: StoreOptions| {
            // initial content may be supplied inline in the config
            let initial = options.config["data"].as_str().unwrap_or("").as_bytes().to_vec();
            let store = SwappableStore::new(initial);
            handles
                .stores
                .lock()
                .unwrap()
                .insert(options.name, Arc::clone(&store));
            Ok(store as Arc<dyn Store>)
        }),
    );

    let handles = Arc::clone(&instruments);
    registry.register_store(
        "gated",
        Arc::new(move |options: StoreOptions| {
            let store = GatedStore::new();
            handles
                .gated_stores
                .lock()
                .unwrap()
                .insert(options.name, Arc::clone(&store));
            Ok(store as Arc<dyn Store>)
        }),
    );

    let handles = Arc::clone(&instruments);
    registry.register_store(
        "failing",
        Arc::new(move |options: StoreOptions| {
            let store = FailingStore::new();
            handles
                .failing_stores
                .lock()
                .unwrap()
                .insert(options.name, Arc::clone(&store));
            Ok(store as Arc<dyn Store>)
        }),
    );

    let handles = Arc::clone(&instruments);
    registry.register_publisher(
        "recording",
        Arc::new(move |options: PublisherOptions| {
            let publisher = RecordingPublisher::new();
            handles
                .publishers
                .lock()
                .unwrap()
                .insert(options.name, Arc::clone(&publisher));
            Ok(publisher as Arc<dyn Publisher>)
        }),
    );

    let handles = Arc::clone(&instruments);
    registry.register_deployer(
        "counting",
        Arc::new(move |options: DeployerOptions| {
            let deployer = CountingDeployer::new();
            handles
                .deployers
                .lock()
                .unwrap()
                .insert(options.name, Arc::clone(&deployer));
            Ok(deployer as Arc<dyn Deployer>)
        }),
    );

    if let Some(hub) = hub {
        let hub = Arc::clone(hub);
        registry.register_lock(
            "shared",
            Arc::new(move |options: LockOptions| {
                let id = options.config["id"].as_str().unwrap_or("node").to_string();
                Ok(hub.lock_for(id) as Arc<dyn Lock>)
            }),
        );
    }

    (registry, instruments)
}

/// Writes a config file and starts a service against it.
pub async fn start_service(
    config_text: &str,
    registry: Registry,
) -> (Arc<Service>, tempfile::NamedTempFile) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(config_text.as_bytes()).unwrap();
    file.flush().unwrap();

    let service = Service::start(
        ServiceConfig {
            file: file.path().to_path_buf(),
            watch: false,
        },
        registry,
    )
    .await
    .expect("service start");

    (service, file)
}

/// Polls until `condition` holds or panics after ~2 seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Waits for a bundle's first successful build.
pub async fn wait_for_initial_build(service: &Arc<Service>, bundle: &str) -> String {
    let bundle = service.bundle(bundle).await.expect("bundle exists");
    for _ in 0..200 {
        let etag = bundle.etag().await;
        if !etag.is_empty() {
            return etag;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("bundle never built");
}
