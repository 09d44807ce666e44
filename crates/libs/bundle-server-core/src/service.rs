//! Service orchestrator: owns the adapter maps and the bundle map, routes
//! change notifications to rebuilds, supervises the leader lock, and drives
//! load/reload/shutdown.
//!
//! Subscribers and webhooks never see the bundle map. Their callbacks push a
//! typed [`Notification`] onto a channel the service owns; a router task
//! performs the name matching and schedules rebuilds. That keeps adapters
//! free of back-pointers and makes teardown ordering straightforward.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bundle::Bundle;
use crate::config::{Config, ServerConfig};
use crate::deployer::{Deployer, DeployerOptions};
use crate::error::{Error, Result};
use crate::lock::{self, Lock, LockOptions};
use crate::publisher::{Publisher, PublisherOptions};
use crate::registry::Registry;
use crate::store::{Store, StoreOptions};
use crate::subscriber::{Subscriber, SubscriberOptions};
use crate::webhook::{Webhook, WebhookOptions, WebhookRequest};

/// How often the optional config watcher checks the file for changes.
const WATCH_INTERVAL: Duration = Duration::from_secs(3);

/// How long teardown waits for the lock acquisition loop to wind down.
const LOCK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Service-level settings, from the CLI rather than the config file.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path of the YAML/JSON configuration file.
    pub file: PathBuf,
    /// Reload automatically when the config file changes on disk.
    pub watch: bool,
}

/// Which kind of adapter produced a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Webhook,
    Subscriber,
}

impl AdapterKind {
    fn as_str(self) -> &'static str {
        match self {
            AdapterKind::Webhook => "webhook",
            AdapterKind::Subscriber => "subscriber",
        }
    }
}

/// A change signal emitted by a named webhook or subscriber.
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: AdapterKind,
    pub name: String,
}

#[derive(Default)]
struct ServiceState {
    config: Config,
    stores: HashMap<String, Arc<dyn Store>>,
    publishers: HashMap<String, Arc<dyn Publisher>>,
    subscribers: HashMap<String, Arc<dyn Subscriber>>,
    webhooks: HashMap<String, Arc<dyn Webhook>>,
    deployers: HashMap<String, Arc<dyn Deployer>>,
    bundles: HashMap<String, Arc<Bundle>>,
    lock: Option<Arc<dyn Lock>>,
    lock_task: Option<tokio::task::JoinHandle<()>>,
}

pub struct Service {
    service_config: ServiceConfig,
    registry: Registry,
    state: RwLock<ServiceState>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    shutdown: CancellationToken,
}

impl Service {
    /// Loads the configuration, wires everything up, and starts the router
    /// (and, when requested, the config watcher). Fatal on any
    /// configuration error.
    pub async fn start(service_config: ServiceConfig, registry: Registry) -> Result<Arc<Service>> {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let service = Arc::new(Service {
            service_config,
            registry,
            state: RwLock::new(ServiceState::default()),
            notify_tx,
            shutdown: CancellationToken::new(),
        });

        service.reload().await?;

        tokio::spawn(Service::route_notifications(
            Arc::clone(&service),
            notify_rx,
        ));
        if service.service_config.watch {
            tokio::spawn(Service::watch_config(Arc::clone(&service)));
        }

        Ok(service)
    }

    /// Re-reads and re-applies the configuration file.
    ///
    /// Parse errors surface before anything is torn down, so a broken edit
    /// leaves the running config untouched. After teardown begins, a failed
    /// instantiation aborts the reload with an error; teardown itself is
    /// best effort.
    pub async fn reload(&self) -> Result<()> {
        let path = &self.service_config.file;
        let content = tokio::fs::read(path).await.map_err(|err| {
            Error::config(format!(
                "failed to read configuration file {}: {err}",
                path.display()
            ))
        })?;
        let config = Config::parse(&content).map_err(|err| {
            Error::config(format!(
                "failed to parse configuration file {}: {err}",
                path.display()
            ))
        })?;

        let mut state = self.state.write().await;
        self.teardown(&mut state).await;

        self.load_lock(&mut state, &config).await?;
        self.load_stores(&mut state, &config).await?;
        self.load_publishers(&mut state, &config).await?;
        self.load_subscribers(&mut state, &config).await?;
        self.load_webhooks(&mut state, &config)?;
        self.load_deployers(&mut state, &config)?;
        self.load_bundles(&mut state, &config).await?;

        state.config = config;
        info!(config = %path.display(), "configuration loaded");
        Ok(())
    }

    /// Stops everything: router, watcher, bundles, adapters, lock.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut state = self.state.write().await;
        self.teardown(&mut state).await;
        info!("service stopped");
    }

    pub async fn bundle(&self, name: &str) -> Option<Arc<Bundle>> {
        self.state.read().await.bundles.get(name).cloned()
    }

    /// Triggers a rebuild of a named bundle; 404s surface as
    /// [`Error::BundleNotFound`].
    pub async fn rebuild_bundle(&self, name: &str) -> Result<()> {
        let bundle = self
            .bundle(name)
            .await
            .ok_or_else(|| Error::BundleNotFound(name.to_string()))?;
        bundle.rebuild().await
    }

    /// Delegates an inbound notification to a named webhook adapter.
    pub async fn handle_webhook(&self, name: &str, request: &WebhookRequest) -> Result<()> {
        let webhook = self
            .state
            .read()
            .await
            .webhooks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::WebhookNotFound(name.to_string()))?;
        webhook.handle(request)
    }

    /// The configured HTTP listen settings.
    pub async fn server_config(&self) -> ServerConfig {
        self.state
            .read()
            .await
            .config
            .server
            .clone()
            .unwrap_or_default()
    }

    /// Callback handed to a subscriber/webhook: pushes a typed notification
    /// onto the routing channel.
    fn callback(&self, kind: AdapterKind, name: &str) -> crate::subscriber::Callback {
        let tx = self.notify_tx.clone();
        let name = name.to_string();
        Arc::new(move || {
            let _ = tx.send(Notification {
                kind,
                name: name.clone(),
            });
        })
    }

    async fn route_notifications(
        self: Arc<Self>,
        mut notify_rx: mpsc::UnboundedReceiver<Notification>,
    ) {
        loop {
            let notification = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = notify_rx.recv() => match received {
                    Some(notification) => notification,
                    None => break,
                },
            };
            self.dispatch(notification).await;
        }
        debug!("notification router stopped");
    }

    /// Scans the bundle map for bundles referencing the notifying adapter
    /// and schedules a rebuild for each.
    async fn dispatch(&self, notification: Notification) {
        let matches: Vec<Arc<Bundle>> = {
            let state = self.state.read().await;
            state
                .bundles
                .values()
                .filter(|bundle| {
                    let refs = match notification.kind {
                        AdapterKind::Webhook => &bundle.config().webhooks,
                        AdapterKind::Subscriber => &bundle.config().subscribers,
                    };
                    refs.iter().any(|name| name == &notification.name)
                })
                .cloned()
                .collect()
        };

        if matches.is_empty() {
            warn!(
                kind = notification.kind.as_str(),
                name = %notification.name,
                "notification did not match any bundles"
            );
            return;
        }

        for bundle in matches {
            info!(
                kind = notification.kind.as_str(),
                name = %notification.name,
                bundle = %bundle.name(),
                "scheduling rebuild"
            );
            tokio::spawn(async move {
                if let Err(err) = bundle.rebuild().await {
                    error!(bundle = %bundle.name(), error = %err, "triggered rebuild failed");
                }
            });
        }
    }

    /// Polls the config file mtime and reloads on change.
    async fn watch_config(self: Arc<Self>) {
        let mut last_modified = modified_at(&self.service_config.file).await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(WATCH_INTERVAL) => {}
            }

            let modified = modified_at(&self.service_config.file).await;
            if modified.is_some() && modified != last_modified {
                info!(config = %self.service_config.file.display(), "configuration file changed, reloading");
                if let Err(err) = self.reload().await {
                    error!(error = %err, "automatic reload failed");
                }
            }
            if modified.is_some() {
                last_modified = modified;
            }
        }
        debug!("config watcher stopped");
    }

    /// Tears existing state down in reverse dependency order, best effort.
    async fn teardown(&self, state: &mut ServiceState) {
        for (name, bundle) in state.bundles.drain() {
            if let Err(err) = bundle.deactivate().await {
                debug!(bundle = %name, error = %err, "failed to deactivate bundle");
            }
        }

        state.deployers.clear();
        state.webhooks.clear();

        for (name, subscriber) in state.subscribers.drain() {
            match subscriber.unsubscribe().await {
                Ok(()) | Err(Error::NotSubscribed(_)) => {}
                Err(err) => error!(subscriber = %name, error = %err, "failed to unsubscribe"),
            }
            if let Err(err) = subscriber.disconnect().await {
                error!(subscriber = %name, error = %err, "failed to disconnect subscriber");
            }
        }

        for (name, publisher) in state.publishers.drain() {
            if let Err(err) = publisher.disconnect().await {
                error!(publisher = %name, error = %err, "failed to disconnect publisher");
            }
        }

        for (name, store) in state.stores.drain() {
            if let Err(err) = store.disconnect().await {
                error!(store = %name, error = %err, "failed to disconnect store");
            }
        }

        if let Some(lock) = state.lock.take() {
            if let Err(err) = lock.unlock().await {
                error!(error = %err, "failed to unlock");
            }
            if let Err(err) = lock.disconnect().await {
                error!(error = %err, "failed to disconnect lock");
            }
        }
        if let Some(task) = state.lock_task.take()
            && tokio::time::timeout(LOCK_SHUTDOWN_TIMEOUT, task).await.is_err()
        {
            warn!("lock acquisition loop did not stop in time");
        }
    }

    async fn load_lock(&self, state: &mut ServiceState, config: &Config) -> Result<()> {
        let Some(lock_config) = &config.lock else {
            warn!(
                "no lock configuration specified. extra care should be taken when using \
                 deployers to prevent duplicate deployments"
            );
            return Ok(());
        };

        let lock = self.registry.lock(
            &lock_config.provider,
            LockOptions {
                config: lock_config.config.clone(),
            },
        )?;
        lock.connect().await?;

        let task = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                if let Err(err) = lock::acquire(lock).await {
                    error!(error = %err, "lock error");
                }
            })
        };

        state.lock = Some(lock);
        state.lock_task = Some(task);
        Ok(())
    }

    async fn load_stores(&self, state: &mut ServiceState, config: &Config) -> Result<()> {
        for (name, adapter) in &config.stores {
            let store = self
                .registry
                .store(
                    &adapter.provider,
                    StoreOptions {
                        name: name.clone(),
                        config: adapter.config.clone(),
                    },
                )
                .map_err(|err| {
                    Error::config(format!(
                        "failed to initialize {} store {name}: {err}",
                        adapter.provider
                    ))
                })?;
            store.connect().await?;
            state.stores.insert(name.clone(), store);
        }
        Ok(())
    }

    async fn load_publishers(&self, state: &mut ServiceState, config: &Config) -> Result<()> {
        for (name, adapter) in &config.publishers {
            let publisher = self
                .registry
                .publisher(
                    &adapter.provider,
                    PublisherOptions {
                        name: name.clone(),
                        config: adapter.config.clone(),
                    },
                )
                .map_err(|err| {
                    Error::config(format!(
                        "failed to initialize {} publisher {name}: {err}",
                        adapter.provider
                    ))
                })?;
            publisher.connect().await?;
            info!(publisher = %name, "registered publisher");
            state.publishers.insert(name.clone(), publisher);
        }
        Ok(())
    }

    async fn load_subscribers(&self, state: &mut ServiceState, config: &Config) -> Result<()> {
        for (name, adapter) in &config.subscribers {
            let subscriber = self
                .registry
                .subscriber(
                    &adapter.provider,
                    SubscriberOptions {
                        name: name.clone(),
                        config: adapter.config.clone(),
                        callback: self.callback(AdapterKind::Subscriber, name),
                    },
                )
                .map_err(|err| {
                    Error::config(format!(
                        "failed to initialize {} subscriber {name}: {err}",
                        adapter.provider
                    ))
                })?;
            subscriber.connect().await?;
            subscriber.subscribe().await?;
            info!(subscriber = %name, "registered subscriber");
            state.subscribers.insert(name.clone(), subscriber);
        }
        Ok(())
    }

    fn load_webhooks(&self, state: &mut ServiceState, config: &Config) -> Result<()> {
        for (name, adapter) in &config.webhooks {
            let webhook = self
                .registry
                .webhook(
                    &adapter.provider,
                    WebhookOptions {
                        name: name.clone(),
                        config: adapter.config.clone(),
                        callback: self.callback(AdapterKind::Webhook, name),
                    },
                )
                .map_err(|err| {
                    Error::config(format!(
                        "failed to initialize {} webhook {name}: {err}",
                        adapter.provider
                    ))
                })?;
            info!(webhook = %name, "registered webhook");
            state.webhooks.insert(name.clone(), webhook);
        }
        Ok(())
    }

    fn load_deployers(&self, state: &mut ServiceState, config: &Config) -> Result<()> {
        for (name, adapter) in &config.deployers {
            let deployer = self
                .registry
                .deployer(
                    &adapter.provider,
                    DeployerOptions {
                        name: name.clone(),
                        config: adapter.config.clone(),
                    },
                )
                .map_err(|err| {
                    Error::config(format!(
                        "failed to initialize {} deployer {name}: {err}",
                        adapter.provider
                    ))
                })?;
            info!(deployer = %name, "registered deployer");
            state.deployers.insert(name.clone(), deployer);
        }
        Ok(())
    }

    async fn load_bundles(&self, state: &mut ServiceState, config: &Config) -> Result<()> {
        for (name, bundle_config) in &config.bundles {
            let store = state
                .stores
                .get(&bundle_config.store)
                .cloned()
                .ok_or_else(|| Error::MissingReference {
                    kind: "store",
                    name: bundle_config.store.clone(),
                    bundle: name.clone(),
                })?;

            let mut publishers = Vec::with_capacity(bundle_config.publishers.len());
            for publisher_name in &bundle_config.publishers {
                let publisher = state
                    .publishers
                    .get(publisher_name)
                    .cloned()
                    .ok_or_else(|| Error::MissingReference {
                        kind: "publisher",
                        name: publisher_name.clone(),
                        bundle: name.clone(),
                    })?;
                publishers.push((publisher_name.clone(), publisher));
            }

            let mut deployers = Vec::with_capacity(bundle_config.deployers.len());
            for deployer_name in &bundle_config.deployers {
                let deployer = state
                    .deployers
                    .get(deployer_name)
                    .cloned()
                    .ok_or_else(|| Error::MissingReference {
                        kind: "deployer",
                        name: deployer_name.clone(),
                        bundle: name.clone(),
                    })?;
                deployers.push((deployer_name.clone(), deployer));
            }

            let bundle = Arc::new(Bundle::new(
                name.clone(),
                bundle_config.clone(),
                store,
                publishers,
                deployers,
                state.lock.clone(),
            ));
            bundle.activate().await?;

            info!(bundle = %name, "registered bundle");
            state.bundles.insert(name.clone(), bundle);
        }
        Ok(())
    }
}

async fn modified_at(path: &std::path::Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.service_config)
            .finish_non_exhaustive()
    }
}
