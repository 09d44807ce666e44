//! Consul subscriber: long-lived blocking-query watch on a key, key prefix,
//! or user event. Index changes invoke the callback through the trailing-
//! edge debouncer so a burst of KV writes lands as one rebuild.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::consul::{Client, ConsulConfig};
use crate::debounce::{DEFAULT_WINDOW, Debouncer};
use crate::error::{Error, Result};
use crate::subscriber::{Subscriber, SubscriberOptions};
use crate::utils::remarshal;

pub const PROVIDER_NAME: &str = "consul";

/// How long one blocking query waits before returning unchanged.
const WATCH_WAIT: Duration = Duration::from_secs(60);

/// Pause before retrying after a failed query, so a dead consul does not
/// turn the watch into a hot loop.
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchType {
    Key,
    #[default]
    Keyprefix,
    Event,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Key, key prefix, or event name to watch.
    pub topic: String,
    #[serde(default)]
    pub watch_type: WatchType,
    /// Debounce window in milliseconds.
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    pub consul: ConsulConfig,
}

struct WatchHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub struct ConsulSubscriber {
    name: String,
    config: Config,
    client: Client,
    debouncer: Debouncer,
    connected: Mutex<bool>,
    watch: Mutex<Option<WatchHandle>>,
}

impl ConsulSubscriber {
    pub fn factory(options: SubscriberOptions) -> Result<Arc<dyn Subscriber>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("subscriber {}: {err}", options.name)))?;
        if config.topic.is_empty() {
            return Err(Error::config(format!(
                "no topic specified for consul subscriber {}",
                options.name
            )));
        }

        let window = config
            .debounce_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WINDOW);

        Ok(Arc::new(ConsulSubscriber {
            client: Client::new(config.consul.clone())?,
            debouncer: Debouncer::new(window, options.callback),
            name: options.name,
            config,
            connected: Mutex::new(false),
            watch: Mutex::new(None),
        }))
    }

    async fn watch_loop(
        name: String,
        config: Config,
        client: Client,
        debouncer: Debouncer,
        cancel: CancellationToken,
    ) {
        let mut index: u64 = 0;
        let mut primed = false;

        debug!(subscriber = %name, topic = %config.topic, "consul watch started");

        loop {
            let query = async {
                match config.watch_type {
                    WatchType::Key => client
                        .kv_watch(&config.topic, false, index, WATCH_WAIT)
                        .await
                        .map(|watched| watched.index),
                    WatchType::Keyprefix => client
                        .kv_watch(&config.topic, true, index, WATCH_WAIT)
                        .await
                        .map(|watched| watched.index),
                    WatchType::Event => client
                        .event_watch(&config.topic, index, WATCH_WAIT)
                        .await
                        .map(|watched| watched.index),
                }
            };

            let next_index = tokio::select! {
                _ = cancel.cancelled() => break,
                result = query => match result {
                    Ok(next_index) => next_index,
                    Err(err) => {
                        warn!(subscriber = %name, error = %err, "consul watch query failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                        }
                        continue;
                    }
                },
            };

            // the first response establishes the baseline; only later index
            // movement is an upstream event
            if primed && next_index != index {
                debug!(subscriber = %name, "consul subscriber received a change");
                debouncer.call();
            }
            primed = true;

            // consul indexes can reset backwards; restart from scratch
            index = if next_index < index { 0 } else { next_index };
        }

        debug!(subscriber = %name, "consul watch stopped");
    }
}

#[async_trait]
impl Subscriber for ConsulSubscriber {
    async fn connect(&self) -> Result<()> {
        let mut connected = self.connected.lock().await;
        if *connected {
            return Err(Error::AlreadyConnected);
        }
        debug!(subscriber = %self.name, address = %self.client.address(), "connecting consul subscriber");
        *connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut connected = self.connected.lock().await;
        if !*connected {
            return Err(Error::NotConnected);
        }

        // stopping an idle watch is fine during teardown
        match self.unsubscribe().await {
            Ok(()) | Err(Error::NotSubscribed(_)) => {}
            Err(err) => return Err(err),
        }
        *connected = false;
        Ok(())
    }

    async fn subscribe(&self) -> Result<()> {
        let mut watch = self.watch.lock().await;
        if watch.is_some() {
            return Err(Error::AlreadySubscribed(self.name.clone()));
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(ConsulSubscriber::watch_loop(
            self.name.clone(),
            self.config.clone(),
            self.client.clone(),
            self.debouncer.clone(),
            cancel.clone(),
        ));

        *watch = Some(WatchHandle { cancel, task });
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        let handle = {
            let mut watch = self.watch.lock().await;
            watch
                .take()
                .ok_or_else(|| Error::NotSubscribed(self.name.clone()))?
        };

        handle.cancel.cancel();
        // deterministic completion: the watch task has fully stopped when
        // unsubscribe returns
        if let Err(err) = handle.task.await {
            warn!(subscriber = %self.name, error = %err, "watch task ended abnormally");
        }
        Ok(())
    }
}
