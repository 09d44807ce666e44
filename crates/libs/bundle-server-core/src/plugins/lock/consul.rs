//! Consul-backed cluster lock.
//!
//! One session per `lock()` call: the session carries a TTL and the lock key
//! is taken with `?acquire=<session>`. While held, the session is renewed at
//! half the TTL and ownership is re-verified; losing either ends the session
//! with [`Error::LockFailed`]. `unlock()` cancels the one-shot close signal,
//! which surfaces as [`Error::LockClosed`] so the acquisition loop stops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::consul::{Client, ConsulConfig};
use crate::error::{Error, Result};
use crate::lock::{Lock, LockOptions};
use crate::utils::remarshal;

pub const PROVIDER_NAME: &str = "consul";

const DEFAULT_TTL: Duration = Duration::from_secs(15);
const DEFAULT_WAIT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// KV key the cluster contends on.
    pub key: String,
    /// Session TTL in seconds.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// How long one acquisition attempt waits for the key to free up.
    #[serde(default)]
    pub wait_seconds: Option<u64>,
    pub consul: ConsulConfig,
}

/// Where the lock currently is in its lifecycle. Purely observational;
/// transitions are logged for operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Disconnected,
    Idle,
    Acquiring,
    Held,
    Releasing,
}

pub struct ConsulLock {
    /// Per-process holder id, written into the lock key value.
    id: String,
    key: String,
    ttl: Duration,
    wait: Duration,
    consul: ConsulConfig,
    client: Mutex<Option<Client>>,
    state: Mutex<LockState>,
    has_lock: AtomicBool,
    close: CancellationToken,
}

impl ConsulLock {
    pub fn factory(options: LockOptions) -> Result<Arc<dyn Lock>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("consul lock: {err}")))?;
        if config.key.is_empty() {
            return Err(Error::config("no key specified for consul lock"));
        }

        Ok(Arc::new(ConsulLock {
            id: uuid::Uuid::new_v4().to_string(),
            key: config.key,
            ttl: config.ttl_seconds.map(Duration::from_secs).unwrap_or(DEFAULT_TTL),
            wait: config
                .wait_seconds
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_WAIT),
            consul: config.consul,
            client: Mutex::new(None),
            state: Mutex::new(LockState::Disconnected),
            has_lock: AtomicBool::new(false),
            close: CancellationToken::new(),
        }))
    }

    async fn set_state(&self, next: LockState) {
        let mut state = self.state.lock().await;
        debug!(node = %self.id, from = ?*state, to = ?next, "lock state change");
        *state = next;
    }

    fn set_has_lock(&self, held: bool) {
        let previous = self.has_lock.swap(held, Ordering::SeqCst);
        if held {
            debug!(node = %self.id, "acquired lock");
        } else if previous {
            debug!(node = %self.id, "lock lost");
        } else {
            debug!(node = %self.id, "failed to acquire lock");
        }
    }

    async fn current_client(&self) -> Result<Client> {
        self.client.lock().await.clone().ok_or(Error::NotConnected)
    }

    /// Blocks until the key frees up, the wait elapses, or close fires.
    /// Returns `Err(LockClosed)` only for close.
    async fn wait_for_contender(&self, client: &Client) -> Result<()> {
        let watch = client.kv_watch(&self.key, false, 0, Duration::ZERO).await?;
        let result = tokio::select! {
            _ = self.close.cancelled() => return Err(Error::LockClosed),
            result = client.kv_watch(&self.key, false, watch.index, self.wait) => result,
        };
        result.map(|_| ())
    }

    /// Holds an acquired session: renew at ttl/2 and verify the key is
    /// still ours. Ends with `LockClosed` (deliberate) or `LockFailed`.
    async fn hold(&self, client: &Client, session: &str) -> Error {
        let interval = self.ttl / 2;

        loop {
            tokio::select! {
                _ = self.close.cancelled() => {
                    self.set_state(LockState::Releasing).await;
                    if let Err(err) = client.kv_release(&self.key, session).await {
                        warn!(node = %self.id, error = %err, "failed to release lock key");
                    }
                    if let Err(err) = client.session_destroy(session).await {
                        warn!(node = %self.id, error = %err, "failed to destroy lock session");
                    }
                    return Error::LockClosed;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = client.session_renew(session).await {
                        warn!(node = %self.id, error = %err, "failed to renew lock session");
                        return Error::LockFailed;
                    }
                    match client.kv_watch(&self.key, false, 0, Duration::ZERO).await {
                        Ok(watched) => {
                            let ours = watched
                                .value
                                .first()
                                .and_then(|pair| pair.session.as_deref())
                                == Some(session);
                            if !ours {
                                warn!(node = %self.id, "lock key no longer held by this session");
                                return Error::LockFailed;
                            }
                        }
                        Err(err) => {
                            warn!(node = %self.id, error = %err, "failed to verify lock ownership");
                            return Error::LockFailed;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Lock for ConsulLock {
    async fn connect(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        if client.is_some() {
            return Err(Error::AlreadyConnected);
        }
        debug!(node = %self.id, address = %self.consul.address, "connecting to consul lock");
        *client = Some(Client::new(self.consul.clone())?);
        self.set_state(LockState::Idle).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut client = self.client.lock().await;
        if client.is_none() {
            return Err(Error::NotConnected);
        }
        *client = None;
        self.set_state(LockState::Disconnected).await;
        Ok(())
    }

    async fn lock(&self) -> Result<()> {
        let client = self.current_client().await?;
        self.set_state(LockState::Acquiring).await;

        let session = match client
            .session_create(&format!("opa-bundle-server-{}", self.id), self.ttl)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(node = %self.id, error = %err, "failed to create lock session");
                self.set_has_lock(false);
                self.set_state(LockState::Idle).await;
                // pace the retry so a dead consul doesn't spin the loop
                tokio::select! {
                    _ = self.close.cancelled() => return Err(Error::LockClosed),
                    _ = tokio::time::sleep(self.wait) => return Err(Error::LockFailed),
                }
            }
        };

        let holder = serde_json::json!({ "holder": self.id }).to_string();

        loop {
            if self.close.is_cancelled() {
                if let Err(err) = client.session_destroy(&session).await {
                    warn!(node = %self.id, error = %err, "failed to destroy lock session");
                }
                self.set_state(LockState::Idle).await;
                return Err(Error::LockClosed);
            }

            match client.kv_acquire(&self.key, &session, holder.as_bytes()).await {
                Ok(true) => break,
                Ok(false) => {
                    debug!(node = %self.id, "lock contended, waiting");
                    match self.wait_for_contender(&client).await {
                        Ok(()) => continue,
                        Err(Error::LockClosed) => continue, // handled at loop top
                        Err(err) => {
                            warn!(node = %self.id, error = %err, "lock wait failed");
                            self.set_has_lock(false);
                            self.set_state(LockState::Idle).await;
                            return Err(Error::LockFailed);
                        }
                    }
                }
                Err(err) => {
                    warn!(node = %self.id, error = %err, "lock acquire failed");
                    self.set_has_lock(false);
                    self.set_state(LockState::Idle).await;
                    return Err(Error::LockFailed);
                }
            }
        }

        self.set_has_lock(true);
        self.set_state(LockState::Held).await;

        let reason = self.hold(&client, &session).await;
        self.set_has_lock(false);
        self.set_state(LockState::Idle).await;
        Err(reason)
    }

    async fn unlock(&self) -> Result<()> {
        debug!(node = %self.id, "closing consul lock");
        self.close.cancel();
        Ok(())
    }

    fn has_lock(&self) -> bool {
        self.has_lock.load(Ordering::SeqCst)
    }
}
