//! Per-bundle state: data, etag, the single-flight build queue, the polling
//! loop, and publish fan-out.
//!
//! Concurrency contract:
//!
//! - At most one build runs per bundle at any time; while one runs, at most
//!   one further rebuild request is pending, and any extra requests collapse
//!   onto it. The one-slot [`BuildSlot`] state machine encodes this bound.
//! - `data`/`etag` swap under a short-lived mutex; the store fetch happens
//!   outside it, so readers only ever wait for the swap itself.
//! - A publish fires iff the etag changed across a build and the bundle had
//!   been built before (no publish on the first-ever build).

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff;
use crate::config::BundleConfig;
use crate::deployer::Deployer;
use crate::digest;
use crate::error::{Error, Result};
use crate::lock::Lock;
use crate::publisher::Publisher;
use crate::store::Store;

/// Build queue of depth one, as a tagged state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildSlot {
    Idle,
    Building,
    BuildingPending,
}

#[derive(Debug, Default)]
struct BundleState {
    data: Vec<u8>,
    etag: String,
}

/// A named bundle bound to one store and any number of publishers and
/// deployers. Shared behind an [`Arc`]; all methods take `&self`.
pub struct Bundle {
    name: String,
    config: BundleConfig,
    store: Arc<dyn Store>,
    publishers: Vec<(String, Arc<dyn Publisher>)>,
    deployers: Vec<(String, Arc<dyn Deployer>)>,
    leader: Option<Arc<dyn Lock>>,
    state: Mutex<BundleState>,
    build_slot: Mutex<BuildSlot>,
    activation: Mutex<Option<CancellationToken>>,
}

impl Bundle {
    pub fn new(
        name: impl Into<String>,
        config: BundleConfig,
        store: Arc<dyn Store>,
        publishers: Vec<(String, Arc<dyn Publisher>)>,
        deployers: Vec<(String, Arc<dyn Deployer>)>,
        leader: Option<Arc<dyn Lock>>,
    ) -> Self {
        Bundle {
            name: name.into(),
            config,
            store,
            publishers,
            deployers,
            leader,
            state: Mutex::new(BundleState::default()),
            build_slot: Mutex::new(BuildSlot::Idle),
            activation: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Current bundle bytes. Empty before the first successful build.
    pub async fn data(&self) -> Vec<u8> {
        self.state.lock().await.data.clone()
    }

    /// Current etag. Empty iff `data` is empty.
    pub async fn etag(&self) -> String {
        self.state.lock().await.etag.clone()
    }

    /// Consistent `(data, etag)` snapshot under one lock acquisition.
    pub async fn snapshot(&self) -> (Vec<u8>, String) {
        let state = self.state.lock().await;
        (state.data.clone(), state.etag.clone())
    }

    /// Requests a rebuild.
    ///
    /// - No build running: builds now and returns that build's result; on
    ///   completion, drains at most one pending follow-up request per round
    ///   until the slot is quiet (follow-up failures are logged, not
    ///   returned; those requests were collapsed).
    /// - Build running, slot free: parks one pending request and returns.
    /// - Build running, slot taken: coalesces into the parked request.
    pub async fn rebuild(&self) -> Result<()> {
        {
            let mut slot = self.build_slot.lock().await;
            match *slot {
                BuildSlot::Idle => *slot = BuildSlot::Building,
                BuildSlot::Building => {
                    debug!(bundle = %self.name, "build in progress, parking rebuild request");
                    *slot = BuildSlot::BuildingPending;
                    return Ok(());
                }
                BuildSlot::BuildingPending => {
                    debug!(bundle = %self.name, "rebuild already pending, coalescing");
                    return Ok(());
                }
            }
        }

        let first = self.build().await;

        loop {
            let run_again = {
                let mut slot = self.build_slot.lock().await;
                match *slot {
                    BuildSlot::BuildingPending => {
                        *slot = BuildSlot::Building;
                        true
                    }
                    _ => {
                        *slot = BuildSlot::Idle;
                        false
                    }
                }
            };
            if !run_again {
                break;
            }

            debug!(bundle = %self.name, "running coalesced follow-up build");
            if let Err(err) = self.build().await {
                warn!(bundle = %self.name, error = %err, "coalesced rebuild failed");
            }
        }

        first
    }

    /// One build: fetch, swap, fan out. Store errors leave `data`/`etag`
    /// untouched.
    async fn build(&self) -> Result<()> {
        let prev_etag = self.state.lock().await.etag.clone();

        let data = match self.store.bundle().await {
            Ok(data) => data,
            Err(err) => {
                counter!("bundle_build_failures_total", "bundle" => self.name.clone())
                    .increment(1);
                return Err(err);
            }
        };
        let etag = digest::etag(&data);

        {
            let mut state = self.state.lock().await;
            state.data = data;
            state.etag = etag.clone();
        }

        counter!("bundle_builds_total", "bundle" => self.name.clone()).increment(1);
        debug!(bundle = %self.name, etag = %etag, "bundle built");

        if etag != prev_etag && !prev_etag.is_empty() {
            self.deploy(&etag).await;
            self.publish(&etag);
        }

        Ok(())
    }

    /// Runs every deployer in order, but only while this process is leader.
    /// Deploy failures never abort the build.
    async fn deploy(&self, etag: &str) {
        if self.deployers.is_empty() {
            return;
        }
        if let Some(lock) = &self.leader
            && !lock.has_lock()
        {
            debug!(bundle = %self.name, "not the leader, skipping deployers");
            return;
        }

        for (name, deployer) in &self.deployers {
            debug!(bundle = %self.name, deployer = %name, etag = %etag, "deploying bundle");
            if let Err(err) = deployer.deploy().await {
                error!(bundle = %self.name, deployer = %name, error = %err, "deploy failed");
            } else {
                counter!("bundle_deploys_total", "bundle" => self.name.clone()).increment(1);
            }
        }
    }

    /// Fans the new etag out to every publisher, one detached task each.
    fn publish(&self, etag: &str) {
        let payload = serde_json::json!({ "etag": etag }).to_string().into_bytes();

        for (name, publisher) in &self.publishers {
            let publisher = Arc::clone(publisher);
            let payload = payload.clone();
            let publisher_name = name.clone();
            let bundle_name = self.name.clone();

            tokio::spawn(async move {
                if let Err(err) = publisher.publish(payload).await {
                    error!(
                        bundle = %bundle_name,
                        publisher = %publisher_name,
                        error = %err,
                        "publish failed"
                    );
                } else {
                    counter!("bundle_publishes_total", "bundle" => bundle_name.clone())
                        .increment(1);
                }
            });
        }
    }

    /// Starts the polling loop. Errors if the bundle is already active.
    pub async fn activate(self: &Arc<Self>) -> Result<()> {
        let mut activation = self.activation.lock().await;
        if activation.is_some() {
            return Err(Error::AlreadyActive(self.name.clone()));
        }

        let cancel = CancellationToken::new();
        *activation = Some(cancel.clone());

        let bundle = Arc::clone(self);
        tokio::spawn(async move {
            bundle.poll_loop(cancel).await;
        });

        info!(bundle = %self.name, "bundle activated");
        Ok(())
    }

    /// Stops the polling loop; `data`/`etag` stay readable. Errors if the
    /// bundle is not active.
    pub async fn deactivate(&self) -> Result<()> {
        let mut activation = self.activation.lock().await;
        match activation.take() {
            Some(cancel) => {
                cancel.cancel();
                info!(bundle = %self.name, "bundle deactivated");
                Ok(())
            }
            None => Err(Error::NotActive(self.name.clone())),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.activation.lock().await.is_some()
    }

    /// The per-bundle polling loop: initial build, then jittered rebuilds,
    /// with exponential backoff while the store is failing. Cancellation is
    /// the sole termination signal (besides `polling.disable`).
    async fn poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        let polling = self.config.polling.clone();
        let min_delay = Duration::from_secs(polling.min_delay_seconds);
        let max_delay = Duration::from_secs(polling.max_delay_seconds);
        let mut retry: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let delay = match self.rebuild().await {
                Ok(()) => {
                    if polling.disable {
                        debug!(bundle = %self.name, "polling disabled, loop exiting");
                        // the loop owns the ACTIVE state; leaving it makes
                        // the bundle inactive while staying readable
                        self.activation.lock().await.take();
                        return;
                    }
                    retry = 0;
                    backoff::jittered(min_delay, max_delay)
                }
                Err(err) => {
                    error!(bundle = %self.name, error = %err, "bundle build failed");
                    let delay = backoff::exponential(backoff::MIN_RETRY_DELAY, max_delay, retry);
                    retry = retry.saturating_add(1);
                    delay
                }
            };

            debug!(bundle = %self.name, delay_ms = delay.as_millis() as u64, "next poll scheduled");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(bundle = %self.name, "polling loop stopped");
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
