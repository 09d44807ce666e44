//! Adapter provider registry.
//!
//! An explicit value passed into the service constructor, instead of
//! process-global provider maps: tests register mocks on a fresh registry
//! without touching shared state. Each adapter kind exposes a typed factory
//! taking its `Options`; the opaque config inside is re-decoded by the
//! adapter itself (see [`crate::utils::remarshal`]).

use std::collections::HashMap;
use std::sync::Arc;

use crate::deployer::{Deployer, DeployerOptions};
use crate::error::{Error, Result};
use crate::lock::{Lock, LockOptions};
use crate::plugins;
use crate::publisher::{Publisher, PublisherOptions};
use crate::store::{Store, StoreOptions};
use crate::subscriber::{Subscriber, SubscriberOptions};
use crate::webhook::{Webhook, WebhookOptions};

pub type StoreFactory = Arc<dyn Fn(StoreOptions) -> Result<Arc<dyn Store>> + Send + Sync>;
pub type PublisherFactory =
    Arc<dyn Fn(PublisherOptions) -> Result<Arc<dyn Publisher>> + Send + Sync>;
pub type SubscriberFactory =
    Arc<dyn Fn(SubscriberOptions) -> Result<Arc<dyn Subscriber>> + Send + Sync>;
pub type WebhookFactory = Arc<dyn Fn(WebhookOptions) -> Result<Arc<dyn Webhook>> + Send + Sync>;
pub type DeployerFactory = Arc<dyn Fn(DeployerOptions) -> Result<Arc<dyn Deployer>> + Send + Sync>;
pub type LockFactory = Arc<dyn Fn(LockOptions) -> Result<Arc<dyn Lock>> + Send + Sync>;

/// Provider-type → factory maps for every adapter kind.
#[derive(Default, Clone)]
pub struct Registry {
    stores: HashMap<String, StoreFactory>,
    publishers: HashMap<String, PublisherFactory>,
    subscribers: HashMap<String, SubscriberFactory>,
    webhooks: HashMap<String, WebhookFactory>,
    deployers: HashMap<String, DeployerFactory>,
    locks: HashMap<String, LockFactory>,
}

impl Registry {
    /// An empty registry. Useful for tests that only register mocks.
    pub fn new() -> Self {
        Registry::default()
    }

    /// A registry with every built-in provider registered.
    pub fn with_defaults() -> Self {
        let mut registry = Registry::new();
        plugins::register_defaults(&mut registry);
        registry
    }

    pub fn register_store(
        &mut self,
        provider: impl Into<String>,
        factory: StoreFactory,
    ) -> &mut Self {
        self.stores.insert(provider.into(), factory);
        self
    }

    pub fn register_publisher(
        &mut self,
        provider: impl Into<String>,
        factory: PublisherFactory,
    ) -> &mut Self {
        self.publishers.insert(provider.into(), factory);
        self
    }

    pub fn register_subscriber(
        &mut self,
        provider: impl Into<String>,
        factory: SubscriberFactory,
    ) -> &mut Self {
        self.subscribers.insert(provider.into(), factory);
        self
    }

    pub fn register_webhook(
        &mut self,
        provider: impl Into<String>,
        factory: WebhookFactory,
    ) -> &mut Self {
        self.webhooks.insert(provider.into(), factory);
        self
    }

    pub fn register_deployer(
        &mut self,
        provider: impl Into<String>,
        factory: DeployerFactory,
    ) -> &mut Self {
        self.deployers.insert(provider.into(), factory);
        self
    }

    pub fn register_lock(
        &mut self,
        provider: impl Into<String>,
        factory: LockFactory,
    ) -> &mut Self {
        self.locks.insert(provider.into(), factory);
        self
    }

    pub fn store(&self, provider: &str, options: StoreOptions) -> Result<Arc<dyn Store>> {
        let factory = self.stores.get(provider).ok_or_else(|| Error::UnknownProvider {
            kind: "store",
            provider: provider.to_string(),
        })?;
        factory(options)
    }

    pub fn publisher(
        &self,
        provider: &str,
        options: PublisherOptions,
    ) -> Result<Arc<dyn Publisher>> {
        let factory = self
            .publishers
            .get(provider)
            .ok_or_else(|| Error::UnknownProvider {
                kind: "publisher",
                provider: provider.to_string(),
            })?;
        factory(options)
    }

    pub fn subscriber(
        &self,
        provider: &str,
        options: SubscriberOptions,
    ) -> Result<Arc<dyn Subscriber>> {
        let factory = self
            .subscribers
            .get(provider)
            .ok_or_else(|| Error::UnknownProvider {
                kind: "subscriber",
                provider: provider.to_string(),
            })?;
        factory(options)
    }

    pub fn webhook(&self, provider: &str, options: WebhookOptions) -> Result<Arc<dyn Webhook>> {
        let factory = self
            .webhooks
            .get(provider)
            .ok_or_else(|| Error::UnknownProvider {
                kind: "webhook",
                provider: provider.to_string(),
            })?;
        factory(options)
    }

    pub fn deployer(&self, provider: &str, options: DeployerOptions) -> Result<Arc<dyn Deployer>> {
        let factory = self
            .deployers
            .get(provider)
            .ok_or_else(|| Error::UnknownProvider {
                kind: "deployer",
                provider: provider.to_string(),
            })?;
        factory(options)
    }

    pub fn lock(&self, provider: &str, options: LockOptions) -> Result<Arc<dyn Lock>> {
        let factory = self.locks.get(provider).ok_or_else(|| Error::UnknownProvider {
            kind: "lock",
            provider: provider.to_string(),
        })?;
        factory(options)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("publishers", &self.publishers.keys().collect::<Vec<_>>())
            .field("subscribers", &self.subscribers.keys().collect::<Vec<_>>())
            .field("webhooks", &self.webhooks.keys().collect::<Vec<_>>())
            .field("deployers", &self.deployers.keys().collect::<Vec<_>>())
            .field("locks", &self.locks.keys().collect::<Vec<_>>())
            .finish()
    }
}
