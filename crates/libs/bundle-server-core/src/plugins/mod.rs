//! Built-in adapter providers.

pub mod deployer;
pub mod lock;
pub mod publisher;
pub mod store;
pub mod subscriber;
pub mod webhook;

use std::sync::Arc;

use crate::registry::Registry;

/// Registers every built-in provider on `registry`.
pub fn register_defaults(registry: &mut Registry) {
    registry
        .register_store(
            store::directory::PROVIDER_NAME,
            Arc::new(store::directory::DirectoryStore::factory),
        )
        .register_store(store::git::PROVIDER_NAME, Arc::new(store::git::GitStore::factory))
        .register_store(
            store::memory::PROVIDER_NAME,
            Arc::new(store::memory::MemoryStore::factory),
        )
        .register_store(
            store::consul::PROVIDER_NAME,
            Arc::new(store::consul::ConsulStore::factory),
        )
        .register_publisher(
            publisher::consul::PROVIDER_NAME,
            Arc::new(publisher::consul::ConsulPublisher::factory),
        )
        .register_publisher(
            publisher::http::PROVIDER_NAME,
            Arc::new(publisher::http::HttpPublisher::factory),
        )
        .register_subscriber(
            subscriber::consul::PROVIDER_NAME,
            Arc::new(subscriber::consul::ConsulSubscriber::factory),
        )
        .register_webhook(
            webhook::basic::PROVIDER_NAME,
            Arc::new(webhook::basic::BasicWebhook::factory),
        )
        .register_webhook(
            webhook::gogs::PROVIDER_NAME,
            Arc::new(webhook::gogs::GogsWebhook::factory),
        )
        .register_deployer(
            deployer::http::PROVIDER_NAME,
            Arc::new(deployer::http::HttpDeployer::factory),
        )
        .register_lock(
            lock::consul::PROVIDER_NAME,
            Arc::new(lock::consul::ConsulLock::factory),
        );
}
