//! In-memory KV store. Mostly useful for tests and demos: entries are
//! mutated through `set`/`del` and compiled on demand like any other
//! KV-style upstream.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::archive::{self, Entry};
use crate::error::{Error, Result};
use crate::store::{Store, StoreOptions};

pub const PROVIDER_NAME: &str = "memory";

#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(MemoryStore::default())
    }

    pub fn factory(_options: StoreOptions) -> Result<Arc<dyn Store>> {
        Ok(MemoryStore::new())
    }

    pub async fn get(&self, key: &str) -> Result<Entry> {
        let key = archive::normalize_path(key)?;
        self.data
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or(Error::EntryNotFound(key))
    }

    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let key = archive::normalize_path(key)?;
        self.data.write().await.insert(key.clone(), Entry::new(key, value));
        Ok(())
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let key = archive::normalize_path(key)?;
        self.data
            .write()
            .await
            .remove(&key)
            .map(|_| ())
            .ok_or(Error::EntryNotFound(key))
    }

    pub async fn list(&self) -> Vec<Entry> {
        self.data.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        let entries = self.list().await;
        archive::compile(&entries)
    }
}
