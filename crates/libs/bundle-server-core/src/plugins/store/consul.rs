//! Consul KV store: lists a key prefix and compiles the pairs into a
//! bundle, with each key (minus the prefix) as the archive path.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::archive::{self, Entry};
use crate::consul::{Client, ConsulConfig};
use crate::error::{Error, Result};
use crate::store::{Store, StoreOptions};
use crate::utils::remarshal;

pub const PROVIDER_NAME: &str = "consul";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// KV prefix to list; defaults to `bundles/<store name>`.
    #[serde(default)]
    pub prefix: String,
    pub consul: ConsulConfig,
}

pub struct ConsulStore {
    name: String,
    prefix: String,
    client: Client,
}

impl ConsulStore {
    pub fn factory(options: StoreOptions) -> Result<Arc<dyn Store>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("store {}: {err}", options.name)))?;

        let prefix = if config.prefix.is_empty() {
            format!("bundles/{}", options.name)
        } else {
            config.prefix.trim_matches('/').to_string()
        };

        Ok(Arc::new(ConsulStore {
            client: Client::new(config.consul)?,
            name: options.name,
            prefix,
        }))
    }
}

#[async_trait]
impl Store for ConsulStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        debug!(store = %self.name, prefix = %self.prefix, "listing consul prefix");
        let pairs = self.client.kv_list(&self.prefix).await?;

        let mut entries = Vec::with_capacity(pairs.len());
        for pair in pairs {
            // directory placeholder keys carry no value
            if pair.key.ends_with('/') {
                continue;
            }
            let key = pair
                .key
                .trim_start_matches('/')
                .strip_prefix(&self.prefix)
                .unwrap_or(&pair.key)
                .trim_start_matches('/')
                .to_string();
            let value = pair.value()?;
            entries.push(Entry::new(key, value));
        }

        archive::compile(&entries)
    }
}
