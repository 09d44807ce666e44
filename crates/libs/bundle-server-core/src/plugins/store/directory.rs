//! Directory store: compiles a local working tree into a bundle.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::archive;
use crate::error::{Error, Result};
use crate::store::{Store, StoreOptions};
use crate::utils::remarshal;

pub const PROVIDER_NAME: &str = "directory";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub directory: PathBuf,
}

#[derive(Debug)]
pub struct DirectoryStore {
    name: String,
    config: Config,
}

impl DirectoryStore {
    pub fn factory(options: StoreOptions) -> Result<Arc<dyn Store>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("store {}: {err}", options.name)))?;
        Ok(Arc::new(DirectoryStore {
            name: options.name,
            config,
        }))
    }
}

#[async_trait]
impl Store for DirectoryStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        let directory = self.config.directory.clone();
        debug!(store = %self.name, directory = %directory.display(), "compiling directory bundle");

        // filesystem walk is blocking work
        tokio::task::spawn_blocking(move || archive::compile_dir(&directory))
            .await
            .map_err(|err| Error::store(format!("bundle task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn store_for(dir: &std::path::Path) -> Arc<dyn Store> {
        DirectoryStore::factory(StoreOptions {
            name: "dir".to_string(),
            config: serde_json::json!({ "directory": dir }),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn bundles_a_working_tree_deterministically() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.json"), r#"{"k": "v"}"#).unwrap();
        std::fs::create_dir(dir.path().join("policies")).unwrap();
        std::fs::write(dir.path().join("policies/p.rego"), "package p\n").unwrap();

        let store = store_for(dir.path());
        let first = store.bundle().await.unwrap();
        let second = store.bundle().await.unwrap();

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let store = store_for(std::path::Path::new("/nonexistent/policies"));
        assert!(store.bundle().await.is_err());
    }

    #[test]
    fn factory_rejects_bad_config() {
        let result = DirectoryStore::factory(StoreOptions {
            name: "dir".to_string(),
            config: serde_json::json!({ "directory": 42 }),
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
