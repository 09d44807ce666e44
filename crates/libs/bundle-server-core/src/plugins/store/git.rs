//! Git store: clones the source into a scratch directory and compiles the
//! checkout. Every build is a fresh shallow-ish clone; the scratch directory
//! is removed when the build finishes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use git2::build::RepoBuilder;
use serde::Deserialize;
use tracing::debug;

use crate::archive;
use crate::error::{Error, Result};
use crate::store::{Store, StoreOptions};
use crate::utils::remarshal;

pub const PROVIDER_NAME: &str = "git";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Clone URL (anything git2 understands: https, ssh, file paths).
    pub source: String,
    /// Branch to check out; the remote default branch when unset.
    #[serde(default)]
    pub branch: Option<String>,
    /// Parent directory for scratch clones; the system temp dir when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct GitStore {
    name: String,
    config: Config,
}

impl GitStore {
    pub fn factory(options: StoreOptions) -> Result<Arc<dyn Store>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("store {}: {err}", options.name)))?;
        if config.source.is_empty() {
            return Err(Error::config(format!(
                "no source specified for git store {}",
                options.name
            )));
        }
        Ok(Arc::new(GitStore {
            name: options.name,
            config,
        }))
    }
}

#[async_trait]
impl Store for GitStore {
    async fn bundle(&self) -> Result<Vec<u8>> {
        let name = self.name.clone();
        let config = self.config.clone();

        // clone + walk are blocking (git2 and fs)
        tokio::task::spawn_blocking(move || {
            let scratch = match &config.temp_dir {
                Some(parent) => {
                    std::fs::create_dir_all(parent)?;
                    tempfile::Builder::new()
                        .prefix(&format!("opabs-{name}-"))
                        .tempdir_in(parent)?
                }
                None => tempfile::Builder::new()
                    .prefix(&format!("opabs-{name}-"))
                    .tempdir()?,
            };

            let mut builder = RepoBuilder::new();
            if let Some(branch) = &config.branch {
                builder.branch(branch);
            }
            builder.clone(&config.source, scratch.path())?;
            debug!(store = %name, source = %config.source, "cloned git source");

            archive::compile_dir(scratch.path())
        })
        .await
        .map_err(|err| Error::store(format!("bundle task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use git2::{Repository, Signature};

    use super::*;

    /// Builds a local repository with one committed policy tree.
    fn seed_repo(dir: &std::path::Path) {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("data.json"), r#"{"env": "test"}"#).unwrap();
        std::fs::create_dir(dir.join("policies")).unwrap();
        std::fs::write(dir.join("policies/p.rego"), "package p\n").unwrap();

        let mut index = repo.index().unwrap();
        index
            .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("test", "test@local").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "seed", &tree, &[])
            .unwrap();
    }

    #[tokio::test]
    async fn clones_and_compiles_a_local_repo() {
        let upstream = tempfile::tempdir().unwrap();
        seed_repo(upstream.path());

        let store = GitStore::factory(StoreOptions {
            name: "git".to_string(),
            config: serde_json::json!({
                "source": upstream.path().to_str().unwrap(),
            }),
        })
        .unwrap();

        let first = store.bundle().await.unwrap();
        let second = store.bundle().await.unwrap();
        assert!(!first.is_empty());
        // fresh clones of the same commit yield identical bytes
        assert_eq!(first, second);
    }

    #[test]
    fn factory_requires_a_source() {
        let result = GitStore::factory(StoreOptions {
            name: "git".to_string(),
            config: serde_json::json!({ "source": "" }),
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
