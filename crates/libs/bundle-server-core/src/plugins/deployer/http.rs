//! HTTP deployer: POSTs to a trigger URL (a CI hook, a config-management
//! endpoint) when a changed bundle should be rolled out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::deployer::{Deployer, DeployerOptions};
use crate::error::{Error, Result};
use crate::utils::remarshal;

pub const PROVIDER_NAME: &str = "http";

fn default_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub url: String,
    /// Static headers to attach, e.g. an auth token.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional static JSON body.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

pub struct HttpDeployer {
    name: String,
    config: Config,
    client: reqwest::Client,
}

impl HttpDeployer {
    pub fn factory(options: DeployerOptions) -> Result<Arc<dyn Deployer>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("deployer {}: {err}", options.name)))?;
        if config.url.is_empty() {
            return Err(Error::config(format!(
                "no url specified for http deployer {}",
                options.name
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Arc::new(HttpDeployer {
            name: options.name,
            config,
            client,
        }))
    }
}

#[async_trait]
impl Deployer for HttpDeployer {
    async fn deploy(&self) -> Result<()> {
        debug!(deployer = %self.name, url = %self.config.url, "triggering deployment");

        let mut request = self.client.post(&self.config.url);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &self.config.body {
            request = request.json(body);
        }

        request.send().await?.error_for_status()?;
        Ok(())
    }
}
