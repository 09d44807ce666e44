//! Consul publisher: fires a user event carrying the payload.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::consul::{Client, ConsulConfig};
use crate::error::{Error, Result};
use crate::publisher::{Publisher, PublisherOptions};
use crate::utils::remarshal;

pub const PROVIDER_NAME: &str = "consul";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub topic: String,
    #[serde(default)]
    pub node_filter: String,
    #[serde(default)]
    pub service_filter: String,
    #[serde(default)]
    pub tag_filter: String,
    pub consul: ConsulConfig,
}

pub struct ConsulPublisher {
    name: String,
    config: Config,
    client: Client,
}

impl ConsulPublisher {
    pub fn factory(options: PublisherOptions) -> Result<Arc<dyn Publisher>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("publisher {}: {err}", options.name)))?;
        if config.topic.is_empty() {
            return Err(Error::config(format!(
                "no topic specified for consul publisher {}",
                options.name
            )));
        }

        Ok(Arc::new(ConsulPublisher {
            client: Client::new(config.consul.clone())?,
            name: options.name,
            config,
        }))
    }
}

#[async_trait]
impl Publisher for ConsulPublisher {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        debug!(publisher = %self.name, topic = %self.config.topic, "firing consul event");
        self.client
            .event_fire(
                &self.config.topic,
                &payload,
                &self.config.node_filter,
                &self.config.service_filter,
                &self.config.tag_filter,
            )
            .await
    }
}
