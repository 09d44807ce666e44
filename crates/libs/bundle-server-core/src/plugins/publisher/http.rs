//! HTTP publisher: POSTs the payload to a configured URL, optionally
//! signing the body with HMAC-SHA256 in an `X-Signature` header.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::error::{Error, Result};
use crate::publisher::{Publisher, PublisherOptions};
use crate::utils::remarshal;

pub const PROVIDER_NAME: &str = "http";

const SIGNATURE_HEADER: &str = "X-Signature";

fn default_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub url: String,
    /// Optional shared secret; when set, the body is signed.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

pub struct HttpPublisher {
    name: String,
    config: Config,
    client: reqwest::Client,
}

impl HttpPublisher {
    pub fn factory(options: PublisherOptions) -> Result<Arc<dyn Publisher>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("publisher {}: {err}", options.name)))?;
        if config.url.is_empty() {
            return Err(Error::config(format!(
                "no url specified for http publisher {}",
                options.name
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Arc::new(HttpPublisher {
            name: options.name,
            config,
            client,
        }))
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        debug!(publisher = %self.name, url = %self.config.url, "posting publish payload");

        let mut request = self
            .client
            .post(&self.config.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.config.secret {
            request = request.header(SIGNATURE_HEADER, sign(secret, &payload));
        }

        request.body(payload).send().await?.error_for_status()?;
        Ok(())
    }
}
