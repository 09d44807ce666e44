//! Basic webhook: authenticates the caller with a shared secret carried in
//! the `X-Webhook-Secret` header (or `Authorization: Bearer ...`).

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::subscriber::Callback;
use crate::utils::remarshal;
use crate::webhook::{Webhook, WebhookOptions, WebhookRequest};

pub const PROVIDER_NAME: &str = "basic";

const SECRET_HEADER: &str = "x-webhook-secret";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub secret: String,
}

pub struct BasicWebhook {
    name: String,
    config: Config,
    callback: Callback,
}

impl BasicWebhook {
    pub fn factory(options: WebhookOptions) -> Result<Arc<dyn Webhook>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("webhook {}: {err}", options.name)))?;
        Ok(Arc::new(BasicWebhook {
            name: options.name,
            config,
            callback: options.callback,
        }))
    }

    fn presented_secret(request: &WebhookRequest) -> Option<&str> {
        if let Some(value) = request.headers.get(SECRET_HEADER) {
            return value.to_str().ok();
        }
        request
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
    }
}

impl Webhook for BasicWebhook {
    fn handle(&self, request: &WebhookRequest) -> Result<()> {
        if !self.config.secret.is_empty() {
            let presented = BasicWebhook::presented_secret(request)
                .ok_or_else(|| Error::WebhookRejected("missing secret".to_string()))?;
            if presented != self.config.secret {
                return Err(Error::WebhookRejected("invalid secret".to_string()));
            }
        }

        debug!(webhook = %self.name, "webhook accepted");
        (self.callback)();
        Ok(())
    }
}
