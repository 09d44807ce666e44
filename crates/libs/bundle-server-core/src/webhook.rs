//! Webhook adapter contract.

use bytes::Bytes;
use http::HeaderMap;

use crate::error::Result;
use crate::subscriber::Callback;

/// The parts of an inbound push notification an adapter needs to validate
/// it. The HTTP layer extracts these and maps the result back to a status
/// code: `Ok` ⇒ 200, `Err` ⇒ 500 with the error text as body.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Construction options handed to a webhook factory by the registry.
#[derive(Clone)]
pub struct WebhookOptions {
    pub name: String,
    pub config: serde_json::Value,
    pub callback: Callback,
}

impl std::fmt::Debug for WebhookOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookOptions")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Parses and authenticates one inbound notification; on success the
/// adapter invokes its callback (which only schedules work) and returns.
pub trait Webhook: Send + Sync {
    fn handle(&self, request: &WebhookRequest) -> Result<()>;
}
