//! Gogs webhook: verifies the HMAC-SHA256 body signature and filters on the
//! event header before scheduling a rebuild.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::plugins::publisher::http::sign;
use crate::subscriber::Callback;
use crate::utils::remarshal;
use crate::webhook::{Webhook, WebhookOptions, WebhookRequest};

pub const PROVIDER_NAME: &str = "gogs";

const SIGNATURE_HEADER: &str = "x-gogs-signature";
const EVENT_HEADER: &str = "x-gogs-event";

const KNOWN_EVENTS: &[&str] = &[
    "create",
    "delete",
    "fork",
    "issue_comment",
    "issues",
    "pull_request",
    "push",
    "release",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub secret: String,
    pub events: Vec<String>,
}

pub struct GogsWebhook {
    name: String,
    config: Config,
    callback: Callback,
}

impl GogsWebhook {
    pub fn factory(options: WebhookOptions) -> Result<Arc<dyn Webhook>> {
        let config: Config = remarshal(&options.config)
            .map_err(|err| Error::config(format!("webhook {}: {err}", options.name)))?;

        if config.events.is_empty() {
            return Err(Error::config(format!(
                "at least one event is required for webhook {}",
                options.name
            )));
        }
        for event in &config.events {
            if !KNOWN_EVENTS.contains(&event.as_str()) {
                return Err(Error::config(format!(
                    "invalid event {event} for webhook {}",
                    options.name
                )));
            }
        }

        Ok(Arc::new(GogsWebhook {
            name: options.name,
            config,
            callback: options.callback,
        }))
    }
}

impl Webhook for GogsWebhook {
    fn handle(&self, request: &WebhookRequest) -> Result<()> {
        let event = request
            .headers
            .get(EVENT_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::WebhookRejected("missing event header".to_string()))?;

        if !self.config.events.iter().any(|allowed| allowed == event) {
            return Err(Error::WebhookRejected(format!("event {event} not accepted")));
        }

        if !self.config.secret.is_empty() {
            let signature = request
                .headers
                .get(SIGNATURE_HEADER)
                .and_then(|value| value.to_str().ok())
                .ok_or_else(|| Error::WebhookRejected("missing signature".to_string()))?;

            let expected = sign(&self.config.secret, &request.body);
            if !signature.eq_ignore_ascii_case(&expected) {
                return Err(Error::WebhookRejected("invalid signature".to_string()));
            }
        }

        // payloads are JSON documents; reject garbage early
        serde_json::from_slice::<serde_json::Value>(&request.body)
            .map_err(|err| Error::WebhookRejected(format!("invalid payload: {err}")))?;

        debug!(webhook = %self.name, event = %event, "gogs webhook accepted");
        (self.callback)();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use http::HeaderMap;

    use super::*;

    const SECRET: &str = "hook-secret";
    const PAYLOAD: &[u8] = br#"{"ref": "refs/heads/main"}"#;

    fn hook(events: &[&str]) -> (Arc<dyn Webhook>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let hook = GogsWebhook::factory(WebhookOptions {
            name: "gogs".to_string(),
            config: serde_json::json!({ "secret": SECRET, "events": events }),
            callback: Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        })
        .unwrap();
        (hook, hits)
    }

    fn signed_request(event: &str, body: &'static [u8]) -> WebhookRequest {
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_HEADER, event.parse().unwrap());
        headers.insert(SIGNATURE_HEADER, sign(SECRET, body).parse().unwrap());
        WebhookRequest {
            headers,
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn accepts_signed_push_event() {
        let (hook, hits) = hook(&["push"]);
        hook.handle(&signed_request("push", PAYLOAD)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejects_unlisted_event() {
        let (hook, hits) = hook(&["push"]);
        let result = hook.handle(&signed_request("release", PAYLOAD));
        assert!(matches!(result, Err(Error::WebhookRejected(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejects_bad_signature() {
        let (hook, _) = hook(&["push"]);
        let mut request = signed_request("push", PAYLOAD);
        request.headers.insert(
            SIGNATURE_HEADER,
            sign("wrong-secret", PAYLOAD).parse().unwrap(),
        );
        assert!(matches!(
            hook.handle(&request),
            Err(Error::WebhookRejected(_))
        ));
    }

    #[test]
    fn rejects_non_json_payload() {
        let (hook, _) = hook(&["push"]);
        let mut headers = HeaderMap::new();
        headers.insert(EVENT_HEADER, "push".parse().unwrap());
        headers.insert(
            SIGNATURE_HEADER,
            sign(SECRET, b"not json").parse().unwrap(),
        );
        let request = WebhookRequest {
            headers,
            body: Bytes::from_static(b"not json"),
        };
        assert!(matches!(
            hook.handle(&request),
            Err(Error::WebhookRejected(_))
        ));
    }

    #[test]
    fn factory_validates_events() {
        let result = GogsWebhook::factory(WebhookOptions {
            name: "gogs".to_string(),
            config: serde_json::json!({ "events": ["push", "merge"] }),
            callback: Arc::new(|| {}),
        });
        assert!(matches!(result, Err(Error::Config(_))));

        let result = GogsWebhook::factory(WebhookOptions {
            name: "gogs".to_string(),
            config: serde_json::json!({ "events": [] }),
            callback: Arc::new(|| {}),
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
