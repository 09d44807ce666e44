//! Thin client over the Consul HTTP API.
//!
//! Only the endpoints the adapters actually call: KV reads with blocking
//! queries, KV acquire/release for the lock, session lifecycle, and user
//! events. Values come back base64-encoded and are decoded here.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Consul connection settings, shared by every consul adapter config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Base URL, e.g. `http://127.0.0.1:8500`.
    pub address: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub datacenter: Option<String>,
}

/// One KV pair as returned by the KV API.
#[derive(Debug, Clone, Deserialize)]
pub struct KvPair {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "Session")]
    pub session: Option<String>,
}

impl KvPair {
    /// Decoded value bytes; empty when the key holds no value.
    pub fn value(&self) -> Result<Vec<u8>> {
        match &self.value {
            None => Ok(Vec::new()),
            Some(encoded) => BASE64
                .decode(encoded)
                .map_err(|err| Error::store(format!("invalid base64 value for {}: {err}", self.key))),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "Behavior")]
    behavior: &'a str,
    #[serde(rename = "LockDelay")]
    lock_delay: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "ID")]
    id: String,
}

/// A blocking-query result: payload plus the index to pass to the next call.
#[derive(Debug)]
pub struct Watched<T> {
    pub value: T,
    pub index: u64,
}

#[derive(Debug, Clone)]
pub struct Client {
    config: ConsulConfig,
    http: reqwest::Client,
}

impl Client {
    pub fn new(config: ConsulConfig) -> Result<Self> {
        if config.address.is_empty() {
            return Err(Error::config("no consul address provided"));
        }
        let http = reqwest::Client::builder()
            // long-poll requests hold the connection for up to the wait time
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Client { config, http })
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/{}", self.config.address.trim_end_matches('/'), path);
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.config.token {
            req = req.header("X-Consul-Token", token);
        }
        if let Some(dc) = &self.config.datacenter {
            req = req.query(&[("dc", dc)]);
        }
        req
    }

    /// Lists every key under `prefix`. A missing prefix is an empty list.
    pub async fn kv_list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        let response = self
            .request(reqwest::Method::GET, &format!("kv/{prefix}"))
            .query(&[("recurse", "true")])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }

    /// Reads `key` (or a prefix) with a blocking query. Returns the pairs
    /// and the `X-Consul-Index` to block on next time. `index` 0 returns
    /// immediately.
    pub async fn kv_watch(
        &self,
        key: &str,
        recurse: bool,
        index: u64,
        wait: Duration,
    ) -> Result<Watched<Vec<KvPair>>> {
        let mut req = self
            .request(reqwest::Method::GET, &format!("kv/{key}"))
            .query(&[("index", index.to_string()), ("wait", format!("{}s", wait.as_secs()))]);
        if recurse {
            req = req.query(&[("recurse", "true")]);
        }

        let response = req.send().await?;
        let next_index = parse_consul_index(response.headers());

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Watched {
                value: Vec::new(),
                index: next_index,
            });
        }
        let response = response.error_for_status()?;
        Ok(Watched {
            value: response.json().await?,
            index: next_index,
        })
    }

    /// Attempts to take the lock key with `session`. True iff acquired.
    pub async fn kv_acquire(&self, key: &str, session: &str, value: &[u8]) -> Result<bool> {
        let response = self
            .request(reqwest::Method::PUT, &format!("kv/{key}"))
            .query(&[("acquire", session)])
            .body(value.to_vec())
            .send()
            .await?
            .error_for_status()?;
        let acquired: bool = response.json().await?;
        Ok(acquired)
    }

    /// Releases the lock key held by `session`.
    pub async fn kv_release(&self, key: &str, session: &str) -> Result<bool> {
        let response = self
            .request(reqwest::Method::PUT, &format!("kv/{key}"))
            .query(&[("release", session)])
            .send()
            .await?
            .error_for_status()?;
        let released: bool = response.json().await?;
        Ok(released)
    }

    /// Creates a session with the given TTL; the lock key is released when
    /// the session is invalidated.
    pub async fn session_create(&self, name: &str, ttl: Duration) -> Result<String> {
        let body = SessionRequest {
            name,
            ttl: format!("{}s", ttl.as_secs()),
            behavior: "release",
            lock_delay: "5s",
        };
        let response = self
            .request(reqwest::Method::PUT, "session/create")
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let session: SessionResponse = response.json().await?;
        Ok(session.id)
    }

    /// Renews a session; must happen more often than the TTL.
    pub async fn session_renew(&self, id: &str) -> Result<()> {
        self.request(reqwest::Method::PUT, &format!("session/renew/{id}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn session_destroy(&self, id: &str) -> Result<()> {
        self.request(reqwest::Method::PUT, &format!("session/destroy/{id}"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Fires a user event carrying `payload`.
    pub async fn event_fire(
        &self,
        name: &str,
        payload: &[u8],
        node_filter: &str,
        service_filter: &str,
        tag_filter: &str,
    ) -> Result<()> {
        let mut req = self
            .request(reqwest::Method::PUT, &format!("event/fire/{name}"))
            .body(payload.to_vec());
        if !node_filter.is_empty() {
            req = req.query(&[("node", node_filter)]);
        }
        if !service_filter.is_empty() {
            req = req.query(&[("service", service_filter)]);
        }
        if !tag_filter.is_empty() {
            req = req.query(&[("tag", tag_filter)]);
        }

        req.send().await?.error_for_status()?;
        Ok(())
    }

    /// Lists user events named `name` with a blocking query.
    pub async fn event_watch(
        &self,
        name: &str,
        index: u64,
        wait: Duration,
    ) -> Result<Watched<Vec<serde_json::Value>>> {
        let response = self
            .request(reqwest::Method::GET, "event/list")
            .query(&[
                ("name", name.to_string()),
                ("index", index.to_string()),
                ("wait", format!("{}s", wait.as_secs())),
            ])
            .send()
            .await?;
        let next_index = parse_consul_index(response.headers());
        let response = response.error_for_status()?;
        Ok(Watched {
            value: response.json().await?,
            index: next_index,
        })
    }
}

fn parse_consul_index(headers: &reqwest::header::HeaderMap) -> u64 {
    headers
        .get("X-Consul-Index")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}
