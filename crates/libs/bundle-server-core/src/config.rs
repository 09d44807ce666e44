//! Configuration model and loading.
//!
//! The config file is YAML or JSON (auto-detected by a leading `{`). Before
//! the final parse, the raw document runs through template expansion with an
//! `Env` map built from the process environment and a `Meta` map taken from
//! the document's own top-level `meta` key. Go-template spellings
//! (`{{ .Env.X }}`) are normalized to `{{ Env.X }}` so existing config files
//! keep working.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::unmarshal;

/// Default poll delay bounds, in seconds.
pub const DEFAULT_MIN_DELAY_SECONDS: u64 = 60;
pub const DEFAULT_MAX_DELAY_SECONDS: u64 = 120;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: Option<ServerConfig>,
    #[serde(default)]
    pub lock: Option<AdapterConfig>,
    #[serde(default)]
    pub stores: HashMap<String, AdapterConfig>,
    #[serde(default)]
    pub deployers: HashMap<String, AdapterConfig>,
    #[serde(default)]
    pub webhooks: HashMap<String, AdapterConfig>,
    #[serde(default)]
    pub subscribers: HashMap<String, AdapterConfig>,
    #[serde(default)]
    pub publishers: HashMap<String, AdapterConfig>,
    #[serde(default)]
    pub bundles: HashMap<String, BundleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            address: default_address(),
        }
    }
}

fn default_address() -> String {
    "0.0.0.0:8085".to_string()
}

/// One adapter entry: a registered provider type plus its opaque config,
/// passed verbatim to the provider factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(rename = "type")]
    pub provider: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Declarative binding of one bundle to its adapters, all by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleConfig {
    pub store: String,
    #[serde(default)]
    pub webhooks: Vec<String>,
    #[serde(default)]
    pub publishers: Vec<String>,
    #[serde(default)]
    pub subscribers: Vec<String>,
    #[serde(default)]
    pub deployers: Vec<String>,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default)]
    pub disable: bool,
    #[serde(default = "default_min_delay")]
    pub min_delay_seconds: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig {
            disable: false,
            min_delay_seconds: default_min_delay(),
            max_delay_seconds: default_max_delay(),
        }
    }
}

fn default_min_delay() -> u64 {
    DEFAULT_MIN_DELAY_SECONDS
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY_SECONDS
}

/// Pre-parse shape used only to pull the `meta` map out of the raw document
/// before template expansion.
#[derive(Debug, Default, Deserialize)]
struct TemplateData {
    #[serde(default)]
    meta: serde_json::Value,
}

impl Config {
    /// Parses config content: template expansion first, then the final
    /// decode. Errors are configuration errors; nothing is partially
    /// applied.
    pub fn parse(content: &[u8]) -> Result<Config> {
        let expanded = expand_templates(content)?;
        let config: Config = unmarshal(expanded.as_bytes())?;
        Ok(config)
    }
}

/// Renders the raw document with `Env` / `Meta` context.
fn expand_templates(content: &[u8]) -> Result<String> {
    let data: TemplateData = unmarshal(content)?;
    let meta = if data.meta.is_null() {
        serde_json::json!({})
    } else {
        data.meta
    };

    let env: HashMap<String, String> = std::env::vars().collect();

    let source = String::from_utf8_lossy(content);
    let source = normalize_go_template(&source);

    let mut environment = minijinja::Environment::new();
    environment.add_template("config", &source)?;
    let template = environment.get_template("config")?;
    let rendered = template.render(minijinja::context! {
        Env => env,
        Meta => meta,
    })?;

    Ok(rendered)
}

/// Rewrites Go-template variable references (`{{ .Env.X }}`) into minijinja
/// lookups (`{{ Env.X }}`). Only the leading dot directly after an opening
/// delimiter is touched.
fn normalize_go_template(source: &str) -> String {
    source
        .replace("{{ .", "{{ ")
        .replace("{{- .", "{{- ")
        .replace("{{.", "{{")
}
