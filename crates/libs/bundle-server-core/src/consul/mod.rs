//! Minimal Consul HTTP API client used by the consul-backed adapters.

mod client;

pub use client::{Client, ConsulConfig, KvPair, Watched};
