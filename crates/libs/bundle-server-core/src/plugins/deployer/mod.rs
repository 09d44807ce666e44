//! Deployer providers.

pub mod http;
