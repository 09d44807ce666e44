//! Decoding helpers shared by the config loader and every adapter.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Decodes a document that may be JSON or YAML.
///
/// JSON is detected by a leading `{` (after trimming), matching the config
/// file contract; everything else goes through the YAML parser, which also
/// accepts JSON fragments that don't start with an object.
pub fn unmarshal<T: DeserializeOwned>(content: &[u8]) -> Result<T> {
    let trimmed = content.trim_ascii();

    if trimmed.starts_with(b"{") && trimmed.ends_with(b"}") {
        return Ok(serde_json::from_slice(trimmed)?);
    }

    Ok(serde_yaml::from_slice(trimmed)?)
}

/// Maps one shape onto another through a JSON round trip.
///
/// This is the erasure boundary for opaque adapter config: the registry hands
/// each factory a `serde_json::Value` and the adapter re-decodes it into its
/// typed config here, turning shape mismatches into configuration errors.
pub fn remarshal<S: Serialize, T: DeserializeOwned>(input: &S) -> Result<T> {
    let value = serde_json::to_value(input)?;
    serde_json::from_value(value).map_err(|err| Error::config(err.to_string()))
}
