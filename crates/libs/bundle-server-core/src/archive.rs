//! Bundle archive assembly: the policy-compiler boundary.
//!
//! Stores produce either an [`Entry`] list (KV-style upstreams) or a working
//! tree on disk; both are compiled into a gzip-compressed tar that a policy
//! engine can consume. The archive must be byte-deterministic for identical
//! input so that the etag only changes when the content does: entries are
//! sorted by key, and every tar header carries a fixed mtime and mode.

use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Archive path of the bundle manifest.
pub const MANIFEST_PATH: &str = ".manifest";

/// One (key, value) pair from a KV-style upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    #[serde(with = "value_bytes")]
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Entry {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Entry values serialize as UTF-8 where possible, falling back to a byte
/// array; wire compatibility with consumers that PUT plain text values.
mod value_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(value) {
            Ok(text) => ser.serialize_str(text),
            Err(_) => ser.serialize_bytes(value),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        Ok(text.into_bytes())
    }
}

/// Bundle manifest understood by the compiler, stored at [`MANIFEST_PATH`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub roots: Vec<String>,
}

/// Collapses `.` and empty segments and strips leading/trailing slashes.
/// Rejects traversal so a hostile key cannot escape the archive root.
pub fn normalize_path(path: &str) -> Result<String> {
    let mut parts = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::store(format!("path {path} escapes the archive root")));
            }
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Packs entries into a deterministic tar.gz.
///
/// Entries are sorted by key so that insertion order never leaks into the
/// archive bytes. Duplicate keys after normalization are a store error.
pub fn archive(entries: &[Entry]) -> Result<Vec<u8>> {
    let mut files: Vec<(String, &[u8])> = Vec::with_capacity(entries.len());
    for entry in entries {
        files.push((normalize_path(&entry.key)?, entry.value.as_slice()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    for pair in files.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(Error::store(format!("duplicate archive path {}", pair[0].0)));
        }
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, value) in &files {
        let mut header = tar::Header::new_gnu();
        header.set_size(value.len() as u64);
        header.set_mode(0o777);
        header.set_mtime(0);
        header.set_entry_type(tar::EntryType::Regular);
        builder
            .append_data(&mut header, path, *value)
            .map_err(Error::Io)?;
    }

    let encoder = builder.into_inner().map_err(Error::Io)?;
    let bytes = encoder.finish().map_err(Error::Io)?;
    Ok(bytes)
}

/// Compiles an entry set into final bundle bytes.
///
/// This is where the policy compiler hooks in: the manifest is validated,
/// data documents must be well-formed JSON, and the result is the
/// deterministic archive. Any entry failure aborts the whole build; partial
/// archives are never produced.
pub fn compile(entries: &[Entry]) -> Result<Vec<u8>> {
    for entry in entries {
        let key = normalize_path(&entry.key)?;
        if key == MANIFEST_PATH {
            let manifest: Manifest = serde_json::from_slice(&entry.value)
                .map_err(|err| Error::store(format!("invalid manifest: {err}")))?;
            for root in &manifest.roots {
                normalize_path(root)?;
            }
        } else if key.ends_with(".json") {
            serde_json::from_slice::<serde_json::Value>(&entry.value)
                .map_err(|err| Error::store(format!("invalid data document {key}: {err}")))?;
        }
    }

    archive(entries)
}

/// Walks a working tree into entries and compiles it.
///
/// Hidden version-control directories are skipped; everything else is loaded
/// verbatim with its path relative to `root` as the archive key.
pub fn compile_dir(root: &Path) -> Result<Vec<u8>> {
    let entries = read_dir_entries(root)?;
    compile(&entries)
}

/// Loads a directory tree as an entry list. Symlinks are not followed.
pub fn read_dir_entries(root: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for item in walker {
        let item = item.map_err(|err| Error::store(format!("walk {}: {err}", root.display())))?;
        if !item.file_type().is_file() {
            continue;
        }

        let rel = item
            .path()
            .strip_prefix(root)
            .map_err(|err| Error::store(err.to_string()))?;
        let key = rel
            .to_str()
            .ok_or_else(|| Error::store(format!("non-utf8 path {}", rel.display())))?
            .replace(std::path::MAIN_SEPARATOR, "/");

        let value = std::fs::read(item.path())?;
        entries.push(Entry::new(key, value));
    }

    Ok(entries)
}
