//! Bundle etags.

use md5::{Digest, Md5};

/// Computes the etag for a bundle archive: lowercase hex MD5 of the bytes.
///
/// MD5 is a cache validator here, not an integrity mechanism; it matches what
/// existing bundle consumers already send in `If-None-Match`.
pub fn etag(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
