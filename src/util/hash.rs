//! Content hashing for drift detection.
//!
//! Uses SHA256 over a canonical JSON rendering so key order in the remote
//! payload does not change the hash.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the SHA256 content hash of a source payload.
///
/// Object keys are sorted recursively before hashing.
#[must_use]
pub fn content_hash(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    write_canonical(&mut hasher, payload);
    format!("{:x}", hasher.finalize())
}

fn write_canonical(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(Value::String(key.clone()).to_string().as_bytes());
                hasher.update(b":");
                write_canonical(hasher, &map[key.as_str()]);
                hasher.update(b",");
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                write_canonical(hasher, item);
                hasher.update(b",");
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(scalar.to_string().as_bytes()),
    }
}
