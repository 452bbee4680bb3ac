//! Content fingerprints: the deterministic identity of a cacheable transform request.
//!
//! Fields are length-prefixed before hashing, so `("ab", "c")` and `("a", "bc")`
//! never produce the same input to the digest.

use sha2::{Digest, Sha256};

use crate::models::enhancement::{OperationClass, TransformMode};

/// Length of every fingerprint (hex-encoded SHA-256).
pub const FINGERPRINT_LEN: usize = 64;

pub fn fingerprint(class: OperationClass, payload: &str, mode: TransformMode) -> String {
    let mut hasher = Sha256::new();
    for field in [class.as_str(), payload, mode.as_str()] {
        hasher.update(field.len().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(field.as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}
