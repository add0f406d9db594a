//! Content digest computation using BLAKE3.
//!
//! All payloads are hashed over their canonical serialized form. For
//! structured payloads the canonical form is `serde_json` output, whose
//! object maps are `BTreeMap`-backed and therefore emit keys in sorted
//! order. Two semantically-equal payloads that canonicalize to different
//! bytes (e.g. differing float renderings) get different digests; that is
//! an accepted limitation of content addressing, not something this module
//! papers over.

use crate::error::StoreError;
use crate::types::Digest;
use serde_json::Value;

/// Compute the digest of raw bytes.
///
/// Deterministic and pure: the same bytes always yield the same digest.
pub fn digest_bytes(data: &[u8]) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    Digest::from_bytes(*hasher.finalize().as_bytes())
}

/// Serialize a structured payload to its canonical byte form.
///
/// Canonical form is compact JSON with sorted object keys. Serialization
/// errors bubble up; there are no other failure modes.
pub fn canonical_bytes(payload: &Value) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(payload)?)
}

/// Compute the digest of a structured payload's canonical form.
pub fn digest_value(payload: &Value) -> Result<Digest, StoreError> {
    Ok(digest_bytes(&canonical_bytes(payload)?))
}
