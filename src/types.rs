//! Core identifier types for the backup engine.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a digest in raw bytes (BLAKE3-256 output).
pub const DIGEST_BYTES: usize = 32;

/// Length of a digest in its canonical lowercase hex form.
pub const DIGEST_HEX_LEN: usize = DIGEST_BYTES * 2;

/// Node identifier within the metadata DAG. Assigned by the producing agent.
pub type NodeId = String;

/// Snapshot identifier assigned by the snapshot manager.
pub type SnapshotId = String;

/// Content digest: a 256-bit BLAKE3 hash identifying a payload's exact
/// canonical byte content.
///
/// Serialized everywhere (blob filenames, snapshot records, events) as a
/// 64-character lowercase hex string. Identical canonical bytes always
/// produce an identical digest. Hash collisions are treated as having
/// negligible probability and are not guarded against.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_BYTES]);

impl Digest {
    pub fn from_bytes(bytes: [u8; DIGEST_BYTES]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_BYTES] {
        &self.0
    }

    /// Canonical lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != DIGEST_HEX_LEN {
            return Err(DigestParseError::Length(s.len()));
        }
        let bytes = hex::decode(s).map_err(DigestParseError::Hex)?;
        let mut out = [0u8; DIGEST_BYTES];
        out.copy_from_slice(&bytes);
        Ok(Digest(out))
    }
}

/// Error parsing a digest from its hex form.
#[derive(Debug, thiserror::Error)]
pub enum DigestParseError {
    #[error("digest must be {DIGEST_HEX_LEN} hex characters, got {0}")]
    Length(usize),

    #[error("digest is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
