//! Content-addressable store (CAS).
//!
//! Maps content digests to blobs on the filesystem, one file per blob at
//! `{root}/blobs/{digest}.json`. The store is append-only: blobs are
//! written once, never overwritten, and removed only by an explicit
//! `delete`. Storing identical content twice is a no-op that returns the
//! same digest, so concurrent writers racing on the same digest are
//! redundant rather than corrupting.
//!
//! The store knows nothing about DAG nodes or snapshots; it holds digests
//! and payloads only. Referrer tracking is the retention layer's job.

use crate::error::StoreError;
use crate::hasher;
use crate::telemetry::{event_type, BackupEvent, EventSink};
use crate::types::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Blob bookkeeping recorded alongside the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub stored_at: DateTime<Utc>,
    /// Size of the canonical serialized payload in bytes.
    pub size: u64,
}

/// A stored blob: payload plus metadata. The digest is the filename and is
/// re-verified against the payload on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub payload: Value,
    pub metadata: BlobMetadata,
}

/// Filesystem-backed content store.
pub struct ContentStore {
    root: PathBuf,
    sink: Arc<dyn EventSink>,
}

impl ContentStore {
    /// Open (or create) a content store rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P, sink: Arc<dyn EventSink>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("blobs"))?;
        Ok(Self { root, sink })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store a payload, returning its digest.
    ///
    /// Idempotent: if a blob with this digest already exists, nothing is
    /// written and the existing digest is returned. Writes are atomic
    /// (temp file + rename), so a crash mid-write leaves the digest absent
    /// rather than half-present.
    pub fn store(&self, payload: &Value) -> Result<Digest, StoreError> {
        let canonical = hasher::canonical_bytes(payload)?;
        let digest = hasher::digest_bytes(&canonical);

        let blob_path = self.blob_path(&digest);
        if blob_path.exists() {
            tracing::debug!(digest = %digest, "store hit existing blob, skipping write");
            return Ok(digest);
        }

        let blob = Blob {
            payload: payload.clone(),
            metadata: BlobMetadata {
                stored_at: Utc::now(),
                size: canonical.len() as u64,
            },
        };

        let serialized = serde_json::to_vec_pretty(&blob)?;
        let temp_path = blob_path.with_extension("json.tmp");
        fs::write(&temp_path, &serialized)?;
        if let Err(e) = fs::rename(&temp_path, &blob_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        self.sink.emit(BackupEvent::now(
            event_type::CONTENT_STORED,
            "cas",
            json!({ "digest": digest, "size": blob.metadata.size }),
        ));

        Ok(digest)
    }

    /// Retrieve a payload by digest.
    ///
    /// Fails with `ContentNotFound` if the digest has no blob, and with
    /// `DigestMismatch` if the stored payload no longer hashes to its
    /// digest (on-disk corruption).
    pub fn retrieve(&self, digest: &Digest) -> Result<Value, StoreError> {
        let blob = self.read_blob(digest)?;

        self.sink.emit(BackupEvent::now(
            event_type::CONTENT_RETRIEVED,
            "cas",
            json!({ "digest": digest }),
        ));

        Ok(blob.payload)
    }

    /// Retrieve a blob including its metadata, without emitting an event.
    /// Used by diagnostics.
    pub fn retrieve_blob(&self, digest: &Digest) -> Result<Blob, StoreError> {
        self.read_blob(digest)
    }

    /// Check whether a digest has a stored blob. Pure lookup.
    pub fn exists(&self, digest: &Digest) -> bool {
        self.blob_path(digest).exists()
    }

    /// Delete a blob. Returns `false` (not an error) if absent.
    ///
    /// The store does not track referrers: the caller is responsible for
    /// ensuring no live snapshot still references this digest.
    pub fn delete(&self, digest: &Digest) -> Result<bool, StoreError> {
        let blob_path = self.blob_path(digest);
        if !blob_path.exists() {
            return Ok(false);
        }
        fs::remove_file(&blob_path)?;

        self.sink.emit(BackupEvent::now(
            event_type::CONTENT_DELETED,
            "cas",
            json!({ "digest": digest }),
        ));

        Ok(true)
    }

    /// Enumerate all stored digests.
    ///
    /// Walks the blob directory; used by garbage collection and
    /// diagnostics, not on any hot path. Files that do not parse as a
    /// digest (temp files, strays) are skipped.
    pub fn list(&self) -> Result<Vec<Digest>, StoreError> {
        let mut digests = Vec::new();
        for entry in WalkDir::new(self.root.join("blobs")).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            let name = entry.file_name().to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(digest) = stem.parse::<Digest>() {
                    digests.push(digest);
                }
            }
        }
        digests.sort();
        Ok(digests)
    }

    /// Re-hash every blob's canonical payload and report digests whose
    /// content no longer matches. An empty result means the store is clean.
    pub fn verify(&self) -> Result<Vec<Digest>, StoreError> {
        let mut corrupt = Vec::new();
        for digest in self.list()? {
            match self.read_blob(&digest) {
                Ok(_) => {}
                Err(StoreError::DigestMismatch { .. }) | Err(StoreError::Corrupt { .. }) => {
                    corrupt.push(digest);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(corrupt)
    }

    fn read_blob(&self, digest: &Digest) -> Result<Blob, StoreError> {
        let blob_path = self.blob_path(digest);
        if !blob_path.exists() {
            return Err(StoreError::ContentNotFound(*digest));
        }

        let bytes = fs::read(&blob_path)?;
        let blob: Blob = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: blob_path.clone(),
            reason: format!("blob does not parse: {}", e),
        })?;

        // Checksum-on-read: the filename digest must match the payload.
        let actual = hasher::digest_value(&blob.payload)?;
        if actual != *digest {
            return Err(StoreError::DigestMismatch {
                expected: *digest,
                actual,
            });
        }

        Ok(blob)
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("blobs").join(format!("{}.json", digest))
    }
}
