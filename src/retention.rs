//! Retention policy evaluator: decides which snapshots survive garbage
//! collection.
//!
//! Rules, in order: immutable snapshots survive unconditionally; the
//! newest `max_snapshots` mutable snapshots survive; of the remainder,
//! anything younger than `ttl_days` survives. A policy with
//! `preserve_history` off collapses history instead: only the newest
//! mutable snapshot survives. Everything else is deleted
//! through the snapshot manager, which re-checks immutability as a second
//! guard. Because deletion removes whole snapshots (never blobs), live
//! snapshot references can never dangle as a result of collection.

use crate::error::StoreError;
use crate::restore::RegenerationPolicy;
use crate::snapshot::SnapshotManager;
use crate::types::SnapshotId;
use chrono::{Duration, Utc};

/// Delete snapshots that fall outside the retention policy. Returns the
/// ids of the snapshots actually deleted.
pub fn garbage_collect(
    snapshots: &mut SnapshotManager,
    policy: &RegenerationPolicy,
) -> Result<Vec<SnapshotId>, StoreError> {
    // With preserve_history off, the count and age bounds do not apply:
    // only the newest mutable snapshot is kept.
    let (keep, cutoff) = if policy.preserve_history {
        (
            policy.max_snapshots,
            policy.ttl_days.map(|days| Utc::now() - Duration::days(days)),
        )
    } else {
        (1, None)
    };

    // Mutable snapshots, newest first.
    let mut mutable: Vec<_> = snapshots
        .list()
        .iter()
        .filter(|s| !s.immutable)
        .map(|s| (s.id.clone(), s.timestamp))
        .collect();
    mutable.sort_by(|a, b| b.1.cmp(&a.1));

    let mut doomed = Vec::new();
    for (rank, (id, timestamp)) in mutable.into_iter().enumerate() {
        if rank < keep {
            continue;
        }
        if let Some(cutoff) = cutoff {
            if timestamp > cutoff {
                continue;
            }
        }
        doomed.push(id);
    }

    let mut deleted = Vec::new();
    for id in doomed {
        // delete() re-checks immutability and tolerates races with
        // concurrent deletion by returning false.
        if snapshots.delete(&id)? {
            tracing::info!(id = %id, "garbage collected snapshot");
            deleted.push(id);
        }
    }

    Ok(deleted)
}
