//! Retention policy: a pure function deciding which snapshots to prune.
//!
//! Deliberately has no catalog dependency — it only reasons about
//! `SnapshotRow`s a caller already fetched, and returns ids for the caller to
//! feed into `SnapshotService::delete_snapshot` + `gc_sweep`. Grounded on
//! spec §9's note that a `RetentionService` composes multiple rules by
//! unioning their keep-sets rather than intersecting prune-sets, so a
//! snapshot kept by *any* rule survives.

use crate::catalog::SnapshotRow;
use std::collections::HashSet;

/// Retention rules to union together. Any field left `None` contributes
/// nothing to the keep-set; a policy with every field `None` keeps
/// everything (there is nothing to enforce).
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionPolicy {
    /// Always keep the `n` most recently created snapshots.
    pub keep_last: Option<usize>,
    /// Always keep snapshots created within this many milliseconds of `now`.
    pub keep_within_ms: Option<i64>,
}

/// Returns the ids of snapshots that `policy` does not require keeping,
/// given `now_ms` as the current time. `snapshots` need not be sorted.
pub fn snapshots_to_prune(snapshots: &[SnapshotRow], policy: &RetentionPolicy, now_ms: i64) -> Vec<String> {
    if policy.keep_last.is_none() && policy.keep_within_ms.is_none() {
        return Vec::new();
    }

    let mut ordered: Vec<&SnapshotRow> = snapshots.iter().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut keep: HashSet<&str> = HashSet::new();

    if let Some(n) = policy.keep_last {
        for snapshot in ordered.iter().take(n) {
            keep.insert(&snapshot.id);
        }
    }

    if let Some(window_ms) = policy.keep_within_ms {
        let cutoff = now_ms - window_ms;
        for snapshot in &ordered {
            if snapshot.created_at >= cutoff {
                keep.insert(&snapshot.id);
            }
        }
    }

    ordered
        .into_iter()
        .filter(|s| !keep.contains(s.id.as_str()))
        .map(|s| s.id.clone())
        .collect()
}
