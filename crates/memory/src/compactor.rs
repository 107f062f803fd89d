use crate::types::*;
use std::cmp::Ordering;

/// Retention order: higher importance first, then newer first.
pub fn rank(a: &MemoryEntry, b: &MemoryEntry) -> Ordering {
    b.importance()
        .total_cmp(&a.importance())
        .then_with(|| b.timestamp().cmp(&a.timestamp()))
        .then_with(|| b.sequence().cmp(&a.sequence()))
}

/// Keep the top `capacity` entries by [`rank`].
///
/// A store already within capacity is returned untouched, so pruning twice is
/// the same as pruning once.
pub fn prune(mut entries: Vec<MemoryEntry>, capacity: usize) -> Vec<MemoryEntry> {
    if entries.len() <= capacity {
        return entries;
    }

    let original_len = entries.len();
    entries.sort_by(rank);
    entries.truncate(capacity);

    tracing::debug!(
        "Pruned short-term memory: {} -> {}",
        original_len,
        entries.len()
    );
    entries
}
