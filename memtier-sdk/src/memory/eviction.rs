//! Capacity eviction and TTL expiry selection.
//!
//! These functions only choose what to remove; the manager applies the
//! removals to both the metadata index and the similarity index.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use memtier_core::MemoryMetadata;

use super::retrieval::recency;
use crate::config::{RetentionWeights, TierPolicy};

/// Retention score: higher means more worth keeping
pub fn retention_score(meta: &MemoryMetadata, now: DateTime<Utc>, weights: &RetentionWeights) -> f64 {
    let access = (meta.access_count as f64 / weights.access_saturation).min(1.0);
    let recency = recency(meta.age_days(now), weights.recency_horizon_days);
    weights.importance * meta.importance + weights.access * access + weights.recency * recency
}

/// Pick the entries to evict so that at most `capacity` remain.
///
/// Entries are ranked by descending retention score with ties kept in
/// ascending id order; everything past `capacity` is returned with its score.
pub fn select_evictions<'a, I>(
    entries: I,
    capacity: usize,
    now: DateTime<Utc>,
    weights: &RetentionWeights,
) -> Vec<(String, f64)>
where
    I: IntoIterator<Item = &'a MemoryMetadata>,
{
    let mut scored: Vec<(&str, f64)> = entries
        .into_iter()
        .map(|m| (m.id.as_str(), retention_score(m, now, weights)))
        .collect();

    if scored.len() <= capacity {
        return Vec::new();
    }

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    scored
        .split_off(capacity)
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect()
}

/// Whether an entry has been idle longer than its tier's TTL
pub fn is_expired(meta: &MemoryMetadata, policy: &TierPolicy, now: DateTime<Utc>) -> bool {
    policy
        .ttl()
        .is_some_and(|ttl| now - meta.last_accessed > ttl)
}
