//! Retrieval scoring and filtering.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use memtier_core::MemoryMetadata;

use super::types::MemoryResult;
use crate::config::RetrievalConfig;

/// Linear recency decay: 1.0 when new, 0.0 at `horizon_days` and beyond
pub fn recency(age_days: i64, horizon_days: f64) -> f64 {
    (1.0 - age_days as f64 / horizon_days).max(0.0)
}

/// Composite retrieval score of one candidate
pub fn composite_score(
    similarity: f64,
    meta: &MemoryMetadata,
    now: DateTime<Utc>,
    config: &RetrievalConfig,
) -> f64 {
    let recency = recency(meta.age_days(now), config.recency_horizon_days);
    config.similarity_weight * similarity
        + config.importance_weight * meta.importance
        + config.recency_weight * recency
}

/// Filters applied to candidates after the metadata join
#[derive(Debug, Clone)]
pub struct RetrievalFilter<'a> {
    pub importance_threshold: f64,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub tags: &'a [String],
}

impl RetrievalFilter<'_> {
    pub fn matches(&self, meta: &MemoryMetadata) -> bool {
        if meta.importance < self.importance_threshold {
            return false;
        }
        if let Some((start, end)) = self.time_range {
            if meta.created_at < start || meta.created_at > end {
                return false;
            }
        }
        self.tags.is_empty() || meta.has_any_tag(self.tags)
    }
}

/// Sort by descending score (ties by ascending id) and keep `limit`
pub fn rank(results: &mut Vec<MemoryResult>, limit: usize) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.metadata.id.cmp(&b.metadata.id))
    });
    results.truncate(limit);
}
