//! Promotion rule and similarity linking used by consolidation passes.

use chrono::{DateTime, Utc};

use memtier_core::similarity::jaccard_similarity;
use memtier_core::{MemoryMetadata, Tier};

use crate::config::ConsolidationRule;

/// Access count at which the access term of the consolidation score saturates
const ACCESS_SATURATION: f64 = 10.0;

/// Whether an entry is a consolidation candidate
pub fn is_candidate(meta: &MemoryMetadata, rule: &ConsolidationRule) -> bool {
    meta.importance >= rule.min_importance && meta.access_count >= rule.min_access_count
}

/// Tier a candidate should be promoted to, if any.
///
/// Only working and episodic entries old enough are promoted, one tier at a
/// time; semantic and procedural are terminal.
pub fn promotion_target(meta: &MemoryMetadata, now: DateTime<Utc>, rule: &ConsolidationRule) -> Option<Tier> {
    if !is_candidate(meta, rule) || meta.age_days(now) < rule.age_threshold_days {
        return None;
    }

    let ready = match meta.tier {
        Tier::Working => meta.importance >= rule.working_promotion_importance,
        Tier::Episodic => meta.access_count >= rule.episodic_promotion_access_count,
        Tier::Semantic | Tier::Procedural => false,
    };

    ready.then(|| meta.tier.promotion_target()).flatten()
}

/// Score recorded on every entry of a consolidated tier
pub fn consolidation_score(meta: &MemoryMetadata, now: DateTime<Utc>, rule: &ConsolidationRule) -> f64 {
    let access = (meta.access_count as f64 / ACCESS_SATURATION).min(1.0);
    let age = if rule.age_threshold_days > 0 {
        (meta.age_days(now) as f64 / rule.age_threshold_days as f64).min(1.0)
    } else {
        1.0
    };
    0.5 * meta.importance + 0.3 * access + 0.2 * age
}

/// Pairs of documents whose word sets overlap by at least `threshold`.
///
/// Each pair is reported once, lower id first.
pub fn similar_pairs(docs: &[(String, String)], threshold: f64) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (i, (id_a, content_a)) in docs.iter().enumerate() {
        for (id_b, content_b) in &docs[i + 1..] {
            if jaccard_similarity(content_a, content_b) >= threshold {
                let pair = if id_a <= id_b {
                    (id_a.clone(), id_b.clone())
                } else {
                    (id_b.clone(), id_a.clone())
                };
                pairs.push(pair);
            }
        }
    }
    pairs.sort();
    pairs
}
