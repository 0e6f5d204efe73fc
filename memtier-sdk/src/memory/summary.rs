//! Memory summary aggregation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use memtier_core::{ImportanceBand, MemoryMetadata, MemoryStatistics, Tier};

use super::types::{AgeDistribution, MemorySummary};

/// Build a summary over all entries of the metadata index
pub fn summarize<'a, I>(entries: I, stats: MemoryStatistics, now: DateTime<Utc>) -> MemorySummary
where
    I: IntoIterator<Item = &'a MemoryMetadata>,
{
    let mut by_tier: BTreeMap<Tier, usize> = Tier::ALL.iter().map(|t| (*t, 0)).collect();
    let mut by_importance: BTreeMap<ImportanceBand, usize> =
        ImportanceBand::ALL.iter().map(|b| (*b, 0)).collect();
    let mut age_distribution = AgeDistribution::default();
    let mut total = 0usize;
    let mut total_accesses = 0u64;

    for meta in entries {
        total += 1;
        total_accesses = total_accesses.saturating_add(meta.access_count);
        *by_tier.entry(meta.tier).or_default() += 1;
        *by_importance.entry(ImportanceBand::of(meta.importance)).or_default() += 1;

        match meta.age_days(now) {
            0 => age_distribution.today += 1,
            1..=7 => age_distribution.this_week += 1,
            8..=30 => age_distribution.this_month += 1,
            _ => age_distribution.older += 1,
        }
    }

    let average_accesses = if total == 0 {
        0.0
    } else {
        total_accesses as f64 / total as f64
    };

    MemorySummary {
        total,
        by_tier,
        by_importance,
        stats,
        total_accesses,
        average_accesses,
        age_distribution,
    }
}
