//! Memory System Types
//!
//! Inputs and reports for the hierarchical memory operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use memtier_core::{DocumentMetadata, ImportanceBand, MemoryMetadata, MemoryStatistics, Tier};

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Default importance for new memories
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Default source type for new memories
pub const DEFAULT_SOURCE_TYPE: &str = "agent";

/// Input for storing a memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMemoryInput {
    pub content: String,
    pub tier: Tier,
    pub importance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub source_type: String,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    /// Caller metadata stored with the content in the similarity index
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

impl StoreMemoryInput {
    /// Create input with default importance and source
    pub fn new(content: impl Into<String>, tier: Tier) -> Self {
        Self {
            content: content.into(),
            tier,
            importance: DEFAULT_IMPORTANCE,
            tags: Vec::new(),
            keywords: Vec::new(),
            source_type: DEFAULT_SOURCE_TYPE.to_string(),
            parent_ids: Vec::new(),
            metadata: DocumentMetadata::new(),
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source_type: impl Into<String>) -> Self {
        self.source_type = source_type.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_ids.push(parent_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Author of a captured conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }

    /// Importance assigned to captured messages from this role
    pub fn importance(&self) -> f64 {
        match self {
            Self::User => 0.7,
            Self::Agent => 0.5,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieve
// ─────────────────────────────────────────────────────────────────────────────

/// Query for retrieving memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveQuery {
    pub query: String,
    /// Tier to search (None = all tiers)
    #[serde(default)]
    pub tier: Option<Tier>,
    /// Maximum results (None = configured default)
    #[serde(default)]
    pub limit: Option<usize>,
    /// Minimum importance (None = configured default)
    #[serde(default)]
    pub importance_threshold: Option<f64>,
    /// Inclusive range on `created_at`
    #[serde(default)]
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Match memories carrying any of these tags (empty = no filter)
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RetrieveQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tier: None,
            limit: None,
            importance_threshold: None,
            time_range: None,
            tags: Vec::new(),
        }
    }

    pub fn in_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_importance_threshold(mut self, threshold: f64) -> Self {
        self.importance_threshold = Some(threshold);
        self
    }

    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some((start, end));
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// A retrieved memory with its composite score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryResult {
    pub content: String,
    /// Composite score (similarity, importance, recency)
    pub score: f64,
    /// Raw similarity reported by the index
    pub similarity: f64,
    /// Metadata snapshot taken after the access was recorded
    pub metadata: MemoryMetadata,
    /// Document metadata stored with the content
    pub document: DocumentMetadata,
}

// ─────────────────────────────────────────────────────────────────────────────
// Consolidation & pruning
// ─────────────────────────────────────────────────────────────────────────────

/// A tier promotion applied during consolidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: String,
    pub from: Tier,
    pub to: Tier,
    pub score: f64,
}

/// Result of one consolidation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationResult {
    pub tier: Option<Tier>,
    /// Entries meeting the candidate rule
    pub candidates: usize,
    pub promoted: Vec<Promotion>,
    /// Pairs linked as related
    pub linked: Vec<(String, String)>,
    /// Promotions aborted because content could not be moved
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// An entry removed by pruning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Eviction {
    pub id: String,
    pub tier: Tier,
    /// Retention score for capacity evictions, idle days for expiry
    pub score: f64,
}

/// Result of a capacity or TTL pruning pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub evicted: Vec<Eviction>,
    /// Live entries per tier after the pass
    pub remaining: BTreeMap<Tier, usize>,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// Result of orphan reconciliation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GcReport {
    /// Index content with no metadata, deleted
    pub orphaned_content: Vec<(Tier, String)>,
    /// Metadata whose content is missing, kept
    pub missing_content: Vec<(Tier, String)>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Summary
// ─────────────────────────────────────────────────────────────────────────────

/// Memories bucketed by age
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeDistribution {
    /// Created less than a day ago
    pub today: usize,
    /// 1 to 7 days
    pub this_week: usize,
    /// 8 to 30 days
    pub this_month: usize,
    pub older: usize,
}

/// Snapshot of the memory system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub total: usize,
    pub by_tier: BTreeMap<Tier, usize>,
    pub by_importance: BTreeMap<ImportanceBand, usize>,
    pub stats: MemoryStatistics,
    pub total_accesses: u64,
    pub average_accesses: f64,
    pub age_distribution: AgeDistribution,
}
