//! Core types shared by the memory manager and its collaborators.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Tiers
// ─────────────────────────────────────────────────────────────────────────────

/// Memory tier (working, episodic, semantic, procedural)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Immediate, volatile context
    Working,
    /// Event-based, time-bound
    Episodic,
    /// Factual, timeless
    Semantic,
    /// Skill-based, solution patterns
    Procedural,
}

impl Tier {
    /// All tiers in hierarchy order
    pub const ALL: [Tier; 4] = [Tier::Working, Tier::Episodic, Tier::Semantic, Tier::Procedural];

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
        }
    }

    /// Default number of live entries the tier may hold
    pub fn default_capacity(&self) -> usize {
        match self {
            Self::Working => 50,
            Self::Episodic => 500,
            Self::Semantic => 5000,
            Self::Procedural => 1000,
        }
    }

    /// Default time-to-live in days (0 = permanent)
    pub fn default_ttl_days(&self) -> u32 {
        match self {
            Self::Working => 1,
            Self::Episodic => 30,
            Self::Semantic | Self::Procedural => 0,
        }
    }

    /// The tier an automatic promotion moves to, if any.
    ///
    /// Semantic and procedural memory are terminal.
    pub fn promotion_target(&self) -> Option<Tier> {
        match self {
            Self::Working => Some(Self::Episodic),
            Self::Episodic => Some(Self::Semantic),
            Self::Semantic | Self::Procedural => None,
        }
    }

    /// Whether an automatic promotion from `self` to `target` is allowed
    pub fn can_promote_to(&self, target: Tier) -> bool {
        self.promotion_target() == Some(target)
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "working" => Ok(Self::Working),
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            _ => Err(Error::UnknownTier(s.to_string())),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Importance
// ─────────────────────────────────────────────────────────────────────────────

/// Named importance levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryImportance {
    /// Must retain
    Critical,
    /// Very important
    High,
    /// Moderately important
    Medium,
    /// Nice to have
    Low,
    /// Can be discarded
    Trivial,
}

impl MemoryImportance {
    /// Numeric importance for this level
    pub fn value(&self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.8,
            Self::Medium => 0.5,
            Self::Low => 0.3,
            Self::Trivial => 0.1,
        }
    }
}

impl From<MemoryImportance> for f64 {
    fn from(level: MemoryImportance) -> Self {
        level.value()
    }
}

/// Importance band used by the memory summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceBand {
    /// [0.9, 1.0]
    Critical,
    /// [0.7, 0.9)
    High,
    /// [0.4, 0.7)
    Medium,
    /// [0.0, 0.4)
    Low,
}

impl ImportanceBand {
    /// All bands, highest first
    pub const ALL: [ImportanceBand; 4] = [
        ImportanceBand::Critical,
        ImportanceBand::High,
        ImportanceBand::Medium,
        ImportanceBand::Low,
    ];

    /// Band containing `importance`
    pub fn of(importance: f64) -> Self {
        if importance >= 0.9 {
            Self::Critical
        } else if importance >= 0.7 {
            Self::High
        } else if importance >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for ImportanceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata tracked for every memory, keyed by id in the metadata index.
///
/// `parent_ids`, `child_ids` and `related_ids` are weak references: the ids
/// they name may have been evicted and must only ever be looked up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    /// Filled from the map key when loading legacy index files
    #[serde(default)]
    pub id: String,
    pub tier: Tier,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub related_ids: Vec<String>,
    #[serde(default)]
    pub context_id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub consolidation_score: f64,
    /// Kept for schema compatibility; similarity lives in the index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_vector: Option<Vec<f32>>,
}

impl MemoryMetadata {
    /// Create metadata for a memory created at `now`
    pub fn new(id: impl Into<String>, tier: Tier, importance: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            tier,
            importance,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            tags: BTreeSet::new(),
            keywords: Vec::new(),
            parent_ids: Vec::new(),
            child_ids: Vec::new(),
            related_ids: Vec::new(),
            context_id: String::new(),
            agent_name: String::new(),
            source_type: String::new(),
            consolidation_score: 0.0,
            embedding_vector: None,
        }
    }

    /// Whole days elapsed since creation (never negative)
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }

    /// Whole days elapsed since the last access (never negative)
    pub fn idle_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_accessed).num_days().max(0)
    }

    /// Record an access at `now`.
    ///
    /// `last_accessed` never moves before `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed = now.max(self.created_at);
    }

    /// Whether any of `tags` is present on this memory
    pub fn has_any_tag<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|t| self.tags.contains(t.as_ref()))
    }

    /// All linked ids (parents, children, related) in that order
    pub fn linked_ids(&self) -> impl Iterator<Item = &String> {
        self.related_ids
            .iter()
            .chain(self.parent_ids.iter())
            .chain(self.child_ids.iter())
    }
}

/// Content record as held by the similarity index for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub tier: Tier,
    pub content: String,
    pub content_hash: String,
    /// Document metadata stored alongside the content
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Candidate returned by a similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Similarity to the query (0-1)
    pub similarity: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Monotonic counters persisted alongside the metadata index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStatistics {
    /// Memories ever stored
    pub total_memories: u64,
    /// Consolidation passes run
    pub consolidations: u64,
    /// Tier promotions applied
    pub promotions: u64,
    /// Pruning passes that evicted at least one entry
    pub prunings: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
    /// Entries removed after their tier TTL
    pub expirations: u64,
}
