//! Hierarchical Multi-Tier Memory
//!
//! Implements a four-tier memory architecture:
//! - Working: immediate, volatile context (small, short TTL)
//! - Episodic: event-based, time-bound memories
//! - Semantic: factual knowledge, kept indefinitely
//! - Procedural: solution patterns, kept indefinitely
//!
//! # Architecture
//!
//! Memory flows upward through consolidation:
//! 1. New entries land in the tier the caller chooses
//! 2. Important, frequently accessed working memories become episodic
//! 3. Heavily used episodic memories become semantic
//!
//! Content lives in a [`SimilarityIndex`](memtier_core::SimilarityIndex);
//! the metadata index decides what exists. Retrieval ranks index hits by
//! similarity, importance and recency. Each tier is bounded: storing past
//! capacity evicts the entries with the lowest retention score.

mod consolidation;
mod eviction;
mod hierarchical;
mod retrieval;
mod summary;
mod types;

pub use consolidation::{consolidation_score, is_candidate, promotion_target};
pub use eviction::{is_expired, retention_score, select_evictions};
pub use hierarchical::{DEFAULT_RELATED_DEPTH, HierarchicalMemory};
pub use retrieval::{composite_score, recency};
pub use types::{
    AgeDistribution, ConsolidationResult, DEFAULT_IMPORTANCE, DEFAULT_SOURCE_TYPE, Eviction,
    GcReport, MemoryResult, MemorySummary, MessageRole, Promotion, PruneReport, RetrieveQuery,
    StoreMemoryInput,
};
