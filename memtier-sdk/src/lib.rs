//! memtier SDK - Hierarchical Multi-Tier Memory for AI Agents
//!
//! Gives each agent a memory split into four tiers (working, episodic,
//! semantic, procedural) with:
//!
//! - **store** - capacity-bounded writes with retention-based eviction
//! - **retrieve** - similarity search ranked by similarity, importance and recency
//! - **consolidate** - promotion of important, frequently used memories
//! - **expire / collect garbage** - TTL expiry and index reconciliation
//! - **summary** - counts per tier and importance band plus lifetime counters
//!
//! Content lives in a [`SimilarityIndex`]; metadata and counters are
//! persisted as JSON in the agent's memory directory.
//!
//! # Example
//!
//! ```rust,no_run
//! use memtier_sdk::{SDK, SDKConfig, StoreMemoryInput, RetrieveQuery, Tier};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let sdk = SDK::open(SDKConfig::new("agent0")).await?;
//!
//!     let id = sdk
//!         .memory()
//!         .store_memory(StoreMemoryInput::new("User prefers dark mode", Tier::Semantic).with_importance(0.8))
//!         .await?;
//!
//!     let results = sdk.memory().retrieve_memory(RetrieveQuery::new("dark mode")).await?;
//!     println!("{id}: {} result(s)", results.len());
//!     Ok(())
//! }
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// Re-export core types from memtier-core
// ─────────────────────────────────────────────────────────────────────────────

pub use memtier_core::{
    DocumentMetadata, ImportanceBand, InMemoryIndex, MemoryImportance, MemoryMetadata,
    MemoryRecord, MemoryStatistics, SearchHit, SimilarityIndex, Tier,
};

#[cfg(feature = "sqlite")]
pub use memtier_core::SqliteIndex;

/// Attribute for implementing [`SimilarityIndex`] on custom backends
pub use async_trait::async_trait;

/// Error types from core
pub use memtier_core::error as core_error;

// ─────────────────────────────────────────────────────────────────────────────
// SDK-specific modules
// ─────────────────────────────────────────────────────────────────────────────

pub mod config;
pub mod memory;
pub mod utils;

mod error;
mod sdk;

// Re-export main SDK types
pub use config::{ConfigValidationError, ImportancePolicy, MemoryConfig, SDKConfig};
pub use error::{SDKError, SDKResult};
pub use sdk::SDK;

pub use memory::{
    ConsolidationResult, GcReport, HierarchicalMemory, MemoryResult, MemorySummary, MessageRole,
    PruneReport, RetrieveQuery, StoreMemoryInput,
};
