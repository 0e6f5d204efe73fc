//! memtier-core - Core library for memtier
//!
//! Shared building blocks for the hierarchical memory manager:
//!
//! - **types**: tiers, memory metadata and statistics
//! - **similarity**: per-tier content index with similarity search
//! - **persistence**: JSON files for the metadata index and statistics
//! - **hashing**: content hashes

pub mod error;
pub mod hashing;
pub mod persistence;
pub mod similarity;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use persistence::{MetadataIndex, MetadataStore};
pub use similarity::{DocumentMetadata, InMemoryIndex, SimilarityIndex};
#[cfg(feature = "sqlite")]
pub use similarity::SqliteIndex;
pub use types::{
    ImportanceBand, MemoryImportance, MemoryMetadata, MemoryRecord, MemoryStatistics, SearchHit,
    Tier,
};
