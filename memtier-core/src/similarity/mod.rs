//! Similarity index interface
//!
//! Each tier owns its own collection of documents. The memory manager only
//! talks to the index through [`SimilarityIndex`], so the backing store can be
//! swapped (SQLite, in-memory, or an external vector database).

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{MemoryRecord, SearchHit, Tier};

mod memory;
#[cfg(feature = "sqlite")]
pub mod migrations;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryIndex;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteIndex;

/// Document metadata stored alongside indexed content
pub type DocumentMetadata = serde_json::Map<String, serde_json::Value>;

/// Per-tier content store with similarity search.
///
/// Implementations must be safe to share between tasks; every call is made
/// without the manager's metadata lock held.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Insert (or replace) a document in the tier's collection
    async fn insert(
        &self,
        tier: Tier,
        id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<()>;

    /// Search the tier's collection.
    ///
    /// Returns at most `limit` hits with similarity >= `floor`, best first.
    async fn search(
        &self,
        tier: Tier,
        query: &str,
        limit: usize,
        floor: f64,
    ) -> Result<Vec<SearchHit>>;

    /// Delete a document; returns false if it was not present
    async fn delete(&self, tier: Tier, id: &str) -> Result<bool>;

    /// Fetch a document by id
    async fn get(&self, tier: Tier, id: &str) -> Result<Option<MemoryRecord>>;

    /// All document ids held for the tier
    async fn ids(&self, tier: Tier) -> Result<Vec<String>>;
}

/// Fraction of query words that appear in `content` (case-insensitive).
///
/// Returns 0.0 for a query without words.
pub fn keyword_overlap(query: &str, content: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let content_lower = content.to_lowercase();

    let query_words: Vec<&str> = query_lower.split_whitespace().collect();
    if query_words.is_empty() {
        return 0.0;
    }

    let matches = query_words
        .iter()
        .filter(|w| content_lower.contains(*w))
        .count();

    (matches as f64 / query_words.len() as f64).min(1.0)
}

/// Jaccard similarity of the lowercase word sets of two texts
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let words_a: HashSet<&str> = a_lower.split_whitespace().collect();
    let words_b: HashSet<&str> = b_lower.split_whitespace().collect();

    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();

    intersection as f64 / union as f64
}

/// Sort hits best first (ties by ascending id) and apply floor and limit
pub(crate) fn rank_hits(mut hits: Vec<SearchHit>, limit: usize, floor: f64) -> Vec<SearchHit> {
    hits.retain(|h| h.similarity >= floor);
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, similarity: f64) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            content: String::new(),
            metadata: DocumentMetadata::new(),
            similarity,
        }
    }

    #[test]
    fn test_keyword_overlap() {
        assert_eq!(keyword_overlap("deploy", "Deploy using blue-green"), 1.0);
        assert_eq!(keyword_overlap("deploy rollback", "deploy using blue-green"), 0.5);
        assert_eq!(keyword_overlap("kubernetes", "deploy using blue-green"), 0.0);
        assert_eq!(keyword_overlap("   ", "anything"), 0.0);
    }

    #[test]
    fn test_jaccard_similarity() {
        assert_eq!(jaccard_similarity("the cat sat", "the cat sat"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        assert!((jaccard_similarity("a b c", "a b d") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard_similarity("", ""), 1.0);
    }

    #[test]
    fn test_rank_hits_orders_and_limits() {
        let hits = vec![hit("c", 0.7), hit("a", 0.9), hit("b", 0.7), hit("d", 0.2)];
        let ranked = rank_hits(hits, 3, 0.5);
        let ids: Vec<&str> = ranked.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert!(rank_hits(vec![hit("x", 0.9)], 0, 0.0).is_empty());
    }
}
