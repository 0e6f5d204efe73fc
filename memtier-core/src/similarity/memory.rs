//! In-memory similarity index, used when no database is wanted.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DocumentMetadata, SimilarityIndex, keyword_overlap, rank_hits};
use crate::error::Result;
use crate::hashing::content_hash;
use crate::types::{MemoryRecord, SearchHit, Tier};

/// Keyword-overlap index held entirely in memory
#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<Tier, BTreeMap<String, MemoryRecord>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents held for a tier
    pub async fn len(&self, tier: Tier) -> usize {
        self.collections
            .read()
            .await
            .get(&tier)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl SimilarityIndex for InMemoryIndex {
    async fn insert(
        &self,
        tier: Tier,
        id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<()> {
        let record = MemoryRecord {
            id: id.to_string(),
            tier,
            content: content.to_string(),
            content_hash: content_hash(content),
            metadata: metadata.clone(),
        };
        self.collections
            .write()
            .await
            .entry(tier)
            .or_default()
            .insert(id.to_string(), record);
        Ok(())
    }

    async fn search(
        &self,
        tier: Tier,
        query: &str,
        limit: usize,
        floor: f64,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&tier) else {
            return Ok(Vec::new());
        };

        let hits = collection
            .values()
            .map(|record| SearchHit {
                id: record.id.clone(),
                content: record.content.clone(),
                metadata: record.metadata.clone(),
                similarity: keyword_overlap(query, &record.content),
            })
            .collect();

        Ok(rank_hits(hits, limit, floor))
    }

    async fn delete(&self, tier: Tier, id: &str) -> Result<bool> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(&tier)
            .is_some_and(|c| c.remove(id).is_some()))
    }

    async fn get(&self, tier: Tier, id: &str) -> Result<Option<MemoryRecord>> {
        Ok(self
            .collections
            .read()
            .await
            .get(&tier)
            .and_then(|c| c.get(id).cloned()))
    }

    async fn ids(&self, tier: Tier) -> Result<Vec<String>> {
        Ok(self
            .collections
            .read()
            .await
            .get(&tier)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }
}
