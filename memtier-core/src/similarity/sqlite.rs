//! SQLite-backed similarity index.
//!
//! Documents live in one table keyed by `(tier, id)`. Similarity is keyword
//! overlap between the query and the stored content.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;

use super::{DocumentMetadata, SimilarityIndex, keyword_overlap, migrations, rank_hits};
use crate::error::Result;
use crate::hashing::content_hash;
use crate::types::{MemoryRecord, SearchHit, Tier};

/// SQLite similarity index
#[derive(Clone)]
pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIndex {
    /// Open (or create) an index database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn parse_metadata(json: &str) -> Result<DocumentMetadata> {
    Ok(serde_json::from_str(json)?)
}

#[async_trait]
impl SimilarityIndex for SqliteIndex {
    async fn insert(
        &self,
        tier: Tier,
        id: &str,
        content: &str,
        metadata: &DocumentMetadata,
    ) -> Result<()> {
        let metadata_json = serde_json::to_string(metadata)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO memory_documents (tier, id, content, content_hash, metadata_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                tier.as_str(),
                id,
                content,
                content_hash(content),
                metadata_json,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    async fn search(
        &self,
        tier: Tier,
        query: &str,
        limit: usize,
        floor: f64,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, content, metadata_json FROM memory_documents WHERE tier = ?1",
        )?;

        let rows = stmt.query_map(params![tier.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (id, content, metadata_json) = row?;
            let similarity = keyword_overlap(query, &content);
            if similarity < floor {
                continue;
            }
            hits.push(SearchHit {
                id,
                content,
                metadata: parse_metadata(&metadata_json)?,
                similarity,
            });
        }

        Ok(rank_hits(hits, limit, floor))
    }

    async fn delete(&self, tier: Tier, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "DELETE FROM memory_documents WHERE tier = ?1 AND id = ?2",
            params![tier.as_str(), id],
        )?;
        Ok(affected > 0)
    }

    async fn get(&self, tier: Tier, id: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT content, content_hash, metadata_json FROM memory_documents
                 WHERE tier = ?1 AND id = ?2",
                params![tier.as_str(), id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((content, content_hash, metadata_json)) = row else {
            return Ok(None);
        };
        Ok(Some(MemoryRecord {
            id: id.to_string(),
            tier,
            content,
            content_hash,
            metadata: parse_metadata(&metadata_json)?,
        }))
    }

    async fn ids(&self, tier: Tier) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT id FROM memory_documents WHERE tier = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![tier.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
