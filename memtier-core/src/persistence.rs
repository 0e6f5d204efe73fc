//! JSON persistence for the metadata index and statistics.
//!
//! Files live in one directory per agent:
//!
//! - `metadata_index.json`: `{"version": 1, "entries": {id: metadata}}`.
//!   Older files holding a bare `{id: metadata}` map are still accepted.
//! - `stats.json`: the [`MemoryStatistics`] counters.
//!
//! Loaded entries are checked before use: importance must be finite and
//! within `[0, 1]`, and a `last_accessed` earlier than `created_at` is
//! raised to `created_at`.
//!
//! Writes go to a temp file which is then renamed over the target, so a
//! crash mid-write leaves the previous snapshot in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{MemoryMetadata, MemoryStatistics};

/// Index file name
pub const INDEX_FILE: &str = "metadata_index.json";
/// Statistics file name
pub const STATS_FILE: &str = "stats.json";
/// Current index schema version
pub const INDEX_SCHEMA_VERSION: u32 = 1;

/// Metadata index keyed by memory id
pub type MetadataIndex = BTreeMap<String, MemoryMetadata>;

#[derive(Serialize)]
struct VersionedIndexRef<'a> {
    version: u32,
    entries: &'a MetadataIndex,
}

#[derive(Deserialize)]
struct VersionedIndex {
    version: u32,
    entries: MetadataIndex,
}

/// Reads and writes the persisted metadata index and statistics
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    /// Create a store rooted at `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the persisted files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.dir.join(STATS_FILE)
    }

    /// Load the metadata index; a missing file is an empty index
    pub async fn load_index(&self) -> Result<MetadataIndex> {
        let Some(raw) = read_optional(&self.index_path()).await? else {
            return Ok(MetadataIndex::new());
        };

        let value: Value = serde_json::from_str(&raw)?;
        // Legacy files are a bare id map; an entry is never a number
        let mut entries = if value.get("version").is_some_and(Value::is_number) {
            let VersionedIndex { version, entries } = serde_json::from_value(value)?;
            if version > INDEX_SCHEMA_VERSION {
                return Err(Error::UnsupportedSchema {
                    found: version,
                    supported: INDEX_SCHEMA_VERSION,
                });
            }
            entries
        } else {
            let entries: MetadataIndex = serde_json::from_value(value)?;
            debug!(count = entries.len(), "Loaded legacy metadata index");
            entries
        };

        for (id, meta) in entries.iter_mut() {
            // The map key is authoritative for the id
            if meta.id != *id {
                meta.id = id.clone();
            }
            check_entry(meta)?;
        }

        Ok(entries)
    }

    /// Write the metadata index
    pub async fn save_index(&self, entries: &MetadataIndex) -> Result<()> {
        let doc = VersionedIndexRef {
            version: INDEX_SCHEMA_VERSION,
            entries,
        };
        let json = serde_json::to_string_pretty(&doc)?;
        write_atomic(&self.dir, INDEX_FILE, json.as_bytes()).await
    }

    /// Load statistics; a missing file is all zeros
    pub async fn load_stats(&self) -> Result<MemoryStatistics> {
        match read_optional(&self.stats_path()).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(MemoryStatistics::default()),
        }
    }

    /// Write statistics
    pub async fn save_stats(&self, stats: &MemoryStatistics) -> Result<()> {
        let json = serde_json::to_string_pretty(stats)?;
        write_atomic(&self.dir, STATS_FILE, json.as_bytes()).await
    }
}

fn check_entry(meta: &mut MemoryMetadata) -> Result<()> {
    if !meta.importance.is_finite() || !(0.0..=1.0).contains(&meta.importance) {
        return Err(Error::validation(format!(
            "memory {}: importance {} outside [0, 1]",
            meta.id, meta.importance
        )));
    }
    if meta.last_accessed < meta.created_at {
        warn!(memory_id = %meta.id, "last_accessed precedes created_at; resetting");
        meta.last_accessed = meta.created_at;
    }
    Ok(())
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(file_name);
    let tmp = dir.join(format!(".{file_name}.tmp"));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, &target).await?;
    Ok(())
}
