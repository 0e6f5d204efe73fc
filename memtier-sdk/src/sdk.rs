//! Main SDK Entry Point
//!
//! An [`SDK`] is one agent's memory session. Each agent opens its own
//! session over its own memory directory; nothing is shared globally.

use std::sync::Arc;

use tracing::info;

use memtier_core::SimilarityIndex;

use crate::memory::HierarchicalMemory;
use crate::{SDKConfig, SDKResult};

/// File name of the SQLite similarity index inside the memory directory
#[cfg(feature = "sqlite")]
pub const CONTENT_DB_FILE: &str = "content.db";

/// memtier SDK - per-agent memory session
///
/// # Example
///
/// ```rust,no_run
/// use memtier_sdk::{RetrieveQuery, SDK, SDKConfig, StoreMemoryInput, Tier};
///
/// async fn example() -> anyhow::Result<()> {
///     let sdk = SDK::open(SDKConfig::new("researcher")).await?;
///
///     sdk.memory()
///         .store_memory(StoreMemoryInput::new("The API uses OAuth2", Tier::Semantic))
///         .await?;
///
///     let results = sdk.memory().retrieve_memory(RetrieveQuery::new("OAuth2")).await?;
///
///     sdk.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct SDK {
    /// SDK configuration
    config: SDKConfig,

    /// Hierarchical memory for this agent
    memory: Arc<HierarchicalMemory>,
}

impl SDK {
    /// Open a session with the default similarity index.
    ///
    /// With the `sqlite` feature the index is a SQLite file next to the
    /// metadata index; otherwise content is held in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration validation fails
    /// - The index database or persisted metadata cannot be opened
    pub async fn open(config: SDKConfig) -> SDKResult<Self> {
        config.validate()?;

        #[cfg(feature = "sqlite")]
        let index: Arc<dyn SimilarityIndex> = Arc::new(memtier_core::SqliteIndex::open(
            config.resolved_memory_dir().join(CONTENT_DB_FILE),
        )?);

        #[cfg(not(feature = "sqlite"))]
        let index: Arc<dyn SimilarityIndex> = Arc::new(memtier_core::InMemoryIndex::new());

        Self::with_index(config, index).await
    }

    /// Open a session over a caller-provided similarity index
    pub async fn with_index(config: SDKConfig, index: Arc<dyn SimilarityIndex>) -> SDKResult<Self> {
        let memory = Arc::new(HierarchicalMemory::open(&config, index).await?);

        if config.memory.auto_consolidate {
            memory
                .start_background_maintenance(config.memory.maintenance_interval())
                .await;
        }

        info!(agent = %config.agent_name, "memtier session opened");
        Ok(Self { config, memory })
    }

    /// Shutdown the session
    ///
    /// Stops background maintenance and flushes the metadata index.
    pub async fn shutdown(&self) -> SDKResult<()> {
        self.memory.stop_background_maintenance().await;
        self.memory.persist().await
    }

    /// Get the SDK configuration
    pub fn config(&self) -> &SDKConfig {
        &self.config
    }

    /// Get the hierarchical memory
    pub fn memory(&self) -> &Arc<HierarchicalMemory> {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::{RetrieveQuery, StoreMemoryInput, Tier};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir, agent: &str) -> SDKConfig {
        SDKConfig::new(agent).with_memory_dir(dir.path().join(agent))
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir, "agent0");
        config.memory.tiers.working.capacity = 0;

        let err = SDK::open(config).await.err().unwrap();
        assert!(matches!(err, crate::SDKError::Config(_)));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn test_session_persists_across_reopen() {
        let dir = TempDir::new().unwrap();

        let id = {
            let sdk = SDK::open(config_in(&dir, "agent0")).await.unwrap();
            let id = sdk
                .memory()
                .store_memory(StoreMemoryInput::new("The API uses OAuth2 tokens", Tier::Semantic))
                .await
                .unwrap();
            sdk.shutdown().await.unwrap();
            id
        };
        assert!(dir.path().join("agent0").join(CONTENT_DB_FILE).exists());

        let sdk = SDK::open(config_in(&dir, "agent0")).await.unwrap();
        let results = sdk
            .memory()
            .retrieve_memory(RetrieveQuery::new("OAuth2"))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.id, id);
        assert_eq!(results[0].content, "The API uses OAuth2 tokens");
    }

    #[tokio::test]
    async fn test_agents_are_isolated() {
        let dir = TempDir::new().unwrap();
        let a = SDK::open(config_in(&dir, "alpha")).await.unwrap();
        let b = SDK::open(config_in(&dir, "beta")).await.unwrap();

        a.memory()
            .store_memory(StoreMemoryInput::new("alpha secret", Tier::Working))
            .await
            .unwrap();

        assert_eq!(a.memory().get_memory_summary().await.total, 1);
        assert_eq!(b.memory().get_memory_summary().await.total, 0);
        assert!(
            b.memory()
                .retrieve_memory(RetrieveQuery::new("alpha"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_auto_consolidate_starts_maintenance() {
        let dir = TempDir::new().unwrap();
        let memory = MemoryConfig {
            auto_consolidate: true,
            maintenance_interval_secs: 60,
            ..Default::default()
        };
        let sdk = SDK::open(config_in(&dir, "agent0").with_memory(memory))
            .await
            .unwrap();

        assert!(sdk.memory().is_maintenance_running().await);
        sdk.shutdown().await.unwrap();
        assert!(!sdk.memory().is_maintenance_running().await);
    }
}
