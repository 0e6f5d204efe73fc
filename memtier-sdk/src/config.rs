//! SDK Configuration
//!
//! Defines configuration options for the memtier SDK.
//!
//! Configuration is read from TOML. The file location is taken from
//! `MEMTIER_CONFIG`, falling back to `<data_dir>/memtier/config.toml`.
//! `MEMTIER_DIR` overrides the base directory that per-agent memory
//! directories are created under.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use memtier_core::Tier;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "MEMTIER_CONFIG";
/// Environment variable overriding the base data directory
pub const DIR_ENV: &str = "MEMTIER_DIR";

/// SDK configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SDKConfig {
    /// Directory for this agent's persisted memory (default: `<base>/<agent_name>`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_dir: Option<PathBuf>,

    /// Agent name recorded on every memory
    pub agent_name: String,

    /// Conversation context recorded on every memory
    pub context_id: String,

    /// Memory configuration
    pub memory: MemoryConfig,
}

impl Default for SDKConfig {
    fn default() -> Self {
        Self {
            memory_dir: None,
            agent_name: "agent0".to_string(),
            context_id: String::new(),
            memory: MemoryConfig::default(),
        }
    }
}

/// Capacity and time-to-live of one tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Maximum live entries
    pub capacity: usize,

    /// Days since last access before expiry (0 = never)
    pub ttl_days: u32,
}

impl TierPolicy {
    fn default_for(tier: Tier) -> Self {
        Self {
            capacity: tier.default_capacity(),
            ttl_days: tier.default_ttl_days(),
        }
    }

    /// TTL as a duration, `None` for permanent tiers
    pub fn ttl(&self) -> Option<chrono::Duration> {
        (self.ttl_days > 0).then(|| chrono::Duration::days(i64::from(self.ttl_days)))
    }
}

/// Per-tier policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTable {
    pub working: TierPolicy,
    pub episodic: TierPolicy,
    pub semantic: TierPolicy,
    pub procedural: TierPolicy,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            working: TierPolicy::default_for(Tier::Working),
            episodic: TierPolicy::default_for(Tier::Episodic),
            semantic: TierPolicy::default_for(Tier::Semantic),
            procedural: TierPolicy::default_for(Tier::Procedural),
        }
    }
}

impl TierTable {
    /// Policy for a tier
    pub fn get(&self, tier: Tier) -> &TierPolicy {
        match tier {
            Tier::Working => &self.working,
            Tier::Episodic => &self.episodic,
            Tier::Semantic => &self.semantic,
            Tier::Procedural => &self.procedural,
        }
    }

    /// Mutable policy for a tier
    pub fn get_mut(&mut self, tier: Tier) -> &mut TierPolicy {
        match tier {
            Tier::Working => &mut self.working,
            Tier::Episodic => &mut self.episodic,
            Tier::Semantic => &mut self.semantic,
            Tier::Procedural => &mut self.procedural,
        }
    }
}

/// How out-of-range importance values are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportancePolicy {
    /// Reject with a validation error
    #[default]
    Reject,
    /// Clamp into [0, 1]
    Clamp,
}

/// Retrieval configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum similarity for index candidates (default: 0.6)
    pub similarity_floor: f64,

    /// Candidates fetched per tier, as a multiple of the limit (default: 2)
    pub candidate_multiplier: usize,

    /// Results returned when the caller gives no limit (default: 5)
    pub default_limit: usize,

    /// Importance threshold when the caller gives none (default: 0.3)
    pub importance_threshold: f64,

    /// Age in days at which recency reaches zero (default: 30)
    pub recency_horizon_days: f64,

    /// Weight of similarity in the composite score (default: 0.5)
    pub similarity_weight: f64,

    /// Weight of importance in the composite score (default: 0.3)
    pub importance_weight: f64,

    /// Weight of recency in the composite score (default: 0.2)
    pub recency_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.6,
            candidate_multiplier: 2,
            default_limit: 5,
            importance_threshold: 0.3,
            recency_horizon_days: 30.0,
            similarity_weight: 0.5,
            importance_weight: 0.3,
            recency_weight: 0.2,
        }
    }
}

/// Consolidation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationRule {
    /// Minimum importance to be a candidate (default: 0.5)
    pub min_importance: f64,

    /// Minimum access count to be a candidate (default: 3)
    pub min_access_count: u64,

    /// Minimum age in days before promotion (default: 7)
    pub age_threshold_days: i64,

    /// Importance required to leave working memory (default: 0.7)
    pub working_promotion_importance: f64,

    /// Access count required to leave episodic memory (default: 10)
    pub episodic_promotion_access_count: u64,

    /// Word-set similarity at which candidates are linked (default: 0.85)
    pub similarity_threshold: f64,

    /// Link similar candidates through `related_ids` (default: true)
    pub link_similar: bool,
}

impl Default for ConsolidationRule {
    fn default() -> Self {
        Self {
            min_importance: 0.5,
            min_access_count: 3,
            age_threshold_days: 7,
            working_promotion_importance: 0.7,
            episodic_promotion_access_count: 10,
            similarity_threshold: 0.85,
            link_similar: true,
        }
    }
}

/// Retention score weights used by capacity eviction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionWeights {
    /// Weight of importance (default: 0.4)
    pub importance: f64,

    /// Weight of access frequency (default: 0.3)
    pub access: f64,

    /// Weight of recency (default: 0.3)
    pub recency: f64,

    /// Access count at which the access term saturates (default: 10)
    pub access_saturation: f64,

    /// Age in days at which recency reaches zero (default: 30)
    pub recency_horizon_days: f64,
}

impl Default for RetentionWeights {
    fn default() -> Self {
        Self {
            importance: 0.4,
            access: 0.3,
            recency: 0.3,
            access_saturation: 10.0,
            recency_horizon_days: 30.0,
        }
    }
}

/// Flush retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Attempts before a flush is reported as failed (default: 3)
    pub max_retries: u32,

    /// Base delay for exponential backoff in ms (default: 50)
    pub backoff_base_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 50,
        }
    }
}

impl PersistenceConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

/// Memory system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Per-tier capacity and TTL
    pub tiers: TierTable,

    /// Handling of importance outside [0, 1] (default: reject)
    pub importance_policy: ImportancePolicy,

    /// Retrieval scoring
    pub retrieval: RetrievalConfig,

    /// Promotion rule
    pub consolidation: ConsolidationRule,

    /// Eviction scoring
    pub retention: RetentionWeights,

    /// Flush retries
    pub persistence: PersistenceConfig,

    /// Timeout for each similarity index call in ms (default: 5000)
    pub index_timeout_ms: u64,

    /// Run background maintenance when the SDK opens (default: false)
    pub auto_consolidate: bool,

    /// Background maintenance interval in seconds (default: 3600)
    pub maintenance_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            tiers: TierTable::default(),
            importance_policy: ImportancePolicy::default(),
            retrieval: RetrievalConfig::default(),
            consolidation: ConsolidationRule::default(),
            retention: RetentionWeights::default(),
            persistence: PersistenceConfig::default(),
            index_timeout_ms: 5000,
            auto_consolidate: false,
            maintenance_interval_secs: 3600,
        }
    }
}

impl MemoryConfig {
    /// Similarity index call timeout
    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }

    /// Background maintenance interval
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    /// Set the capacity of one tier
    pub fn with_capacity(mut self, tier: Tier, capacity: usize) -> Self {
        self.tiers.get_mut(tier).capacity = capacity;
        self
    }

    /// Set the importance policy
    pub fn with_importance_policy(mut self, policy: ImportancePolicy) -> Self {
        self.importance_policy = policy;
        self
    }

    /// Set the similarity index timeout
    pub fn with_index_timeout(mut self, timeout: Duration) -> Self {
        self.index_timeout_ms = timeout.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for tier in Tier::ALL {
            if self.tiers.get(tier).capacity == 0 {
                return Err(invalid(
                    format!("memory.tiers.{tier}.capacity"),
                    "must be greater than 0",
                ));
            }
        }

        let r = &self.retrieval;
        check_unit("memory.retrieval.similarity_floor", r.similarity_floor)?;
        check_unit("memory.retrieval.importance_threshold", r.importance_threshold)?;
        check_weight("memory.retrieval.similarity_weight", r.similarity_weight)?;
        check_weight("memory.retrieval.importance_weight", r.importance_weight)?;
        check_weight("memory.retrieval.recency_weight", r.recency_weight)?;
        check_positive("memory.retrieval.recency_horizon_days", r.recency_horizon_days)?;
        if r.candidate_multiplier == 0 {
            return Err(invalid(
                "memory.retrieval.candidate_multiplier",
                "must be greater than 0",
            ));
        }

        let c = &self.consolidation;
        check_unit("memory.consolidation.min_importance", c.min_importance)?;
        check_unit(
            "memory.consolidation.working_promotion_importance",
            c.working_promotion_importance,
        )?;
        check_unit("memory.consolidation.similarity_threshold", c.similarity_threshold)?;
        if c.age_threshold_days < 0 {
            return Err(invalid(
                "memory.consolidation.age_threshold_days",
                "must not be negative",
            ));
        }

        let w = &self.retention;
        check_weight("memory.retention.importance", w.importance)?;
        check_weight("memory.retention.access", w.access)?;
        check_weight("memory.retention.recency", w.recency)?;
        check_positive("memory.retention.access_saturation", w.access_saturation)?;
        check_positive("memory.retention.recency_horizon_days", w.recency_horizon_days)?;

        if self.persistence.max_retries == 0 {
            return Err(invalid(
                "memory.persistence.max_retries",
                "must be at least 1",
            ));
        }
        if self.index_timeout_ms == 0 {
            return Err(invalid("memory.index_timeout_ms", "must be greater than 0"));
        }
        if self.auto_consolidate && self.maintenance_interval_secs == 0 {
            return Err(invalid(
                "memory.maintenance_interval_secs",
                "must be greater than 0 when auto_consolidate is enabled",
            ));
        }

        Ok(())
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

fn check_unit(field: &str, value: f64) -> Result<(), ConfigValidationError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(field, "must be between 0 and 1"));
    }
    Ok(())
}

fn check_weight(field: &str, value: f64) -> Result<(), ConfigValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, "must be finite and non-negative"));
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> Result<(), ConfigValidationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(field, "must be greater than 0"));
    }
    Ok(())
}

/// Base directory for all agents' memory
pub fn default_base_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("memtier")
}

impl SDKConfig {
    /// Create a new SDK config for an agent
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            ..Default::default()
        }
    }

    /// Load configuration from the config file, or defaults if none exists
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Write configuration as TOML
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Config file path
    pub fn config_path() -> PathBuf {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_base_dir().join("config.toml"),
        }
    }

    /// Directory holding this agent's persisted memory
    pub fn resolved_memory_dir(&self) -> PathBuf {
        self.memory_dir
            .clone()
            .unwrap_or_else(|| default_base_dir().join(&self.agent_name))
    }

    /// Set the memory directory
    pub fn with_memory_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.memory_dir = Some(dir.into());
        self
    }

    /// Set the context ID
    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = context_id.into();
        self
    }

    /// Set memory configuration
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.agent_name.trim().is_empty() {
            return Err(ConfigValidationError::MissingAgentName);
        }

        self.memory.validate()
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("agent_name is required")]
    MissingAgentName,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
