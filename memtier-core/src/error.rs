//! Error types for memtier-core.

use thiserror::Error;

/// Result type alias using memtier-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for memtier operations
#[derive(Error, Debug)]
pub enum Error {
    // Database errors
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // Input errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown tier: {0}")]
    UnknownTier(String),

    #[error("Memory not found: {0}")]
    MemoryNotFound(String),

    // Similarity index errors
    #[error("Similarity index error: {0}")]
    Index(String),

    // Persistence errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported index schema version {found} (supported up to {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a similarity index error
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for errors raised by caller input rather than storage
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UnknownTier(_))
    }

    /// True for errors raised while reading or writing persisted state
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Serialization(_) | Self::UnsupportedSchema { .. }
        )
    }
}
