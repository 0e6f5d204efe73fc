//! SDK Error Types
//!
//! Defines error types for the memtier SDK.

use thiserror::Error;

/// SDK Result type alias
pub type SDKResult<T> = Result<T, SDKError>;

/// SDK errors
#[derive(Debug, Error)]
pub enum SDKError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Invalid caller input (importance, content, tier name)
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Entry not found
    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    /// Similarity index failure; nothing was committed
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Timeout error
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Flushing the metadata index failed after retries
    #[error("persistence failed after {attempts} attempt(s): {message}")]
    Persistence { attempts: u32, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SDKError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a persistence error
    pub fn persistence(attempts: u32, message: impl Into<String>) -> Self {
        Self::Persistence {
            attempts,
            message: message.into(),
        }
    }

    /// Check if this error is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is a storage error
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error is a persistence error
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

impl From<memtier_core::Error> for SDKError {
    fn from(err: memtier_core::Error) -> Self {
        use memtier_core::Error as CoreError;

        match err {
            CoreError::Validation(message) => Self::validation(message),
            CoreError::UnknownTier(name) => Self::validation(format!("unknown tier: {name}")),
            CoreError::MemoryNotFound(id) => Self::not_found("memory", id),
            CoreError::Index(message) => Self::storage(message),
            CoreError::Io(e) => Self::Io(e),
            CoreError::Serialization(e) => Self::Serialization(e),
            e @ CoreError::UnsupportedSchema { .. } => Self::persistence(1, e.to_string()),
            CoreError::Other(message) => Self::Other(anyhow::anyhow!(message)),
            // Database errors, present when the core sqlite feature is on
            #[allow(unreachable_patterns)]
            other => Self::storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = SDKError::validation("importance must be within [0, 1]");
        assert!(err.is_validation());
        assert!(err.to_string().contains("importance"));

        let err = SDKError::not_found("memory", "123");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("memory"));
        assert!(err.to_string().contains("123"));

        let err = SDKError::timeout(5000);
        assert!(err.is_timeout());
        assert!(err.to_string().contains("5000"));

        let err = SDKError::persistence(3, "disk full");
        assert!(err.is_persistence());
        assert!(err.to_string().contains("3 attempt"));
    }

    #[test]
    fn test_core_error_mapping() {
        let err: SDKError = memtier_core::Error::UnknownTier("archive".into()).into();
        assert!(err.is_validation());
        assert!(err.to_string().contains("archive"));

        let err: SDKError = memtier_core::Error::index("collection unavailable").into();
        assert!(err.is_storage());

        let err: SDKError = memtier_core::Error::MemoryNotFound("abc".into()).into();
        assert!(err.is_not_found());

        let err: SDKError = memtier_core::Error::UnsupportedSchema {
            found: 2,
            supported: 1,
        }
        .into();
        assert!(err.is_persistence());
    }
}
