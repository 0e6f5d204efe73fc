//! Validation Utilities

use thiserror::Error;

use crate::config::ImportancePolicy;

/// Validation error types
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Field required: {0}")]
    Required(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<ValidationError> for crate::SDKError {
    fn from(err: ValidationError) -> Self {
        crate::SDKError::validation(err.to_string())
    }
}

/// Reject empty or whitespace-only content
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Required(
            "content cannot be empty".into(),
        ));
    }
    Ok(())
}

/// Check an importance value against the configured policy.
///
/// Non-finite values are always rejected. Values outside `[0, 1]` are
/// rejected under [`ImportancePolicy::Reject`] and clamped under
/// [`ImportancePolicy::Clamp`].
pub fn normalize_importance(value: f64, policy: ImportancePolicy) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::InvalidFormat(format!(
            "importance must be a finite number, got {value}"
        )));
    }

    if (0.0..=1.0).contains(&value) {
        return Ok(value);
    }

    match policy {
        ImportancePolicy::Reject => Err(ValidationError::OutOfRange(format!(
            "importance must be within [0, 1], got {value}"
        ))),
        ImportancePolicy::Clamp => Ok(value.clamp(0.0, 1.0)),
    }
}

/// Keep at most `max` characters of `s`
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// First `limit` lowercase words longer than four characters
pub fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    text.split_whitespace()
        .filter(|w| w.chars().count() > 4)
        .map(str::to_lowercase)
        .take(limit)
        .collect()
}
