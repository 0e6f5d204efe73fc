//! SDK Utilities
//!
//! Input validation and text helpers shared by the memory operations.

mod validation;

pub use validation::{
    ValidationError, extract_keywords, normalize_importance, truncate_chars, validate_content,
};
