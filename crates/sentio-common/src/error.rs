//! Sentio Error - Unified Error Types
//!
//! Error handling for all Sentio operations. Categorizes errors by domain
//! (validation, lookup, analysis, configuration, storage) and provides
//! utilities for error classification.
//!
//! Key Features:
//! - Domain-specific error variants for precise error handling
//! - User vs system error classification
//! - Retryable error detection for transient storage failures
//! - Seamless integration with std::io::Error
//!
//! @version 0.1.0
//! @author Sentio Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Sentio operations.
#[derive(Error, Debug)]
pub enum SentioError {
    // Validation errors
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown data source: {0}")]
    UnknownDataSource(String),

    #[error("inactive data source: {0}")]
    InactiveDataSource(String),

    // Lookup errors
    #[error("not found: {0}")]
    NotFound(String),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("dataset not found: {0}")]
    DataSetNotFound(String),

    // Analysis errors
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    // Storage errors
    #[error("transient store error: {0}")]
    TransientStore(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Serialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Sentio operations.
pub type Result<T> = std::result::Result<T, SentioError>;

// =============================================================================
// Error Classification
// =============================================================================

impl SentioError {
    /// Returns true if the operation can be safely retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SentioError::TransientStore(_) | SentioError::Io(_))
    }

    /// Returns true if this is a user error (vs system error).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            SentioError::Validation(_)
                | SentioError::UnknownDataSource(_)
                | SentioError::InactiveDataSource(_)
                | SentioError::NotFound(_)
                | SentioError::TagNotFound(_)
                | SentioError::DataSetNotFound(_)
                | SentioError::TypeMismatch(_)
                | SentioError::Serialization(_)
        )
    }

    /// Returns true if this error means a requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SentioError::NotFound(_) | SentioError::TagNotFound(_) | SentioError::DataSetNotFound(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
