//! # AppError
//!
//! Centralized error handling for TechConnect.
//! Maps store-level failures to the taxonomy callers render.

use thiserror::Error;

use crate::ports::StoreError;

/// The primary error type for all forum operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Document absent (e.g., Post, comment map, a single comment)
    #[error("{0} not found with ID {1}")]
    NotFound(&'static str, String),

    /// Caller identity does not match the recorded author
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Empty title, empty comment text, writes to a closed thread...
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Read or write against the backing store failed
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Contention outlived the transaction retry budget, or an ID is taken
    #[error("conflict: {0}")]
    Conflict(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(..))
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => Self::NotFound(collection.kind(), id),
            StoreError::Conflict { .. } => Self::Conflict(err.to_string()),
            StoreError::Encoding(_) | StoreError::Backend(_) => {
                Self::PersistenceError(err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Encoding(err).into()
    }
}

/// A specialized Result type for TechConnect logic.
pub type Result<T, E = AppError> = std::result::Result<T, E>;
