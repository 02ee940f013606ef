//! Error types for imgedit-engine
//!
//! Every engine operation returns [`EngineResult`]. The request layer maps
//! [`EngineError::code`] to its own status codes.

use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input rejected before any state changed (bounds, size, format, unsafe path)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Session, layer, snapshot or history entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed; caller must re-fetch and retry
    #[error("Version conflict: expected version {expected}, current version is {current}")]
    Conflict { expected: i64, current: i64 },

    /// Raster or overlay work failed part way through
    #[error("Transform failed during {stage}: {message} (raster mutated: {raster_mutated}, overlay mutated: {overlay_mutated})")]
    Transform {
        stage: &'static str,
        raster_mutated: bool,
        overlay_mutated: bool,
        message: String,
    },

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// imgedit-common error
    #[error("Common error: {0}")]
    Common(#[from] imgedit_common::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable machine-readable code for the transport layer
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::Transform { .. } => "TRANSFORM_ERROR",
            EngineError::Database(_) => "DATABASE_ERROR",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Common(imgedit_common::Error::NotFound(_)) => "NOT_FOUND",
            EngineError::Common(_) => "COMMON_ERROR",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Shorthand for a transform failure where nothing was mutated yet
    pub fn transform(stage: &'static str, message: impl Into<String>) -> Self {
        EngineError::Transform {
            stage,
            raster_mutated: false,
            overlay_mutated: false,
            message: message.into(),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
