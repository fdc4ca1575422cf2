//! Error types for Strata.

use thiserror::Error;

/// Result type alias using StrataError.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Errors that can occur in Strata operations.
///
/// Variants under "Chunk integrity" describe on-disk corruption or misuse of
/// the build contract. They are not retryable: callers should abort the
/// build that produced them.
#[derive(Debug, Error)]
pub enum StrataError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Storage errors
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Put failed for {path} after {attempts} attempts: {reason}")]
    PutFailed {
        path: String,
        attempts: usize,
        reason: String,
    },

    // Chunk integrity
    #[error("Chunk corrupted: {id}, reason: {reason}")]
    ChunkCorrupted { id: String, reason: String },

    #[error("Invalid chunk tail for {id}")]
    InvalidTail { id: String },

    #[error("Bad point count for base chunk: expected {expected} bytes, got {actual}")]
    BadBasePointCount { expected: usize, actual: usize },

    #[error("Bad serialized base tube: stored {stored}, computed {computed}")]
    BadBaseTube { stored: u64, computed: String },

    #[error("Tube mismatch at {tube}")]
    TubeConflict { tube: usize },

    #[error("Checksum mismatch: stored={stored}, computed={computed}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("Chunk already persisted: {0}")]
    AlreadyPersisted(String),

    // Schema errors
    #[error("Dimension not found: {0}")]
    DimensionNotFound(String),

    #[error("Unsupported dimension: {name} ({size} bytes)")]
    UnsupportedDimension { name: String, size: usize },

    #[error("Point size mismatch: expected {expected}, got {actual}")]
    PointSizeMismatch { expected: usize, actual: usize },

    // Build errors
    #[error("Clip failed: {0}")]
    ClipFailed(String),

    #[error("Registry already saved")]
    RegistrySaved,

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
