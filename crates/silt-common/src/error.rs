//! Error types for the silt toolkit.

use thiserror::Error;

/// Result type alias using SiltError.
pub type Result<T> = std::result::Result<T, SiltError>;

/// Errors that can occur in silt operations.
///
/// Programmer contract violations (writing a handle that is not resident in
/// the cache, popping from an empty queue, pushing before parameters are set)
/// are not represented here; those fail fast with a panic carrying a clear
/// message.
#[derive(Debug, Error)]
pub enum SiltError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated record in {context}: expected {expected} bytes, got {actual}")]
    TruncatedRecord {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    // Block storage errors
    #[error("block at position {position} is beyond the end of the file ({file_len} bytes)")]
    BlockOutOfBounds { position: u64, file_len: u64 },

    #[error("collection is not writeable")]
    ReadOnlyCollection,

    // Configuration errors
    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: &'static str, value: String },

    // Parallel driver errors
    #[error("worker thread panicked: {0}")]
    WorkerPanic(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}
