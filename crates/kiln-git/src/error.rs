//! Git protocol error types.

use thiserror::Error;

/// Errors that can occur during git protocol operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pack file format.
    #[error("invalid pack file: {0}")]
    InvalidPack(String),

    /// The pack trailer does not match its content.
    #[error("pack checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Checksum carried in the trailer.
        expected: String,
        /// Checksum computed over the pack body.
        actual: String,
    },

    /// A delta could not be applied to its base.
    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Object not found.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] kiln_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
