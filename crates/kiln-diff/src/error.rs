//! Diff error types.

use thiserror::Error;

/// Errors that can occur while computing a diff.
#[derive(Debug, Error)]
pub enum DiffError {
    /// A branch, tag or commit spec did not resolve.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] kiln_storage::StorageError),
}
