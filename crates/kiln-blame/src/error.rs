//! Blame error types.

use thiserror::Error;

/// Errors that can occur during blame or history analysis.
#[derive(Debug, Error)]
pub enum BlameError {
    /// The starting ref did not resolve to a commit.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// Tree diff failed while looking for renames.
    #[error("diff error: {0}")]
    Diff(#[from] kiln_diff::DiffError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] kiln_storage::StorageError),
}
