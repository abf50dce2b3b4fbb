//! Merge error types.

use thiserror::Error;

/// Errors that can occur during a merge.
///
/// Conflicts are not errors; they are reported through
/// [`MergeOutcome::Conflicted`](crate::MergeOutcome::Conflicted).
#[derive(Debug, Error)]
pub enum MergeError {
    /// A branch did not resolve to a commit.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// The branches share no history within the search limit.
    #[error("no merge base between {head} and {base}")]
    NoMergeBase {
        /// Incoming branch.
        head: String,
        /// Target branch.
        base: String,
    },

    /// The target branch moved while the merge was being computed.
    #[error("reference update rejected: {0} changed concurrently")]
    RefUpdateRejected(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] kiln_storage::StorageError),
}
