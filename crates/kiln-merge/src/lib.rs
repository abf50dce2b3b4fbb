//! Merge engine for Kiln.
//!
//! Finds merge bases, merges flattened trees three ways and records merge
//! commits. Conflicts are a [`MergeOutcome`] variant, never an error.
//!
//! # Example
//!
//! ```
//! use kiln_merge::{merge_branches, MergeOptions, MergeOutcome};
//! use kiln_storage::{FileChange, Repository, Signature};
//!
//! let repo = Repository::in_memory("demo", "alice").unwrap();
//! let alice = Signature::new("Alice", "alice@example.com", 1);
//! let root = repo.commit_changes("main", &[FileChange::write("a", "1")], &alice, "root").unwrap();
//! repo.create_branch("topic", root).unwrap();
//! repo.commit_changes("topic", &[FileChange::write("b", "2")], &alice, "topic").unwrap();
//! repo.commit_changes("main", &[FileChange::write("c", "3")], &alice, "main").unwrap();
//!
//! let outcome = merge_branches(&repo, "topic", "main", &alice, &MergeOptions::default()).unwrap();
//! assert!(matches!(outcome, MergeOutcome::Merged { .. }));
//! ```

mod base;
mod error;
mod merge;
mod tree;

pub use base::{find_merge_base, DEFAULT_MAX_VISITED};
pub use error::MergeError;
pub use merge::{merge_branches, merge_commit, MergeOptions, MergeOutcome, MergeResult};
pub use tree::{merge_trees, ConflictPolicy, TreeMerge};

/// Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;
