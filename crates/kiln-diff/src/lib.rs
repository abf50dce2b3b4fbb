//! Diff engine for Kiln.
//!
//! Computes what changed between two trees: which paths were added,
//! modified, deleted or renamed, and for text files the line hunks in
//! unified-diff form.
//!
//! # Example
//!
//! ```
//! use kiln_diff::{diff_text, DiffOptions};
//!
//! let hunks = diff_text("a\nb\n", "a\nc\n", &DiffOptions::default());
//! assert_eq!(hunks.len(), 1);
//! assert_eq!(hunks[0].header(), "@@ -1,2 +1,2 @@");
//! ```

mod commit;
mod error;
mod lines;
mod tree;
mod types;

pub use commit::{compare_branches, diff_commits, diff_file, diff_tree_files, get_commit_diff};
pub use error::DiffError;
pub use lines::{
    build_hunks, diff_text, edit_script, is_binary, split_lines, DiffOptions, Edit,
    DEFAULT_CONTEXT, DEFAULT_MAX_CELLS,
};
pub use tree::{diff_trees, pair_renames, TreeChange};
pub use types::{CommitDiff, DiffLine, DiffStats, FileDiff, FileStatus, Hunk, LineKind};

/// Result type for diff operations.
pub type Result<T> = std::result::Result<T, DiffError>;
