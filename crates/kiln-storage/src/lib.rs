//! Git object storage for Kiln.
//!
//! This crate provides content-addressed storage for git objects
//! (blobs, trees, commits, tags), reference management with an atomic
//! compare-and-swap, and the repository facade the protocol, diff, merge
//! and blame engines are built on.
//!
//! Everything is persisted through a [`StorageAdapter`], so the same code
//! runs against memory or a directory on disk:
//!
//! ```
//! use kiln_storage::{FileChange, Repository, Signature};
//!
//! let repo = Repository::in_memory("demo", "alice").unwrap();
//! let author = Signature::new("Alice", "alice@example.com", 1_700_000_000);
//! repo.commit_changes("main", &[FileChange::write("README.md", "hello\n")], &author, "init")
//!     .unwrap();
//! assert_eq!(repo.log("main", 10).unwrap().len(), 1);
//! ```

mod adapter;
mod commit;
mod error;
mod object;
mod refs;
mod repository;
mod store;
mod tree;

pub use adapter::{FsAdapter, MemoryAdapter, Stat, StatKind, StorageAdapter};
pub use commit::{tag_target, Commit, Signature};
pub use error::StorageError;
pub use object::{Blob, GitObject, ObjectId, ObjectType};
pub use refs::{validate_ref_name, RefStore, Reference};
pub use repository::{Branch, FileChange, RepoSettings, RepoStore, Repository, Tag};
pub use store::{CacheStats, ObjectStore, DEFAULT_CACHE_OBJECTS};
pub use tree::{
    flatten_tree, git_name_cmp, load_tree, write_flat_tree, EntryKind, FlatEntry, FlatTree, Tree,
    TreeEntry, MODE_EXECUTABLE, MODE_FILE, MODE_GITLINK, MODE_SYMLINK, MODE_TREE,
};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
