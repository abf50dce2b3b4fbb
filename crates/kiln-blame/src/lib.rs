//! Blame and file history for Kiln.
//!
//! [`get_file_blame`] attributes every line of a file to the commit that
//! introduced it. [`file_history`] and [`file_history_fast`] list the
//! commits that changed a path, newest first.

mod blame;
mod error;
mod history;

pub use blame::{get_file_blame, BlameLine};
pub use error::BlameError;
pub use history::{file_history, file_history_fast, ChangeKind, FileHistoryEntry};

/// Result type for blame operations.
pub type Result<T> = std::result::Result<T, BlameError>;
