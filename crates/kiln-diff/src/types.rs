//! Diff result types.

use kiln_storage::ObjectId;
use serde::{Deserialize, Serialize};

/// How a file changed between two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Present only in the new tree.
    Added,
    /// Content or mode differs.
    Modified,
    /// Present only in the old tree.
    Deleted,
    /// Same content under a new path.
    Renamed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Added => write!(f, "added"),
            FileStatus::Modified => write!(f, "modified"),
            FileStatus::Deleted => write!(f, "deleted"),
            FileStatus::Renamed => write!(f, "renamed"),
        }
    }
}

/// Kind of a line inside a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Unchanged line shown for context.
    Context,
    /// Line present only in the new file.
    Add,
    /// Line present only in the old file.
    Delete,
}

impl LineKind {
    /// Unified diff prefix character.
    pub fn prefix(&self) -> char {
        match self {
            LineKind::Context => ' ',
            LineKind::Add => '+',
            LineKind::Delete => '-',
        }
    }
}

/// One line of a hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    /// Line kind.
    pub kind: LineKind,
    /// Line content without the trailing newline.
    pub content: String,
    /// 1-based line number in the old file (context and delete lines).
    pub old_line_no: Option<usize>,
    /// 1-based line number in the new file (context and add lines).
    pub new_line_no: Option<usize>,
}

/// A contiguous region of changes with surrounding context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    /// First old line covered (0 when the hunk covers no old lines).
    pub old_start: usize,
    /// Number of old lines covered.
    pub old_count: usize,
    /// First new line covered (0 when the hunk covers no new lines).
    pub new_start: usize,
    /// Number of new lines covered.
    pub new_count: usize,
    /// Lines in order.
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// Unified diff header, e.g. `@@ -1,3 +1,4 @@`.
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )
    }

    /// Number of added lines.
    pub fn additions(&self) -> usize {
        self.lines.iter().filter(|l| l.kind == LineKind::Add).count()
    }

    /// Number of deleted lines.
    pub fn deletions(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind == LineKind::Delete)
            .count()
    }
}

/// The diff of a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Path in the new tree (old tree for deletions).
    pub path: String,
    /// Previous path for renames.
    pub old_path: Option<String>,
    /// Change status.
    pub status: FileStatus,
    /// Blob on the old side.
    pub old_id: Option<ObjectId>,
    /// Blob on the new side.
    pub new_id: Option<ObjectId>,
    /// Added line count.
    pub additions: usize,
    /// Deleted line count.
    pub deletions: usize,
    /// Whether either side looked binary; binary files carry no hunks.
    pub binary: bool,
    /// Line hunks.
    pub hunks: Vec<Hunk>,
}

/// Totals across a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    /// Number of files with any change.
    pub files_changed: usize,
    /// Total added lines.
    pub additions: usize,
    /// Total deleted lines.
    pub deletions: usize,
}

/// The diff between two commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitDiff {
    /// Old side commit; `None` for a root commit.
    pub from: Option<ObjectId>,
    /// New side commit.
    pub to: ObjectId,
    /// Per-file diffs sorted by path.
    pub files: Vec<FileDiff>,
    /// Totals.
    pub stats: DiffStats,
}

impl CommitDiff {
    /// Looks up a file diff by path.
    pub fn file(&self, path: &str) -> Option<&FileDiff> {
        self.files.iter().find(|f| f.path == path)
    }
}
