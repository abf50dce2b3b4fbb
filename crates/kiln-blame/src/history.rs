//! Per-path commit history.

use crate::blame::blob_id_at;
use crate::{BlameError, Result};
use kiln_diff::diff_trees;
use kiln_storage::{Commit, ObjectId, Repository};
use serde::{Deserialize, Serialize};

/// How a commit changed a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChangeKind {
    /// The path appeared.
    Added,
    /// The path's content or mode changed.
    Modified,
    /// The path disappeared.
    Deleted,
    /// The path appeared with content removed from another path.
    Renamed {
        /// Previous path.
        from: String,
    },
}

/// One commit in a file's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistoryEntry {
    /// Commit id.
    pub commit: ObjectId,
    /// Change classification.
    pub change: ChangeKind,
    /// Blob at the path after the commit (`None` for deletions).
    pub blob: Option<ObjectId>,
    /// Author name.
    pub author: String,
    /// Author timestamp (unix seconds).
    pub timestamp: i64,
    /// First line of the commit message.
    pub summary: String,
}

impl FileHistoryEntry {
    fn new(commit: &Commit, change: ChangeKind, blob: Option<ObjectId>) -> Self {
        Self {
            commit: commit.id,
            change,
            blob,
            author: commit.author.name.clone(),
            timestamp: commit.author.timestamp,
            summary: commit.summary().to_string(),
        }
    }
}

fn start_log(repo: &Repository, spec: &str, depth: usize) -> Result<Vec<Commit>> {
    let head = repo
        .resolve_commit(spec)?
        .ok_or_else(|| BlameError::RefNotFound(spec.to_string()))?;
    Ok(repo.log(&head.id.to_hex(), depth)?)
}

/// Cheap history: one pass over the log recording the blob at `path`, then
/// a chronological pass classifying each change. Renames are not detected
/// and the oldest version seen counts as added.
pub fn file_history_fast(
    repo: &Repository,
    spec: &str,
    path: &str,
    depth: usize,
) -> Result<Vec<FileHistoryEntry>> {
    let log = start_log(repo, spec, depth)?;
    let mut seen = Vec::with_capacity(log.len());
    for commit in &log {
        seen.push(blob_id_at(repo, commit, path)?);
    }

    let mut entries = Vec::new();
    let mut last: Option<ObjectId> = None;
    for (commit, blob) in log.iter().zip(seen).rev() {
        if blob == last {
            continue;
        }
        let change = match (last, blob) {
            (None, _) => ChangeKind::Added,
            (Some(_), None) => ChangeKind::Deleted,
            (Some(_), Some(_)) => ChangeKind::Modified,
        };
        entries.push(FileHistoryEntry::new(commit, change, blob));
        last = blob;
    }
    entries.reverse();
    Ok(entries)
}

/// Accurate history: each commit is compared against its first parent, so
/// commits that leave `path` untouched are skipped regardless of log order,
/// and additions whose blob left another path in the same commit are
/// reported as renames.
pub fn file_history(
    repo: &Repository,
    spec: &str,
    path: &str,
    depth: usize,
) -> Result<Vec<FileHistoryEntry>> {
    let log = start_log(repo, spec, depth)?;
    let mut entries = Vec::new();

    for commit in &log {
        let parent = match commit.parents.first() {
            Some(id) => repo.read_commit(id)?,
            None => None,
        };
        let now = blob_id_at(repo, commit, path)?;
        let before = match &parent {
            Some(parent) => blob_id_at(repo, parent, path)?,
            None => None,
        };
        if now == before {
            continue;
        }

        let change = match (before, now) {
            (None, Some(blob)) => match renamed_from(repo, parent.as_ref(), commit, path, &blob)? {
                Some(from) => ChangeKind::Renamed { from },
                None => ChangeKind::Added,
            },
            (Some(_), None) => ChangeKind::Deleted,
            _ => ChangeKind::Modified,
        };
        entries.push(FileHistoryEntry::new(commit, change, now));
    }

    tracing::debug!(repo = %repo.name, path = %path, entries = entries.len(), "Computed file history");
    Ok(entries)
}

fn renamed_from(
    repo: &Repository,
    parent: Option<&Commit>,
    commit: &Commit,
    path: &str,
    blob: &ObjectId,
) -> Result<Option<String>> {
    let Some(parent) = parent else {
        return Ok(None);
    };
    let changes = diff_trees(&repo.objects, Some(&parent.tree), Some(&commit.tree))?;
    Ok(changes
        .into_iter()
        .find(|c| c.path != path && c.new.is_none() && c.old.map(|e| e.id) == Some(*blob))
        .map(|c| c.path))
}
