//! Commit and branch diffs.

use crate::lines::{build_hunks, edit_script, is_binary, split_lines, DiffOptions, Edit};
use crate::tree::{diff_trees, pair_renames, TreeChange};
use crate::types::{CommitDiff, DiffStats, FileDiff, FileStatus};
use crate::{DiffError, Result};
use kiln_storage::{Commit, EntryKind, FlatEntry, ObjectId, ObjectStore, Repository};

/// Reads one side of a change; a missing side is empty.
fn side_content(store: &ObjectStore, entry: Option<FlatEntry>) -> Result<Vec<u8>> {
    match entry {
        None => Ok(Vec::new()),
        Some(entry) if EntryKind::from_mode(entry.mode) == EntryKind::Commit => {
            Ok(format!("Subproject commit {}\n", entry.id).into_bytes())
        }
        Some(entry) => Ok(store.get(&entry.id)?.data.to_vec()),
    }
}

/// Diffs one changed path.
pub fn diff_file(
    store: &ObjectStore,
    change: &TreeChange,
    options: &DiffOptions,
) -> Result<FileDiff> {
    let status = match (&change.old, &change.new, &change.renamed_from) {
        (_, Some(_), Some(_)) => FileStatus::Renamed,
        (None, _, _) => FileStatus::Added,
        (_, None, _) => FileStatus::Deleted,
        _ => FileStatus::Modified,
    };
    let mut diff = FileDiff {
        path: change.path.clone(),
        old_path: change.renamed_from.clone(),
        status,
        old_id: change.old.map(|e| e.id),
        new_id: change.new.map(|e| e.id),
        additions: 0,
        deletions: 0,
        binary: false,
        hunks: Vec::new(),
    };

    // Same blob: a pure rename or a mode change.
    if change.old.map(|e| e.id) == change.new.map(|e| e.id) {
        return Ok(diff);
    }

    let old = side_content(store, change.old)?;
    let new = side_content(store, change.new)?;
    if is_binary(&old) || is_binary(&new) {
        diff.binary = true;
        return Ok(diff);
    }

    let old_text = String::from_utf8_lossy(&old);
    let new_text = String::from_utf8_lossy(&new);
    let old_lines = split_lines(&old_text);
    let new_lines = split_lines(&new_text);
    let edits = edit_script(&old_lines, &new_lines, options.max_cells);
    for edit in &edits {
        match edit {
            Edit::Insert { .. } => diff.additions += 1,
            Edit::Delete { .. } => diff.deletions += 1,
            Edit::Equal { .. } => {}
        }
    }
    diff.hunks = build_hunks(&old_lines, &new_lines, &edits, options.context);
    Ok(diff)
}

/// Diffs two trees (`None` is the empty tree) into per-file diffs.
pub fn diff_tree_files(
    store: &ObjectStore,
    old: Option<&ObjectId>,
    new: Option<&ObjectId>,
    options: &DiffOptions,
) -> Result<Vec<FileDiff>> {
    let changes = pair_renames(diff_trees(store, old, new)?);
    changes
        .iter()
        .map(|change| diff_file(store, change, options))
        .collect()
}

fn summarize(from: Option<ObjectId>, to: ObjectId, files: Vec<FileDiff>) -> CommitDiff {
    let stats = DiffStats {
        files_changed: files.len(),
        additions: files.iter().map(|f| f.additions).sum(),
        deletions: files.iter().map(|f| f.deletions).sum(),
    };
    tracing::debug!(
        from = ?from,
        to = %to,
        files = stats.files_changed,
        additions = stats.additions,
        deletions = stats.deletions,
        "Computed diff"
    );
    CommitDiff {
        from,
        to,
        files,
        stats,
    }
}

/// Diffs `to` against `from`; `None` diffs against the empty tree.
pub fn diff_commits(
    repo: &Repository,
    from: Option<&Commit>,
    to: &Commit,
    options: &DiffOptions,
) -> Result<CommitDiff> {
    let files = diff_tree_files(
        &repo.objects,
        from.map(|c| &c.tree),
        Some(&to.tree),
        options,
    )?;
    Ok(summarize(from.map(|c| c.id), to.id, files))
}

fn resolve(repo: &Repository, spec: &str) -> Result<Commit> {
    repo.resolve_commit(spec)?
        .ok_or_else(|| DiffError::RefNotFound(spec.to_string()))
}

/// Diffs a commit against its first parent. Root commits diff against the
/// empty tree.
pub fn get_commit_diff(repo: &Repository, spec: &str, options: &DiffOptions) -> Result<CommitDiff> {
    let commit = resolve(repo, spec)?;
    let parent = match commit.parents.first() {
        Some(parent) => Some(
            repo.read_commit(parent)?
                .ok_or_else(|| DiffError::RefNotFound(parent.to_hex()))?,
        ),
        None => None,
    };
    diff_commits(repo, parent.as_ref(), &commit, options)
}

/// Diffs the tip of `head` against the tip of `base`.
pub fn compare_branches(
    repo: &Repository,
    base: &str,
    head: &str,
    options: &DiffOptions,
) -> Result<CommitDiff> {
    let base = resolve(repo, base)?;
    let head = resolve(repo, head)?;
    diff_commits(repo, Some(&base), &head, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LineKind;
    use kiln_storage::{FileChange, Signature};

    fn sig(ts: i64) -> Signature {
        Signature::new("Dana", "dana@example.com", ts)
    }

    fn repo() -> Repository {
        Repository::in_memory("diffs", "dana").unwrap()
    }

    #[test]
    fn test_root_commit_diffs_against_empty_tree() {
        let repo = repo();
        repo.commit_changes(
            "main",
            &[FileChange::write("a.txt", "1\n2\n3\n")],
            &sig(1),
            "root",
        )
        .unwrap();

        let diff = get_commit_diff(&repo, "main", &DiffOptions::default()).unwrap();
        assert!(diff.from.is_none());
        assert_eq!(diff.files.len(), 1);
        let file = &diff.files[0];
        assert_eq!(file.status, FileStatus::Added);
        assert_eq!(file.additions, 3);
        assert_eq!(file.hunks.len(), 1);
        assert!(file.hunks[0].lines.iter().all(|l| l.kind == LineKind::Add));
    }

    #[test]
    fn test_modify_delete_and_rename() {
        let repo = repo();
        repo.commit_changes(
            "main",
            &[
                FileChange::write("keep.txt", "a\nb\n"),
                FileChange::write("drop.txt", "gone\n"),
                FileChange::write("move.txt", "moving\n"),
            ],
            &sig(1),
            "first",
        )
        .unwrap();
        repo.commit_changes(
            "main",
            &[
                FileChange::write("keep.txt", "a\nB\n"),
                FileChange::delete("drop.txt"),
                FileChange::delete("move.txt"),
                FileChange::write("moved/here.txt", "moving\n"),
            ],
            &sig(2),
            "second",
        )
        .unwrap();

        let diff = get_commit_diff(&repo, "HEAD", &DiffOptions::default()).unwrap();
        assert_eq!(diff.stats.files_changed, 3);
        assert_eq!(diff.file("drop.txt").unwrap().status, FileStatus::Deleted);
        assert_eq!(diff.file("drop.txt").unwrap().deletions, 1);
        let keep = diff.file("keep.txt").unwrap();
        assert_eq!(keep.status, FileStatus::Modified);
        assert_eq!((keep.additions, keep.deletions), (1, 1));
        let moved = diff.file("moved/here.txt").unwrap();
        assert_eq!(moved.status, FileStatus::Renamed);
        assert_eq!(moved.old_path.as_deref(), Some("move.txt"));
        assert!(moved.hunks.is_empty());
        assert!(diff.file("move.txt").is_none());
        assert_eq!(diff.stats.additions, 1);
        assert_eq!(diff.stats.deletions, 2);
    }

    #[test]
    fn test_binary_file_has_no_hunks() {
        let repo = repo();
        repo.commit_changes(
            "main",
            &[FileChange::write("logo.png", vec![0x89u8, b'P', 0, 1, 2])],
            &sig(1),
            "binary",
        )
        .unwrap();
        let diff = get_commit_diff(&repo, "main", &DiffOptions::default()).unwrap();
        let file = &diff.files[0];
        assert!(file.binary);
        assert!(file.hunks.is_empty());
        assert_eq!(file.additions, 0);
    }

    #[test]
    fn test_compare_branches() {
        let repo = repo();
        let base = repo
            .commit_changes("main", &[FileChange::write("f", "x\n")], &sig(1), "base")
            .unwrap();
        repo.create_branch("feature", base).unwrap();
        repo.commit_changes("feature", &[FileChange::write("f", "y\n")], &sig(2), "change")
            .unwrap();

        let diff = compare_branches(&repo, "main", "feature", &DiffOptions::default()).unwrap();
        assert_eq!(diff.from, Some(base));
        assert_eq!(diff.files.len(), 1);
        assert_eq!(diff.files[0].hunks[0].header(), "@@ -1,1 +1,1 @@");

        let same = compare_branches(&repo, "main", "main", &DiffOptions::default()).unwrap();
        assert!(same.files.is_empty());

        assert!(matches!(
            compare_branches(&repo, "main", "nope", &DiffOptions::default()),
            Err(DiffError::RefNotFound(_))
        ));
    }
}
