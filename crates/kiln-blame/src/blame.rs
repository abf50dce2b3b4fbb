//! Line attribution.

use crate::{BlameError, Result};
use kiln_storage::{Commit, ObjectId, Repository};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One line of a blamed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlameLine {
    /// 1-based line number in the current file.
    pub line_number: usize,
    /// Line content without the newline.
    pub content: String,
    /// Commit the line is attributed to.
    pub commit: ObjectId,
    /// True when this line starts a run attributed to one commit.
    pub is_first_line_of_commit_group: bool,
}

/// A version of the file and the commit that introduced it.
struct Version {
    commit: ObjectId,
    text: String,
}

pub(crate) fn blob_id_at(repo: &Repository, commit: &Commit, path: &str) -> Result<Option<ObjectId>> {
    Ok(repo
        .entry_at(&commit.tree, path)?
        .filter(|entry| !entry.is_tree())
        .map(|entry| entry.id))
}

/// Commits in `log` (newest first) that introduced a new version of `path`,
/// stopping where the file did not exist.
fn touching_versions(repo: &Repository, log: &[Commit], path: &str) -> Result<Vec<Version>> {
    let mut ids = Vec::new();
    for commit in log {
        match blob_id_at(repo, commit, path)? {
            Some(id) => ids.push((commit.id, id)),
            None => break,
        }
    }

    // A commit introduced its version when the next older one differs.
    let mut versions = Vec::new();
    for (i, (commit, blob)) in ids.iter().enumerate() {
        let older = ids.get(i + 1).map(|(_, id)| id);
        if older != Some(blob) {
            let text = repo.objects.get(blob)?.data.to_vec();
            versions.push(Version {
                commit: *commit,
                text: String::from_utf8_lossy(&text).into_owned(),
            });
        }
    }
    Ok(versions)
}

/// Attributes each line of `path` at `spec` to the commit that introduced it.
///
/// Looks at most `depth` commits back. Returns `None` when the file does
/// not exist at `spec`.
pub fn get_file_blame(
    repo: &Repository,
    spec: &str,
    path: &str,
    depth: usize,
) -> Result<Option<Vec<BlameLine>>> {
    let head = repo
        .resolve_commit(spec)?
        .ok_or_else(|| BlameError::RefNotFound(spec.to_string()))?;
    if blob_id_at(repo, &head, path)?.is_none() {
        return Ok(None);
    }

    let log = repo.log(&head.id.to_hex(), depth.max(1))?;
    let versions = touching_versions(repo, &log, path)?;
    let Some((current, _)) = versions.split_first() else {
        return Ok(None);
    };
    let current_lines: Vec<&str> = current.text.lines().collect();
    let mut owners: Vec<Option<ObjectId>> = vec![None; current_lines.len()];

    for pair in versions.windows(2) {
        let newer: HashSet<&str> = pair[0].text.lines().collect();
        let older: HashSet<&str> = pair[1].text.lines().collect();
        for (owner, line) in owners.iter_mut().zip(&current_lines) {
            if owner.is_none() && newer.contains(line) && !older.contains(line) {
                *owner = Some(pair[0].commit);
            }
        }
        if owners.iter().all(Option::is_some) {
            break;
        }
    }

    let oldest = versions.last().map(|v| v.commit).unwrap_or(current.commit);
    let mut previous = None;
    let lines: Vec<BlameLine> = current_lines
        .iter()
        .zip(owners)
        .enumerate()
        .map(|(i, (content, owner))| {
            let commit = owner.unwrap_or(oldest);
            let first = previous != Some(commit);
            previous = Some(commit);
            BlameLine {
                line_number: i + 1,
                content: content.to_string(),
                commit,
                is_first_line_of_commit_group: first,
            }
        })
        .collect();

    tracing::debug!(
        repo = %repo.name,
        path = %path,
        lines = lines.len(),
        versions = versions.len(),
        "Computed blame"
    );
    Ok(Some(lines))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use kiln_storage::{FileChange, Signature};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn every_line_owned_by_a_version_containing_it(
            versions in prop::collection::vec(
                prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d", "e"]), 1..8),
                1..6,
            )
        ) {
            let repo = Repository::in_memory("prop", "grace").unwrap();
            for (i, lines) in versions.iter().enumerate() {
                repo.commit_changes(
                    "main",
                    &[FileChange::write("f", lines.join("\n"))],
                    &Signature::new("Grace", "grace@example.com", i as i64),
                    "v",
                )
                .unwrap();
            }

            let blame = get_file_blame(&repo, "main", "f", 100).unwrap().unwrap();
            prop_assert_eq!(blame.len(), versions.last().unwrap().len());
            for line in &blame {
                let commit = repo.read_commit(&line.commit).unwrap().unwrap();
                let blob = repo.blob_at(&commit.tree, "f").unwrap().unwrap();
                prop_assert!(blob.text().lines().any(|l| l == line.content));
            }
        }
    }
}
