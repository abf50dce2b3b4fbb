//! Branch merges.

use crate::base::{find_merge_base, DEFAULT_MAX_VISITED};
use crate::tree::{merge_trees, ConflictPolicy};
use crate::{MergeError, Result};
use kiln_storage::{write_flat_tree, Commit, FlatTree, ObjectId, Repository, Signature};
use serde::{Deserialize, Serialize};

/// Merge settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions {
    /// How conflicting paths are handled.
    pub policy: ConflictPolicy,
    /// Cap on commits visited while searching for the merge base.
    pub max_visited: usize,
    /// Commit message; defaults to `Merge branch '<head>' into <base>`.
    pub message: Option<String>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::Fail,
            max_visited: DEFAULT_MAX_VISITED,
            message: None,
        }
    }
}

/// What a merge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The incoming branch is already contained in the target; nothing written.
    AlreadyUpToDate,
    /// A merge commit was written and the target branch advanced.
    Merged {
        /// The new merge commit.
        commit: ObjectId,
        /// Its tree.
        tree: ObjectId,
        /// The merge base used.
        base: ObjectId,
        /// Conflicting paths resolved by [`ConflictPolicy::TheirsWins`].
        resolved_conflicts: Vec<String>,
    },
    /// Conflicts under [`ConflictPolicy::Fail`]; nothing written.
    Conflicted {
        /// Conflicting paths, sorted.
        paths: Vec<String>,
    },
}

/// Flat, serializable view of a merge for API consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    /// True when the target now contains the incoming branch.
    pub success: bool,
    /// Tree of the merge commit.
    pub merged_tree_oid: Option<ObjectId>,
    /// The merge commit.
    pub merge_commit_oid: Option<ObjectId>,
    /// Conflicting paths, if any.
    pub conflicting_paths: Option<Vec<String>>,
    /// Error message when the merge could not run.
    pub error: Option<String>,
}

impl From<&MergeOutcome> for MergeResult {
    fn from(outcome: &MergeOutcome) -> Self {
        match outcome {
            MergeOutcome::AlreadyUpToDate => Self {
                success: true,
                ..Self::default()
            },
            MergeOutcome::Merged {
                commit,
                tree,
                resolved_conflicts,
                ..
            } => Self {
                success: true,
                merged_tree_oid: Some(*tree),
                merge_commit_oid: Some(*commit),
                conflicting_paths: (!resolved_conflicts.is_empty())
                    .then(|| resolved_conflicts.clone()),
                error: None,
            },
            MergeOutcome::Conflicted { paths } => Self {
                success: false,
                conflicting_paths: Some(paths.clone()),
                error: Some("merge conflicts".to_string()),
                ..Self::default()
            },
        }
    }
}

impl From<&Result<MergeOutcome>> for MergeResult {
    fn from(result: &Result<MergeOutcome>) -> Self {
        match result {
            Ok(outcome) => outcome.into(),
            Err(e) => Self {
                error: Some(e.to_string()),
                ..Self::default()
            },
        }
    }
}

fn branch_ref(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{}", name)
    }
}

fn commit_tree(repo: &Repository, id: &ObjectId) -> Result<FlatTree> {
    let commit = repo
        .read_commit(id)?
        .ok_or_else(|| MergeError::RefNotFound(id.to_hex()))?;
    Ok(repo.flatten_commit(&commit)?)
}

/// Merges `head_branch` into `base_branch`.
///
/// The merge commit has parents `[base tip, head tip]` and the base branch
/// moves by compare-and-swap from the tip that was read.
pub fn merge_branches(
    repo: &Repository,
    head_branch: &str,
    base_branch: &str,
    author: &Signature,
    options: &MergeOptions,
) -> Result<MergeOutcome> {
    let head_tip = repo
        .resolve_commit(head_branch)?
        .map(|commit| commit.id)
        .ok_or_else(|| MergeError::RefNotFound(head_branch.to_string()))?;
    let base_ref = branch_ref(base_branch);
    let base_tip = repo
        .refs
        .resolve(&base_ref)?
        .ok_or_else(|| MergeError::RefNotFound(base_branch.to_string()))?;

    if head_tip == base_tip || repo.is_ancestor(&head_tip, &base_tip)? {
        tracing::debug!(repo = %repo.name, head = %head_branch, base = %base_branch, "Already up to date");
        return Ok(MergeOutcome::AlreadyUpToDate);
    }

    let merge_base = find_merge_base(repo, &base_tip, &head_tip, options.max_visited)?.ok_or_else(
        || MergeError::NoMergeBase {
            head: head_branch.to_string(),
            base: base_branch.to_string(),
        },
    )?;

    let base_tree = commit_tree(repo, &merge_base)?;
    let ours = commit_tree(repo, &base_tip)?;
    let theirs = commit_tree(repo, &head_tip)?;
    let result = merge_trees(&base_tree, &ours, &theirs, options.policy);

    if !result.is_clean() && options.policy == ConflictPolicy::Fail {
        tracing::info!(
            repo = %repo.name,
            head = %head_branch,
            base = %base_branch,
            conflicts = result.conflicts.len(),
            "Merge stopped on conflicts"
        );
        return Ok(MergeOutcome::Conflicted {
            paths: result.conflicts,
        });
    }

    let tree = write_flat_tree(&repo.objects, &result.merged)?;
    let message = options
        .message
        .clone()
        .unwrap_or_else(|| format!("Merge branch '{}' into {}", head_branch, base_branch));
    let commit = repo.create_commit(tree, &[base_tip, head_tip], author, author, &message)?;

    if !repo
        .refs
        .update_ref(&base_ref, Some(base_tip), Some(commit))?
    {
        tracing::warn!(repo = %repo.name, base = %base_ref, "Merge lost a concurrent ref update");
        return Err(MergeError::RefUpdateRejected(base_ref));
    }

    tracing::info!(
        repo = %repo.name,
        head = %head_branch,
        base = %base_branch,
        commit = %commit,
        merge_base = %merge_base,
        resolved = result.conflicts.len(),
        "Merged branches"
    );
    Ok(MergeOutcome::Merged {
        commit,
        tree,
        base: merge_base,
        resolved_conflicts: result.conflicts,
    })
}

/// Reads back the merge commit of a [`MergeOutcome::Merged`].
pub fn merge_commit(repo: &Repository, outcome: &MergeOutcome) -> Result<Option<Commit>> {
    match outcome {
        MergeOutcome::Merged { commit, .. } => Ok(repo.read_commit(commit)?),
        _ => Ok(None),
    }
}
