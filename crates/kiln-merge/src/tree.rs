//! Three-way merge of flattened trees.

use kiln_storage::{FlatEntry, FlatTree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What to do with paths both sides changed differently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Report the conflicts and write nothing.
    #[default]
    Fail,
    /// Take the incoming side for every conflicting path.
    TheirsWins,
}

/// Result of merging three flat trees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeMerge {
    /// Merged tree. Under [`ConflictPolicy::Fail`] conflicting paths keep
    /// our version.
    pub merged: FlatTree,
    /// Paths changed differently on both sides, sorted.
    pub conflicts: Vec<String>,
}

impl TreeMerge {
    /// Returns true if no path conflicted.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

fn pick(
    base: Option<FlatEntry>,
    ours: Option<FlatEntry>,
    theirs: Option<FlatEntry>,
) -> Result<Option<FlatEntry>, ()> {
    if ours == theirs {
        Ok(ours)
    } else if base == ours {
        Ok(theirs)
    } else if base == theirs {
        Ok(ours)
    } else {
        Err(())
    }
}

/// Merges `ours` and `theirs` against their common `base`.
///
/// Each path is classified independently: unchanged on one side takes the
/// other side, including deletions and additions; changed on both sides
/// to different results is a conflict. A file on one side that became a
/// directory on the other is also a conflict.
pub fn merge_trees(
    base: &FlatTree,
    ours: &FlatTree,
    theirs: &FlatTree,
    policy: ConflictPolicy,
) -> TreeMerge {
    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut merged = FlatTree::new();
    let mut conflicts = BTreeSet::new();

    for path in paths {
        let (b, o, t) = (
            base.get(path).copied(),
            ours.get(path).copied(),
            theirs.get(path).copied(),
        );
        let entry = match pick(b, o, t) {
            Ok(entry) => entry,
            Err(()) => {
                conflicts.insert(path.clone());
                match policy {
                    ConflictPolicy::Fail => o,
                    ConflictPolicy::TheirsWins => t,
                }
            }
        };
        if let Some(entry) = entry {
            merged.insert(path.clone(), entry);
        }
    }

    // A path kept as a file while another kept path lives below it.
    let collisions: Vec<(String, String)> = merged
        .keys()
        .filter_map(|path| {
            let dir = format!("{}/", path);
            merged
                .range(dir.clone()..)
                .next()
                .filter(|(child, _)| child.starts_with(&dir))
                .map(|(child, _)| (path.clone(), child.clone()))
        })
        .collect();
    for (file, child) in collisions {
        conflicts.insert(file.clone());
        if policy == ConflictPolicy::TheirsWins {
            let dir = format!("{}/", file);
            merged.retain(|path, entry| {
                let involved = *path == file || path.starts_with(&dir);
                !involved || theirs.get(path) == Some(entry)
            });
        }
        tracing::debug!(file = %file, child = %child, "File/directory collision");
    }

    TreeMerge {
        merged,
        conflicts: conflicts.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_storage::{ObjectId, MODE_EXECUTABLE, MODE_FILE};

    fn entry(byte: u8) -> FlatEntry {
        FlatEntry {
            id: ObjectId::from_bytes([byte; 20]),
            mode: MODE_FILE,
        }
    }

    fn flat(items: &[(&str, u8)]) -> FlatTree {
        items
            .iter()
            .map(|(path, byte)| (path.to_string(), entry(*byte)))
            .collect()
    }

    #[test]
    fn test_one_sided_changes_merge_cleanly() {
        let base = flat(&[("a", 1), ("b", 2), ("c", 3)]);
        let ours = flat(&[("a", 10), ("b", 2), ("c", 3), ("new-ours", 4)]);
        let theirs = flat(&[("a", 1), ("b", 20), ("new-theirs", 5)]);

        let result = merge_trees(&base, &ours, &theirs, ConflictPolicy::Fail);
        assert!(result.is_clean());
        assert_eq!(
            result.merged,
            flat(&[("a", 10), ("b", 20), ("new-ours", 4), ("new-theirs", 5)])
        );
    }

    #[test]
    fn test_same_change_on_both_sides() {
        let base = flat(&[("a", 1)]);
        let both = flat(&[("a", 2)]);
        let result = merge_trees(&base, &both, &both, ConflictPolicy::Fail);
        assert!(result.is_clean());
        assert_eq!(result.merged, both);
    }

    #[test]
    fn test_conflict_policies() {
        let base = flat(&[("a", 1), ("b", 1)]);
        let ours = flat(&[("a", 2), ("b", 1)]);
        let theirs = flat(&[("a", 3)]);

        let fail = merge_trees(&base, &ours, &theirs, ConflictPolicy::Fail);
        assert_eq!(fail.conflicts, vec!["a".to_string()]);
        assert_eq!(fail.merged.get("a"), Some(&entry(2)));
        assert!(fail.merged.get("b").is_none());

        let theirs_wins = merge_trees(&base, &ours, &theirs, ConflictPolicy::TheirsWins);
        assert_eq!(theirs_wins.conflicts, vec!["a".to_string()]);
        assert_eq!(theirs_wins.merged, flat(&[("a", 3)]));
    }

    #[test]
    fn test_modify_delete_conflict() {
        let base = flat(&[("a", 1)]);
        let ours = flat(&[("a", 2)]);
        let theirs = FlatTree::new();
        let result = merge_trees(&base, &ours, &theirs, ConflictPolicy::TheirsWins);
        assert_eq!(result.conflicts, vec!["a".to_string()]);
        assert!(result.merged.is_empty());
    }

    #[test]
    fn test_mode_only_change() {
        let base = flat(&[("run", 1)]);
        let mut theirs = base.clone();
        theirs.insert(
            "run".to_string(),
            FlatEntry {
                id: entry(1).id,
                mode: MODE_EXECUTABLE,
            },
        );
        let result = merge_trees(&base, &base, &theirs, ConflictPolicy::Fail);
        assert!(result.is_clean());
        assert_eq!(result.merged["run"].mode, MODE_EXECUTABLE);
    }

    #[test]
    fn test_file_directory_collision() {
        let base = FlatTree::new();
        let ours = flat(&[("docs", 1)]);
        let theirs = flat(&[("docs/index.md", 2)]);

        let fail = merge_trees(&base, &ours, &theirs, ConflictPolicy::Fail);
        assert_eq!(fail.conflicts, vec!["docs".to_string()]);

        let resolved = merge_trees(&base, &ours, &theirs, ConflictPolicy::TheirsWins);
        assert_eq!(resolved.merged, theirs);
    }
}
