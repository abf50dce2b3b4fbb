//! Tree-to-tree change detection.

use crate::Result;
use kiln_storage::{load_tree, FlatEntry, ObjectId, ObjectStore, TreeEntry};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A path whose leaf entry differs between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
    /// Full slash-separated path.
    pub path: String,
    /// Entry in the old tree, if any.
    pub old: Option<FlatEntry>,
    /// Entry in the new tree, if any.
    pub new: Option<FlatEntry>,
    /// Original path when the change was paired as a rename.
    pub renamed_from: Option<String>,
}

fn entries(store: &ObjectStore, id: Option<ObjectId>) -> Result<BTreeMap<String, TreeEntry>> {
    let Some(id) = id else {
        return Ok(BTreeMap::new());
    };
    Ok(load_tree(store, &id)?
        .entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect())
}

fn leaf(entry: Option<&TreeEntry>) -> Option<FlatEntry> {
    entry.filter(|e| !e.is_tree()).map(|e| FlatEntry {
        id: e.id,
        mode: e.mode,
    })
}

/// Lists every leaf that differs between `old` and `new`, sorted by path.
///
/// `None` stands for the empty tree. Subtrees with equal ids on both sides
/// are skipped without being read.
pub fn diff_trees(
    store: &ObjectStore,
    old: Option<&ObjectId>,
    new: Option<&ObjectId>,
) -> Result<Vec<TreeChange>> {
    let mut changes = Vec::new();
    if old == new {
        return Ok(changes);
    }

    let mut stack = vec![(String::new(), old.copied(), new.copied())];
    while let Some((prefix, old_id, new_id)) = stack.pop() {
        let old_entries = entries(store, old_id)?;
        let new_entries = entries(store, new_id)?;
        let names: BTreeSet<&String> = old_entries.keys().chain(new_entries.keys()).collect();

        for name in names {
            let o = old_entries.get(name);
            let n = new_entries.get(name);
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };

            match (o, n) {
                (Some(o), Some(n)) if o.id == n.id && o.mode == n.mode => continue,
                (Some(o), Some(n)) if o.is_tree() && n.is_tree() => {
                    stack.push((path, Some(o.id), Some(n.id)));
                }
                _ => {
                    if let Some(o) = o.filter(|e| e.is_tree()) {
                        stack.push((path.clone(), Some(o.id), None));
                    }
                    if let Some(n) = n.filter(|e| e.is_tree()) {
                        stack.push((path.clone(), None, Some(n.id)));
                    }
                    let (old_leaf, new_leaf) = (leaf(o), leaf(n));
                    if old_leaf.is_some() || new_leaf.is_some() {
                        changes.push(TreeChange {
                            path,
                            old: old_leaf,
                            new: new_leaf,
                            renamed_from: None,
                        });
                    }
                }
            }
        }
    }

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(changes)
}

/// Pairs deletions with additions of the same blob as renames.
///
/// Additions are matched in path order against the first unmatched
/// deletion of the same id; a paired deletion is removed from the list.
pub fn pair_renames(changes: Vec<TreeChange>) -> Vec<TreeChange> {
    let mut deleted: HashMap<ObjectId, Vec<String>> = HashMap::new();
    for change in &changes {
        if let (Some(old), None) = (change.old, change.new) {
            deleted.entry(old.id).or_default().push(change.path.clone());
        }
    }
    for paths in deleted.values_mut() {
        paths.sort();
        paths.reverse();
    }

    let mut consumed = BTreeSet::new();
    let mut paired = Vec::with_capacity(changes.len());
    for mut change in changes.into_iter() {
        if let (None, Some(new)) = (change.old, change.new) {
            if let Some(from) = deleted.get_mut(&new.id).and_then(|paths| paths.pop()) {
                change.old = Some(FlatEntry {
                    id: new.id,
                    mode: new.mode,
                });
                consumed.insert(from.clone());
                change.renamed_from = Some(from);
            }
        }
        paired.push(change);
    }

    paired
        .into_iter()
        .filter(|c| !(c.new.is_none() && consumed.contains(&c.path)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_storage::{write_flat_tree, FlatTree, GitObject, MemoryAdapter, MODE_EXECUTABLE, MODE_FILE};
    use std::sync::Arc;

    fn store() -> ObjectStore {
        ObjectStore::new(Arc::new(MemoryAdapter::new()))
    }

    fn tree(store: &ObjectStore, files: &[(&str, &str)]) -> ObjectId {
        let mut flat = FlatTree::new();
        for (path, content) in files {
            let id = store
                .put(GitObject::blob(content.as_bytes().to_vec()))
                .unwrap();
            flat.insert(path.to_string(), FlatEntry { id, mode: MODE_FILE });
        }
        write_flat_tree(store, &flat).unwrap()
    }

    #[test]
    fn test_identical_trees() {
        let store = store();
        let id = tree(&store, &[("a", "1")]);
        assert!(diff_trees(&store, Some(&id), Some(&id)).unwrap().is_empty());
    }

    #[test]
    fn test_added_modified_deleted() {
        let store = store();
        let old = tree(&store, &[("keep", "k"), ("src/a.rs", "a"), ("gone", "g")]);
        let new = tree(&store, &[("keep", "k"), ("src/a.rs", "A"), ("src/b.rs", "b")]);
        let changes = diff_trees(&store, Some(&old), Some(&new)).unwrap();
        let summary: Vec<_> = changes
            .iter()
            .map(|c| (c.path.as_str(), c.old.is_some(), c.new.is_some()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("gone", true, false),
                ("src/a.rs", true, true),
                ("src/b.rs", false, true),
            ]
        );
    }

    #[test]
    fn test_against_empty_tree() {
        let store = store();
        let new = tree(&store, &[("dir/sub/file", "x"), ("top", "y")]);
        let changes = diff_trees(&store, None, Some(&new)).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "dir/sub/file");
        assert!(changes.iter().all(|c| c.old.is_none()));
    }

    #[test]
    fn test_file_replaced_by_directory() {
        let store = store();
        let old = tree(&store, &[("docs", "flat file")]);
        let new = tree(&store, &[("docs/index.md", "nested")]);
        let changes = diff_trees(&store, Some(&old), Some(&new)).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "docs");
        assert!(changes[0].new.is_none());
        assert_eq!(changes[1].path, "docs/index.md");
    }

    #[test]
    fn test_mode_change_is_reported() {
        let store = store();
        let blob = store.put(GitObject::blob(b"#!/bin/sh\n".to_vec())).unwrap();
        let mut flat = FlatTree::new();
        flat.insert("run.sh".to_string(), FlatEntry { id: blob, mode: MODE_FILE });
        let old = write_flat_tree(&store, &flat).unwrap();
        flat.insert("run.sh".to_string(), FlatEntry { id: blob, mode: MODE_EXECUTABLE });
        let new = write_flat_tree(&store, &flat).unwrap();

        let changes = diff_trees(&store, Some(&old), Some(&new)).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new.unwrap().mode, MODE_EXECUTABLE);
    }

    #[test]
    fn test_pair_renames() {
        let store = store();
        let old = tree(&store, &[("old.txt", "same"), ("other", "o")]);
        let new = tree(&store, &[("new.txt", "same"), ("other", "o2")]);
        let changes = pair_renames(diff_trees(&store, Some(&old), Some(&new)).unwrap());
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "new.txt");
        assert_eq!(changes[0].renamed_from.as_deref(), Some("old.txt"));
        assert_eq!(changes[1].path, "other");
        assert!(changes[1].renamed_from.is_none());
    }
}
