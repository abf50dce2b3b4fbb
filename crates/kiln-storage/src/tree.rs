//! Tree objects: parsing, encoding, flattening and rebuilding.

use crate::{GitObject, ObjectId, ObjectStore, ObjectType, Result, StorageError};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Mode of a regular file.
pub const MODE_FILE: u32 = 0o100644;
/// Mode of an executable file.
pub const MODE_EXECUTABLE: u32 = 0o100755;
/// Mode of a symbolic link.
pub const MODE_SYMLINK: u32 = 0o120000;
/// Mode of a subdirectory.
pub const MODE_TREE: u32 = 0o040000;
/// Mode of a submodule commit.
pub const MODE_GITLINK: u32 = 0o160000;

/// What a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// File content (regular, executable or symlink).
    Blob,
    /// Subdirectory.
    Tree,
    /// Submodule commit.
    Commit,
}

impl EntryKind {
    /// Derives the kind from a file mode.
    pub fn from_mode(mode: u32) -> Self {
        match mode {
            MODE_TREE => Self::Tree,
            MODE_GITLINK => Self::Commit,
            _ => Self::Blob,
        }
    }
}

/// A single tree entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// File mode.
    pub mode: u32,
    /// Entry name (a single path segment).
    pub name: String,
    /// Object the entry points at.
    pub id: ObjectId,
}

impl TreeEntry {
    /// Creates an entry.
    pub fn new(mode: u32, name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    /// Entry kind derived from the mode.
    pub fn kind(&self) -> EntryKind {
        EntryKind::from_mode(self.mode)
    }

    /// Returns true for subdirectories.
    pub fn is_tree(&self) -> bool {
        self.kind() == EntryKind::Tree
    }
}

/// Compares entry names the way git sorts trees: directories sort as if
/// their name ended in `/`.
pub fn git_name_cmp(a: &str, a_is_tree: bool, b: &str, b_is_tree: bool) -> Ordering {
    let a_suffix: &[u8] = if a_is_tree { b"/" } else { b"" };
    let b_suffix: &[u8] = if b_is_tree { b"/" } else { b"" };
    a.as_bytes()
        .iter()
        .chain(a_suffix)
        .cmp(b.as_bytes().iter().chain(b_suffix))
}

/// A parsed tree object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    /// Tree id (of the encoded form).
    pub id: ObjectId,
    /// Entries in git order.
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Builds a tree from unsorted entries, rejecting duplicate names.
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Result<Self> {
        for entry in &entries {
            if entry.name.is_empty() || entry.name.contains('/') || entry.name.contains('\0') {
                return Err(StorageError::InvalidObject(format!(
                    "invalid tree entry name: {:?}",
                    entry.name
                )));
            }
        }
        entries.sort_by(|a, b| git_name_cmp(&a.name, a.is_tree(), &b.name, b.is_tree()));
        let mut names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(StorageError::InvalidObject(format!(
                "duplicate tree entry: {}",
                pair[0]
            )));
        }
        let mut tree = Self {
            id: ObjectId::zero(),
            entries,
        };
        tree.id = ObjectId::hash_object(ObjectType::Tree, &tree.encode());
        Ok(tree)
    }

    /// Parses the binary tree format `<octal mode> <name>\0<20 bytes>`.
    pub fn parse(id: ObjectId, data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let space = data[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| StorageError::InvalidObject("tree entry missing mode".into()))?;
            let mode_str = std::str::from_utf8(&data[pos..pos + space])
                .map_err(|_| StorageError::InvalidObject("tree mode is not utf-8".into()))?;
            let mode = u32::from_str_radix(mode_str, 8)
                .map_err(|_| StorageError::InvalidObject(format!("bad tree mode {}", mode_str)))?;
            pos += space + 1;

            let nul = data[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| StorageError::InvalidObject("tree entry missing name".into()))?;
            // Names must round-trip byte for byte.
            let name = std::str::from_utf8(&data[pos..pos + nul])
                .map_err(|_| {
                    StorageError::InvalidObject(format!(
                        "tree entry name is not utf-8: {}",
                        hex::encode(&data[pos..pos + nul])
                    ))
                })?
                .to_string();
            pos += nul + 1;

            if pos + 20 > data.len() {
                return Err(StorageError::InvalidObject("truncated tree entry".into()));
            }
            let entry_id = ObjectId::from_slice(&data[pos..pos + 20])?;
            pos += 20;

            entries.push(TreeEntry::new(mode, name, entry_id));
        }
        Ok(Self { id, entries })
    }

    /// Encodes entries in git's binary format.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::new();
        for entry in &self.entries {
            data.extend_from_slice(format!("{:o} ", entry.mode).as_bytes());
            data.extend_from_slice(entry.name.as_bytes());
            data.push(0);
            data.extend_from_slice(entry.id.as_bytes());
        }
        data
    }

    /// Converts into a storable object.
    pub fn to_object(&self) -> GitObject {
        GitObject::new(ObjectType::Tree, self.encode())
    }

    /// Looks up an entry by name.
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// A leaf of a flattened tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlatEntry {
    /// Blob (or gitlink) id.
    pub id: ObjectId,
    /// File mode.
    pub mode: u32,
}

/// Every file in a tree keyed by its full slash-separated path.
pub type FlatTree = BTreeMap<String, FlatEntry>;

/// Reads and parses a tree object.
pub fn load_tree(store: &ObjectStore, id: &ObjectId) -> Result<Tree> {
    let object = store.get(id)?;
    if object.object_type != ObjectType::Tree {
        return Err(StorageError::InvalidObject(format!(
            "{} is a {}, not a tree",
            id, object.object_type
        )));
    }
    Tree::parse(*id, &object.data)
}

/// Flattens a tree into `path -> entry` using an explicit stack.
pub fn flatten_tree(store: &ObjectStore, root: &ObjectId) -> Result<FlatTree> {
    let mut flat = FlatTree::new();
    let mut stack = vec![(String::new(), *root)];
    while let Some((prefix, tree_id)) = stack.pop() {
        for entry in load_tree(store, &tree_id)?.entries {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", prefix, entry.name)
            };
            if entry.is_tree() {
                stack.push((path, entry.id));
            } else {
                flat.insert(
                    path,
                    FlatEntry {
                        id: entry.id,
                        mode: entry.mode,
                    },
                );
            }
        }
    }
    Ok(flat)
}

/// Writes a flattened tree back as nested tree objects, returning the root id.
///
/// Paths are grouped by their first segment; each group becomes either a
/// leaf entry or a subtree built from the remaining segments.
pub fn write_flat_tree(store: &ObjectStore, flat: &FlatTree) -> Result<ObjectId> {
    let items: Vec<(&str, FlatEntry)> = flat.iter().map(|(p, e)| (p.as_str(), *e)).collect();
    write_level(store, &items)
}

fn write_level(store: &ObjectStore, items: &[(&str, FlatEntry)]) -> Result<ObjectId> {
    let mut files = Vec::new();
    let mut dirs: BTreeMap<&str, Vec<(&str, FlatEntry)>> = BTreeMap::new();
    for (path, entry) in items {
        match path.split_once('/') {
            Some((dir, rest)) => dirs.entry(dir).or_default().push((rest, *entry)),
            None => files.push(TreeEntry::new(entry.mode, *path, entry.id)),
        }
    }
    for (dir, children) in dirs {
        let id = write_level(store, &children)?;
        files.push(TreeEntry::new(MODE_TREE, dir, id));
    }
    let tree = Tree::from_entries(files)?;
    store.put(tree.to_object())
}
