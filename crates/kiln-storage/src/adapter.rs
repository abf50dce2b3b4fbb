//! Storage adapter traits.
//!
//! The engine sees a repository as a small virtual filesystem rooted at the
//! repository's storage path. Anything that can read, write, delete, list
//! and stat slash-separated paths can host a repository.

use crate::Result;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    /// A regular file.
    File,
    /// A directory.
    Dir,
}

/// Result of [`StorageAdapter::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// File or directory.
    pub kind: StatKind,
    /// Size in bytes (0 for directories).
    pub len: u64,
}

/// Trait for hierarchical byte stores.
///
/// Paths are relative, slash-separated and never start with `/`.
pub trait StorageAdapter: Send + Sync {
    /// Reads a file, returning `None` when it does not exist.
    fn read(&self, path: &str) -> Result<Option<Bytes>>;

    /// Writes a file, creating parent directories as needed.
    fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Deletes a file. Returns whether something was removed.
    fn delete(&self, path: &str) -> Result<bool>;

    /// Lists the immediate children of a directory, sorted by name.
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Describes a path, or `None` when it does not exist.
    fn stat(&self, path: &str) -> Result<Option<Stat>>;

    /// Returns true if a file exists at `path`.
    fn exists(&self, path: &str) -> Result<bool> {
        Ok(matches!(
            self.stat(path)?,
            Some(Stat {
                kind: StatKind::File,
                ..
            })
        ))
    }
}

impl<T: StorageAdapter + ?Sized> StorageAdapter for Arc<T> {
    fn read(&self, path: &str) -> Result<Option<Bytes>> {
        (**self).read(path)
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        (**self).write(path, data)
    }

    fn delete(&self, path: &str) -> Result<bool> {
        (**self).delete(path)
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        (**self).list(dir)
    }

    fn stat(&self, path: &str) -> Result<Option<Stat>> {
        (**self).stat(path)
    }
}

/// An in-memory adapter. Directories are implied by file paths.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    files: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryAdapter {
    /// Creates an empty in-memory adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files.
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }
}

fn dir_prefix(dir: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir)
    }
}

impl StorageAdapter for MemoryAdapter {
    fn read(&self, path: &str) -> Result<Option<Bytes>> {
        Ok(self.files.read().get(path).cloned())
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        self.files
            .write()
            .insert(path.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.files.write().remove(path).is_some())
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = dir_prefix(dir);
        let files = self.files.read();
        let children: BTreeSet<String> = files
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| key[prefix.len()..].split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        Ok(children.into_iter().collect())
    }

    fn stat(&self, path: &str) -> Result<Option<Stat>> {
        let files = self.files.read();
        if let Some(data) = files.get(path) {
            return Ok(Some(Stat {
                kind: StatKind::File,
                len: data.len() as u64,
            }));
        }
        let prefix = dir_prefix(path);
        let is_dir = files
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix));
        Ok(is_dir.then_some(Stat {
            kind: StatKind::Dir,
            len: 0,
        }))
    }
}

/// A filesystem adapter rooted at a directory.
///
/// Writes land in a temporary sibling first and are renamed into place, so
/// a concurrent reader sees either the old or the new file.
#[derive(Debug)]
pub struct FsAdapter {
    root: PathBuf,
}

impl FsAdapter {
    /// Creates an adapter rooted at `root`, creating the directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

impl StorageAdapter for FsAdapter {
    fn read(&self, path: &str) -> Result<Option<Bytes>> {
        match fs::read(self.full_path(path)) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let target = self.full_path(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let dir = target.parent().unwrap_or(&self.root);
        // The temporary file removes itself when dropped on any error path.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        match fs::remove_file(self.full_path(path)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.full_path(dir)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if !name.starts_with(".tmp") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn stat(&self, path: &str) -> Result<Option<Stat>> {
        match fs::metadata(self.full_path(path)) {
            Ok(meta) if meta.is_dir() => Ok(Some(Stat {
                kind: StatKind::Dir,
                len: 0,
            })),
            Ok(meta) => Ok(Some(Stat {
                kind: StatKind::File,
                len: meta.len(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
