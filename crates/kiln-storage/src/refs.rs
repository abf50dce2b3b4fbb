//! Git reference management.
//!
//! Refs are files under `.git/` containing either `<oid>\n` or
//! `ref: <target>\n`. Every mutation goes through one lock per store so
//! that [`RefStore::update_ref`] is a real compare-and-swap.

use crate::{ObjectId, Result, StatKind, StorageAdapter, StorageError};
use parking_lot::Mutex;
use std::sync::Arc;

const GIT_DIR: &str = ".git";
const MAX_SYMREF_DEPTH: usize = 5;

/// A git reference (branch, tag, or symbolic ref).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Direct reference to an object.
    Direct(ObjectId),
    /// Symbolic reference (e.g., HEAD -> refs/heads/main).
    Symbolic(String),
}

impl Reference {
    /// Returns the object ID if this is a direct reference.
    pub fn as_direct(&self) -> Option<ObjectId> {
        match self {
            Self::Direct(id) => Some(*id),
            Self::Symbolic(_) => None,
        }
    }

    fn parse(name: &str, raw: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        if let Some(target) = text.strip_prefix("ref:") {
            return Ok(Self::Symbolic(target.trim().to_string()));
        }
        ObjectId::from_hex(text)
            .map(Self::Direct)
            .map_err(|_| StorageError::InvalidRef(format!("{}: unreadable value", name)))
    }

    fn encode(&self) -> String {
        match self {
            Self::Direct(id) => format!("{}\n", id),
            Self::Symbolic(target) => format!("ref: {}\n", target),
        }
    }
}

/// Checks that a ref name is safe to use as a storage path.
pub fn validate_ref_name(name: &str) -> Result<()> {
    let valid = (name == "HEAD" || name.starts_with("refs/"))
        && !name.ends_with('/')
        && !name.ends_with(".lock")
        && name.split('/').all(|segment| {
            !segment.is_empty() && segment != "." && segment != ".." && !segment.starts_with('.')
        })
        && !name
            .chars()
            .any(|c| c.is_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidRef(name.to_string()))
    }
}

/// Reference store over a [`StorageAdapter`].
pub struct RefStore {
    adapter: Arc<dyn StorageAdapter>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for RefStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefStore").finish_non_exhaustive()
    }
}

impl RefStore {
    /// Creates a reference store.
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            write_lock: Mutex::new(()),
        }
    }

    fn path(name: &str) -> String {
        format!("{}/{}", GIT_DIR, name)
    }

    /// Gets a reference by name.
    pub fn get(&self, name: &str) -> Result<Option<Reference>> {
        validate_ref_name(name)?;
        match self.adapter.read(&Self::path(name))? {
            Some(raw) => Reference::parse(name, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Sets a reference to point to an object, unconditionally.
    pub fn set(&self, name: &str, target: ObjectId) -> Result<()> {
        validate_ref_name(name)?;
        let _guard = self.write_lock.lock();
        self.write_raw(name, &Reference::Direct(target))
    }

    /// Sets a symbolic reference.
    pub fn set_symbolic(&self, name: &str, target: &str) -> Result<()> {
        validate_ref_name(name)?;
        validate_ref_name(target)?;
        let _guard = self.write_lock.lock();
        self.write_raw(name, &Reference::Symbolic(target.to_string()))
    }

    /// Deletes a reference. Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        validate_ref_name(name)?;
        let _guard = self.write_lock.lock();
        self.adapter.delete(&Self::path(name))
    }

    fn write_raw(&self, name: &str, reference: &Reference) -> Result<()> {
        self.adapter
            .write(&Self::path(name), reference.encode().as_bytes())
    }

    /// Follows symbolic refs to the name that holds a direct value.
    fn peel_name(&self, name: &str) -> Result<String> {
        let mut current = name.to_string();
        for _ in 0..MAX_SYMREF_DEPTH {
            match self.get(&current)? {
                Some(Reference::Symbolic(target)) => current = target,
                _ => return Ok(current),
            }
        }
        Err(StorageError::InvalidRef(format!(
            "{}: symbolic ref chain too deep",
            name
        )))
    }

    /// Resolves a reference to an object id, following symbolic refs.
    ///
    /// Returns `None` for a missing or dangling ref.
    pub fn resolve(&self, name: &str) -> Result<Option<ObjectId>> {
        let peeled = self.peel_name(name)?;
        Ok(self.get(&peeled)?.and_then(|r| r.as_direct()))
    }

    /// Atomically moves `name` from `expected` to `new`.
    ///
    /// `expected == None` requires the ref to be absent; `new == None`
    /// deletes it. Symbolic refs are updated at their final target.
    /// Returns `false`, without writing, when the current value differs
    /// from `expected`.
    pub fn update_ref(
        &self,
        name: &str,
        expected: Option<ObjectId>,
        new: Option<ObjectId>,
    ) -> Result<bool> {
        validate_ref_name(name)?;
        let _guard = self.write_lock.lock();

        let target = self.peel_name(name)?;
        let current = self.get(&target)?.and_then(|r| r.as_direct());
        if current != expected {
            tracing::debug!(
                name = %target,
                expected = ?expected,
                current = ?current,
                "Ref update rejected"
            );
            return Ok(false);
        }

        match new {
            Some(id) => self.write_raw(&target, &Reference::Direct(id))?,
            None => {
                self.adapter.delete(&Self::path(&target))?;
            }
        }
        Ok(true)
    }

    /// Lists direct references whose name starts with `prefix`, sorted by name.
    pub fn list(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>> {
        let dir = match prefix.rfind('/') {
            Some(pos) => &prefix[..pos],
            None => "refs",
        };
        let mut names = Vec::new();
        self.walk(dir, &mut names)?;
        names.retain(|name| name.starts_with(prefix));
        names.sort();

        let mut refs = Vec::with_capacity(names.len());
        for name in names {
            if let Some(Reference::Direct(id)) = self.get(&name)? {
                refs.push((name, id));
            }
        }
        Ok(refs)
    }

    fn walk(&self, dir: &str, out: &mut Vec<String>) -> Result<()> {
        let mut pending = vec![dir.to_string()];
        while let Some(dir) = pending.pop() {
            for child in self.adapter.list(&Self::path(&dir))? {
                let name = format!("{}/{}", dir, child);
                match self.adapter.stat(&Self::path(&name))? {
                    Some(stat) if stat.kind == StatKind::Dir => pending.push(name),
                    Some(_) if validate_ref_name(&name).is_ok() => out.push(name),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Gets the current branch name (if HEAD is symbolic to a branch).
    pub fn current_branch(&self) -> Result<Option<String>> {
        Ok(match self.get("HEAD")? {
            Some(Reference::Symbolic(target)) => {
                target.strip_prefix("refs/heads/").map(str::to_string)
            }
            _ => None,
        })
    }
}
