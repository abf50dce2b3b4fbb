//! Repository facade and registry.
//!
//! [`Repository`] exposes the git-level operations every other crate
//! builds on: ref resolution, log traversal, tree and blob reads, and
//! commit creation. [`RepoStore`] keeps repositories keyed by
//! `owner/name`, either in memory or under a directory on disk.

use crate::commit::tag_target;
use crate::tree::{flatten_tree, load_tree, write_flat_tree, FlatEntry, FlatTree, MODE_FILE};
use crate::{
    Blob, Commit, EntryKind, FsAdapter, GitObject, MemoryAdapter, ObjectId, ObjectStore,
    ObjectType, RefStore, Result, Signature, StatKind, StorageAdapter, StorageError, Tree,
    TreeEntry,
};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

const HEADS: &str = "refs/heads/";
const TAGS: &str = "refs/tags/";
const MAX_TAG_DEPTH: usize = 5;
const SETTINGS_PATH: &str = ".git/kiln.json";

/// A branch as listed by [`Repository::list_branches`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Short branch name (without `refs/heads/`).
    pub name: String,
    /// Tip commit.
    pub id: ObjectId,
}

/// A tag as listed by [`Repository::list_tags`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Short tag name (without `refs/tags/`).
    pub name: String,
    /// Tagged object (an annotated tag object or a commit).
    pub id: ObjectId,
}

/// A single path edit applied by [`Repository::commit_changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    /// Create or replace a file.
    Write {
        /// Slash-separated path.
        path: String,
        /// New content.
        content: Bytes,
        /// File mode.
        mode: u32,
    },
    /// Remove a file, or every file below a directory.
    Delete {
        /// Slash-separated path.
        path: String,
    },
}

impl FileChange {
    /// Writes a regular file.
    pub fn write(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self::Write {
            path: path.into(),
            content: content.into(),
            mode: MODE_FILE,
        }
    }

    /// Deletes a path.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::Delete { path: path.into() }
    }
}

/// Server-side settings kept next to the repository data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoSettings {
    /// Readable only by the owner and collaborators.
    pub private: bool,
}

/// A repository containing objects and references.
pub struct Repository {
    /// Repository name.
    pub name: String,
    /// Repository owner.
    pub owner: String,
    /// Object store.
    pub objects: Arc<ObjectStore>,
    /// Reference store.
    pub refs: Arc<RefStore>,
    adapter: Arc<dyn StorageAdapter>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Opens a repository over a storage adapter without touching its refs.
    pub fn open(
        name: impl Into<String>,
        owner: impl Into<String>,
        adapter: Arc<dyn StorageAdapter>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            objects: Arc::new(ObjectStore::new(adapter.clone())),
            refs: Arc::new(RefStore::new(adapter.clone())),
            adapter,
        }
    }

    /// Creates an empty in-memory repository with `HEAD -> refs/heads/main`.
    pub fn in_memory(name: impl Into<String>, owner: impl Into<String>) -> Result<Self> {
        let repo = Self::open(name, owner, Arc::new(MemoryAdapter::new()));
        repo.init("main")?;
        Ok(repo)
    }

    /// Points `HEAD` at `refs/heads/<default_branch>`.
    pub fn init(&self, default_branch: &str) -> Result<()> {
        self.refs
            .set_symbolic("HEAD", &format!("{}{}", HEADS, default_branch))
    }

    /// Reads the repository settings; a missing file means defaults.
    pub fn settings(&self) -> Result<RepoSettings> {
        match self.adapter.read(SETTINGS_PATH)? {
            Some(data) => serde_json::from_slice(&data).map_err(|e| {
                StorageError::Corruption(format!("{}: {}", SETTINGS_PATH, e))
            }),
            None => Ok(RepoSettings::default()),
        }
    }

    /// Replaces the repository settings.
    pub fn save_settings(&self, settings: &RepoSettings) -> Result<()> {
        let data = serde_json::to_vec_pretty(settings)
            .map_err(|e| StorageError::InvalidObject(e.to_string()))?;
        self.adapter.write(SETTINGS_PATH, &data)
    }

    /// Marks the repository private or public.
    pub fn set_private(&self, private: bool) -> Result<()> {
        let mut settings = self.settings()?;
        settings.private = private;
        self.save_settings(&settings)?;
        tracing::debug!(owner = %self.owner, name = %self.name, private, "Visibility updated");
        Ok(())
    }

    /// Gets the current branch name.
    pub fn current_branch(&self) -> Result<Option<String>> {
        self.refs.current_branch()
    }

    /// Gets the commit `HEAD` points at, if any.
    pub fn head(&self) -> Result<Option<ObjectId>> {
        self.refs.resolve("HEAD")
    }

    /// Lists branches sorted by name.
    pub fn list_branches(&self) -> Result<Vec<Branch>> {
        Ok(self
            .refs
            .list(HEADS)?
            .into_iter()
            .map(|(name, id)| Branch {
                name: name[HEADS.len()..].to_string(),
                id,
            })
            .collect())
    }

    /// Lists tags sorted by name.
    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        Ok(self
            .refs
            .list(TAGS)?
            .into_iter()
            .map(|(name, id)| Tag {
                name: name[TAGS.len()..].to_string(),
                id,
            })
            .collect())
    }

    /// Returns true when the repository has no branches.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.refs.list(HEADS)?.is_empty())
    }

    /// Resolves `HEAD`, a full ref name, a short branch or tag name, or a
    /// full hex object id. Anything unresolvable yields `None`.
    pub fn resolve_ref(&self, spec: &str) -> Option<ObjectId> {
        let spec = spec.trim();
        if spec.len() == ObjectId::HEX_LEN {
            if let Ok(id) = ObjectId::from_hex(spec) {
                return self.objects.contains(&id).ok()?.then_some(id);
            }
        }

        let candidates = if spec == "HEAD" || spec.starts_with("refs/") {
            vec![spec.to_string()]
        } else {
            vec![format!("{}{}", HEADS, spec), format!("{}{}", TAGS, spec)]
        };
        candidates
            .iter()
            .find_map(|name| self.refs.resolve(name).ok().flatten())
    }

    /// Resolves a ref to a commit, peeling annotated tags.
    pub fn resolve_commit(&self, spec: &str) -> Result<Option<Commit>> {
        let Some(mut id) = self.resolve_ref(spec) else {
            return Ok(None);
        };
        for _ in 0..MAX_TAG_DEPTH {
            let Some(object) = self.objects.try_get(&id)? else {
                return Ok(None);
            };
            match object.object_type {
                ObjectType::Commit => return Commit::parse(id, &object.data).map(Some),
                ObjectType::Tag => match tag_target(&object.data) {
                    Some(target) => id = target,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            }
        }
        Ok(None)
    }

    /// Reads a commit by id. Returns `None` if absent or not a commit.
    pub fn read_commit(&self, id: &ObjectId) -> Result<Option<Commit>> {
        match self.objects.try_get(id)? {
            Some(object) if object.object_type == ObjectType::Commit => {
                Commit::parse(*id, &object.data).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Returns up to `depth` commits reachable from `spec`, newest first.
    ///
    /// All parents are followed; each commit appears once. Ordering is by
    /// committer time, ties broken by discovery order.
    pub fn log(&self, spec: &str, depth: usize) -> Result<Vec<Commit>> {
        let Some(start) = self.resolve_commit(spec)? else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::from([start.id]);
        let mut pending: HashMap<ObjectId, Commit> = HashMap::new();
        let mut queue = BinaryHeap::new();
        let mut seq = 0u64;
        queue.push((start.committer.timestamp, Reverse(seq), start.id));
        pending.insert(start.id, start);

        let mut commits = Vec::new();
        while commits.len() < depth {
            let Some((_, _, id)) = queue.pop() else {
                break;
            };
            let Some(commit) = pending.remove(&id) else {
                continue;
            };
            for parent in &commit.parents {
                if !seen.insert(*parent) {
                    continue;
                }
                // Parents missing from a shallow push end the walk on that side.
                if let Some(parent_commit) = self.read_commit(parent)? {
                    seq += 1;
                    queue.push((parent_commit.committer.timestamp, Reverse(seq), *parent));
                    pending.insert(*parent, parent_commit);
                }
            }
            commits.push(commit);
        }
        Ok(commits)
    }

    /// Finds the entry at `path` below a tree. An empty path is not an entry.
    pub fn entry_at(&self, tree: &ObjectId, path: &str) -> Result<Option<TreeEntry>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, dirs)) = segments.split_last() else {
            return Ok(None);
        };
        let mut current = *tree;
        for dir in dirs {
            match load_tree(&self.objects, &current)?.get(dir) {
                Some(entry) if entry.is_tree() => current = entry.id,
                _ => return Ok(None),
            }
        }
        Ok(load_tree(&self.objects, &current)?.get(last).cloned())
    }

    /// Reads the tree at `path` in the commit `spec` resolves to.
    pub fn read_tree(&self, spec: &str, path: &str) -> Result<Option<Tree>> {
        let Some(commit) = self.resolve_commit(spec)? else {
            return Ok(None);
        };
        if path.trim_matches('/').is_empty() {
            return load_tree(&self.objects, &commit.tree).map(Some);
        }
        match self.entry_at(&commit.tree, path)? {
            Some(entry) if entry.is_tree() => load_tree(&self.objects, &entry.id).map(Some),
            _ => Ok(None),
        }
    }

    /// Reads the blob at `path` in the commit `spec` resolves to.
    pub fn read_blob(&self, spec: &str, path: &str) -> Result<Option<Blob>> {
        let Some(commit) = self.resolve_commit(spec)? else {
            return Ok(None);
        };
        self.blob_at(&commit.tree, path)
    }

    /// Reads the blob at `path` below a tree.
    pub fn blob_at(&self, tree: &ObjectId, path: &str) -> Result<Option<Blob>> {
        match self.entry_at(tree, path)? {
            Some(entry) if entry.kind() == EntryKind::Blob => {
                let object = self.objects.get(&entry.id)?;
                Ok(Some(Blob {
                    id: entry.id,
                    content: object.data,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Flattens a commit's tree into `path -> entry`.
    pub fn flatten_commit(&self, commit: &Commit) -> Result<FlatTree> {
        flatten_tree(&self.objects, &commit.tree)
    }

    /// Writes a commit object without moving any ref.
    pub fn create_commit(
        &self,
        tree: ObjectId,
        parents: &[ObjectId],
        author: &Signature,
        committer: &Signature,
        message: &str,
    ) -> Result<ObjectId> {
        if !self.objects.contains(&tree)? {
            return Err(StorageError::ObjectNotFound(tree.to_hex()));
        }
        self.objects
            .put(Commit::build(tree, parents, author, committer, message))
    }

    /// Applies `changes` on top of `branch` and commits the result.
    ///
    /// A missing branch is created with a root commit. The branch moves by
    /// compare-and-swap from the tip that was read.
    pub fn commit_changes(
        &self,
        branch: &str,
        changes: &[FileChange],
        author: &Signature,
        message: &str,
    ) -> Result<ObjectId> {
        let ref_name = format!("{}{}", HEADS, branch);
        let tip = self.refs.resolve(&ref_name)?;
        let mut flat = match tip {
            Some(tip) => match self.read_commit(&tip)? {
                Some(commit) => self.flatten_commit(&commit)?,
                None => return Err(StorageError::ObjectNotFound(tip.to_hex())),
            },
            None => FlatTree::new(),
        };

        for change in changes {
            match change {
                FileChange::Write {
                    path,
                    content,
                    mode,
                } => {
                    let path = normalize_path(path)?;
                    let id = self.objects.put(GitObject::blob(content.clone()))?;
                    flat.insert(path, FlatEntry { id, mode: *mode });
                }
                FileChange::Delete { path } => {
                    let path = normalize_path(path)?;
                    let dir = format!("{}/", path);
                    flat.retain(|p, _| *p != path && !p.starts_with(&dir));
                }
            }
        }

        let tree = write_flat_tree(&self.objects, &flat)?;
        let parents: Vec<ObjectId> = tip.into_iter().collect();
        let commit = self.create_commit(tree, &parents, author, author, message)?;
        if !self.refs.update_ref(&ref_name, tip, Some(commit))? {
            return Err(StorageError::RefUpdateRejected(ref_name));
        }
        tracing::debug!(
            repo = %self.name,
            branch = %branch,
            commit = %commit,
            changes = changes.len(),
            "Committed changes"
        );
        Ok(commit)
    }

    /// Creates the first commit with a README and advances the current branch.
    pub fn create_initial_commit(
        &self,
        name: &str,
        description: &str,
        author: &Signature,
    ) -> Result<ObjectId> {
        let branch = self
            .current_branch()?
            .unwrap_or_else(|| "main".to_string());
        if self.refs.resolve(&format!("{}{}", HEADS, branch))?.is_some() {
            return Err(StorageError::RefUpdateRejected(format!(
                "{}{} already has commits",
                HEADS, branch
            )));
        }
        let readme = format!("# {}\n\n{}\n", name, description);
        self.commit_changes(
            &branch,
            &[FileChange::write("README.md", readme.into_bytes())],
            author,
            "Initial commit",
        )
    }

    /// Creates a branch at `target`. Fails if the branch exists.
    pub fn create_branch(&self, name: &str, target: ObjectId) -> Result<()> {
        self.create_ref(&format!("{}{}", HEADS, name), target)
    }

    /// Creates a lightweight tag at `target`. Fails if the tag exists.
    pub fn create_tag(&self, name: &str, target: ObjectId) -> Result<()> {
        self.create_ref(&format!("{}{}", TAGS, name), target)
    }

    fn create_ref(&self, ref_name: &str, target: ObjectId) -> Result<()> {
        if !self.objects.contains(&target)? {
            return Err(StorageError::ObjectNotFound(target.to_hex()));
        }
        if !self.refs.update_ref(ref_name, None, Some(target))? {
            return Err(StorageError::RefUpdateRejected(ref_name.to_string()));
        }
        Ok(())
    }

    /// Deletes a branch. Returns whether it existed.
    pub fn delete_branch(&self, name: &str) -> Result<bool> {
        self.refs.delete(&format!("{}{}", HEADS, name))
    }

    /// Deletes a tag. Returns whether it existed.
    pub fn delete_tag(&self, name: &str) -> Result<bool> {
        self.refs.delete(&format!("{}{}", TAGS, name))
    }

    /// Returns true if `ancestor` is reachable from `descendant` (or equal).
    pub fn is_ancestor(&self, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool> {
        let mut seen = HashSet::from([*descendant]);
        let mut queue = VecDeque::from([*descendant]);
        while let Some(id) = queue.pop_front() {
            if id == *ancestor {
                return Ok(true);
            }
            if let Some(commit) = self.read_commit(&id)? {
                for parent in commit.parents {
                    if seen.insert(parent) {
                        queue.push_back(parent);
                    }
                }
            }
        }
        Ok(false)
    }
}

fn normalize_path(path: &str) -> Result<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == ".." || *s == ".git") {
        return Err(StorageError::InvalidName(path.to_string()));
    }
    Ok(segments.join("/"))
}

fn validate_repo_segment(segment: &str) -> Result<()> {
    let valid = !segment.is_empty()
        && segment.len() <= 100
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(segment.to_string()))
    }
}

/// Where a [`RepoStore`] keeps repository data.
#[derive(Debug, Clone)]
enum Backing {
    Memory,
    Filesystem(PathBuf),
}

/// Store of repositories keyed by `owner/name`.
#[derive(Debug)]
pub struct RepoStore {
    backing: Backing,
    repos: RwLock<HashMap<String, Arc<Repository>>>,
}

impl Default for RepoStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl RepoStore {
    /// Creates an empty in-memory store.
    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory,
            repos: RwLock::new(HashMap::new()),
        }
    }

    /// Opens a store under `root`, loading every `<owner>/<name>` that
    /// already has a `.git/HEAD`.
    pub fn on_disk(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let scan = FsAdapter::new(&root)?;
        let mut repos = HashMap::new();
        for owner in scan.list("")? {
            if scan.stat(&owner)?.map(|s| s.kind) != Some(StatKind::Dir) {
                continue;
            }
            for name in scan.list(&owner)? {
                if !scan.exists(&format!("{}/{}/.git/HEAD", owner, name))? {
                    continue;
                }
                let adapter = FsAdapter::new(root.join(&owner).join(&name))?;
                let repo = Repository::open(name.clone(), owner.clone(), Arc::new(adapter));
                repos.insert(format!("{}/{}", owner, name), Arc::new(repo));
            }
        }
        tracing::info!(root = %root.display(), repos = repos.len(), "Opened repository store");
        Ok(Self {
            backing: Backing::Filesystem(root),
            repos: RwLock::new(repos),
        })
    }

    /// Creates a new repository with `HEAD` on `default_branch`.
    pub fn create(&self, owner: &str, name: &str, default_branch: &str) -> Result<Arc<Repository>> {
        validate_repo_segment(owner)?;
        validate_repo_segment(name)?;
        let key = format!("{}/{}", owner, name);

        let mut repos = self.repos.write();
        if repos.contains_key(&key) {
            return Err(StorageError::RepoExists(key));
        }

        let adapter: Arc<dyn StorageAdapter> = match &self.backing {
            Backing::Memory => Arc::new(MemoryAdapter::new()),
            Backing::Filesystem(root) => Arc::new(FsAdapter::new(root.join(owner).join(name))?),
        };
        let repo = Repository::open(name, owner, adapter);
        repo.init(default_branch)?;

        let repo = Arc::new(repo);
        repos.insert(key.clone(), repo.clone());
        tracing::info!(repo = %key, "Created repository");
        Ok(repo)
    }

    /// Gets a repository by owner and name.
    pub fn get(&self, owner: &str, name: &str) -> Result<Arc<Repository>> {
        let key = format!("{}/{}", owner, name);
        self.repos
            .read()
            .get(&key)
            .cloned()
            .ok_or(StorageError::RepoNotFound(key))
    }

    /// Lists all repositories sorted by `owner/name`.
    pub fn list(&self) -> Vec<Arc<Repository>> {
        let mut repos: Vec<_> = self.repos.read().values().cloned().collect();
        repos.sort_by(|a, b| (&a.owner, &a.name).cmp(&(&b.owner, &b.name)));
        repos
    }

    /// Lists repositories by owner.
    pub fn list_by_owner(&self, owner: &str) -> Vec<Arc<Repository>> {
        self.list()
            .into_iter()
            .filter(|repo| repo.owner == owner)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice_at(timestamp: i64) -> Signature {
        Signature::new("Alice", "alice@example.com", timestamp)
    }

    fn repo() -> Repository {
        Repository::in_memory("test-repo", "alice").unwrap()
    }

    #[test]
    fn test_new_repository_is_empty() {
        let repo = repo();
        assert!(repo.is_empty().unwrap());
        assert_eq!(repo.current_branch().unwrap(), Some("main".to_string()));
        assert!(repo.head().unwrap().is_none());
        assert!(repo.log("HEAD", 10).unwrap().is_empty());
        assert!(repo.read_blob("main", "README.md").unwrap().is_none());
    }

    #[test]
    fn test_initial_commit() {
        let repo = repo();
        let id = repo
            .create_initial_commit("kiln", "A git server", &alice_at(100))
            .unwrap();

        assert!(!repo.is_empty().unwrap());
        assert_eq!(repo.head().unwrap(), Some(id));
        let readme = repo.read_blob("HEAD", "README.md").unwrap().unwrap();
        assert_eq!(readme.text(), "# kiln\n\nA git server\n");

        let commit = repo.read_commit(&id).unwrap().unwrap();
        assert!(commit.is_root());
        assert_eq!(commit.summary(), "Initial commit");

        // A second initial commit would rewrite history.
        assert!(repo
            .create_initial_commit("kiln", "again", &alice_at(101))
            .is_err());
    }

    #[test]
    fn test_log_newest_first() {
        let repo = repo();
        repo.commit_changes("main", &[FileChange::write("README.md", "v1")], &alice_at(100), "one")
            .unwrap();
        let second = repo
            .commit_changes("main", &[FileChange::write("README.md", "v2")], &alice_at(200), "two")
            .unwrap();

        let log = repo.log("main", 10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, second);
        assert_eq!(log[0].summary(), "two");
        assert_eq!(log[1].summary(), "one");
        assert!(log[1].is_root());

        assert_eq!(repo.log("main", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_log_visits_merge_parents_once() {
        let repo = repo();
        let base = repo
            .commit_changes("main", &[FileChange::write("a", "1")], &alice_at(100), "base")
            .unwrap();
        repo.create_branch("topic", base).unwrap();
        let left = repo
            .commit_changes("main", &[FileChange::write("b", "2")], &alice_at(200), "left")
            .unwrap();
        let right = repo
            .commit_changes("topic", &[FileChange::write("c", "3")], &alice_at(300), "right")
            .unwrap();
        let tree = repo.read_commit(&left).unwrap().unwrap().tree;
        let merge = repo
            .create_commit(tree, &[left, right], &alice_at(400), &alice_at(400), "merge")
            .unwrap();

        let log = repo.log(&merge.to_hex(), 10).unwrap();
        let summaries: Vec<_> = log.iter().map(|c| c.summary().to_string()).collect();
        assert_eq!(summaries, vec!["merge", "right", "left", "base"]);
    }

    #[test]
    fn test_resolve_ref_forms() {
        let repo = repo();
        let id = repo
            .commit_changes("main", &[FileChange::write("f", "x")], &alice_at(1), "c")
            .unwrap();
        repo.create_tag("v1.0", id).unwrap();

        assert_eq!(repo.resolve_ref("HEAD"), Some(id));
        assert_eq!(repo.resolve_ref("main"), Some(id));
        assert_eq!(repo.resolve_ref("refs/heads/main"), Some(id));
        assert_eq!(repo.resolve_ref("v1.0"), Some(id));
        assert_eq!(repo.resolve_ref(&id.to_hex()), Some(id));

        assert_eq!(repo.resolve_ref("nope"), None);
        assert_eq!(repo.resolve_ref("../../etc/passwd"), None);
        assert_eq!(repo.resolve_ref(&"ab".repeat(20)), None);
    }

    #[test]
    fn test_read_tree_and_blob_paths() {
        let repo = repo();
        repo.commit_changes(
            "main",
            &[
                FileChange::write("src/lib.rs", "pub fn a() {}\n"),
                FileChange::write("src/bin/main.rs", "fn main() {}\n"),
                FileChange::write("README.md", "hi\n"),
            ],
            &alice_at(1),
            "c",
        )
        .unwrap();

        let root = repo.read_tree("main", "").unwrap().unwrap();
        let names: Vec<_> = root.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["README.md", "src"]);

        let src = repo.read_tree("main", "src").unwrap().unwrap();
        assert_eq!(src.entries.len(), 2);

        let blob = repo.read_blob("main", "src/bin/main.rs").unwrap().unwrap();
        assert_eq!(blob.content.as_ref(), b"fn main() {}\n");

        assert!(repo.read_blob("main", "src").unwrap().is_none());
        assert!(repo.read_tree("main", "README.md").unwrap().is_none());
        assert!(repo.read_blob("main", "missing/file").unwrap().is_none());
        assert!(repo.read_blob("README.md/x", "a").unwrap().is_none());
    }

    #[test]
    fn test_commit_changes_delete_directory() {
        let repo = repo();
        repo.commit_changes(
            "main",
            &[
                FileChange::write("docs/a.md", "a"),
                FileChange::write("docs/b.md", "b"),
                FileChange::write("keep.txt", "k"),
            ],
            &alice_at(1),
            "add",
        )
        .unwrap();
        repo.commit_changes("main", &[FileChange::delete("docs")], &alice_at(2), "rm")
            .unwrap();

        assert!(repo.read_tree("main", "docs").unwrap().is_none());
        assert!(repo.read_blob("main", "keep.txt").unwrap().is_some());
        assert!(repo
            .commit_changes("main", &[FileChange::write("../x", "y")], &alice_at(3), "bad")
            .is_err());
    }

    #[test]
    fn test_branches_and_tags() {
        let repo = repo();
        let id = repo
            .commit_changes("main", &[FileChange::write("f", "x")], &alice_at(1), "c")
            .unwrap();
        repo.create_branch("feature", id).unwrap();
        repo.create_tag("v1", id).unwrap();
        assert!(repo.create_branch("feature", id).is_err());
        assert!(repo
            .create_branch("ghost", ObjectId::from_bytes([5u8; 20]))
            .is_err());

        let branches: Vec<_> = repo
            .list_branches()
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(branches, vec!["feature", "main"]);
        assert_eq!(repo.list_tags().unwrap()[0].name, "v1");

        assert!(repo.delete_branch("feature").unwrap());
        assert!(repo.delete_tag("v1").unwrap());
        assert!(!repo.delete_tag("v1").unwrap());
        assert_eq!(repo.list_branches().unwrap().len(), 1);
    }

    #[test]
    fn test_is_ancestor() {
        let repo = repo();
        let a = repo
            .commit_changes("main", &[FileChange::write("f", "1")], &alice_at(1), "a")
            .unwrap();
        let b = repo
            .commit_changes("main", &[FileChange::write("f", "2")], &alice_at(2), "b")
            .unwrap();
        assert!(repo.is_ancestor(&a, &b).unwrap());
        assert!(repo.is_ancestor(&b, &b).unwrap());
        assert!(!repo.is_ancestor(&b, &a).unwrap());
    }

    #[test]
    fn test_annotated_tag_peels_to_commit() {
        let repo = repo();
        let id = repo
            .commit_changes("main", &[FileChange::write("f", "x")], &alice_at(1), "c")
            .unwrap();
        let tag = GitObject::new(
            ObjectType::Tag,
            format!("object {}\ntype commit\ntag v2\n\nrelease\n", id).into_bytes(),
        );
        let tag_id = repo.objects.put(tag).unwrap();
        repo.create_tag("v2", tag_id).unwrap();

        assert_eq!(repo.resolve_ref("v2"), Some(tag_id));
        assert_eq!(repo.resolve_commit("v2").unwrap().unwrap().id, id);
        assert!(repo.read_blob("v2", "f").unwrap().is_some());
    }

    #[test]
    fn test_repo_store_memory() {
        let repos = RepoStore::in_memory();
        let repo = repos.create("alice", "test-repo", "main").unwrap();
        assert_eq!(repo.name, "test-repo");
        assert_eq!(repo.owner, "alice");

        assert!(matches!(
            repos.create("alice", "test-repo", "main"),
            Err(StorageError::RepoExists(_))
        ));
        assert!(matches!(
            repos.get("bob", "test-repo"),
            Err(StorageError::RepoNotFound(_))
        ));
        assert!(repos.create("alice", "../escape", "main").is_err());

        repos.create("bob", "other", "trunk").unwrap();
        assert_eq!(repos.list().len(), 2);
        assert_eq!(repos.list_by_owner("bob")[0].name, "other");
        assert_eq!(
            repos.get("bob", "other").unwrap().current_branch().unwrap(),
            Some("trunk".to_string())
        );
    }

    #[test]
    fn test_repo_store_on_disk_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let repos = RepoStore::on_disk(dir.path()).unwrap();
            let repo = repos.create("alice", "persisted", "main").unwrap();
            repo.create_initial_commit("persisted", "on disk", &alice_at(5))
                .unwrap()
        };
        assert!(dir
            .path()
            .join("alice/persisted/.git/refs/heads/main")
            .exists());

        let reopened = RepoStore::on_disk(dir.path()).unwrap();
        let repo = reopened.get("alice", "persisted").unwrap();
        assert_eq!(repo.head().unwrap(), Some(id));
        assert_eq!(
            repo.read_blob("main", "README.md").unwrap().unwrap().text(),
            "# persisted\n\non disk\n"
        );
    }

    #[test]
    fn test_settings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repos = RepoStore::on_disk(dir.path()).unwrap();
            let repo = repos.create("alice", "secret", "main").unwrap();
            assert!(!repo.settings().unwrap().private);
            repo.set_private(true).unwrap();
            repos.create("alice", "open", "main").unwrap();
        }
        assert!(dir.path().join("alice/secret/.git/kiln.json").exists());

        let reopened = RepoStore::on_disk(dir.path()).unwrap();
        let secret = reopened.get("alice", "secret").unwrap();
        assert_eq!(secret.settings().unwrap(), RepoSettings { private: true });
        assert!(!reopened.get("alice", "open").unwrap().settings().unwrap().private);

        secret.set_private(false).unwrap();
        assert!(!secret.settings().unwrap().private);
    }

    #[test]
    fn test_corrupt_settings_are_reported() {
        let adapter = Arc::new(MemoryAdapter::new());
        adapter.write(".git/kiln.json", b"{not json").unwrap();
        let repo = Repository::open("broken", "alice", adapter);
        assert!(matches!(repo.settings(), Err(StorageError::Corruption(_))));
    }
}
