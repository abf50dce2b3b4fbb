//! Commit objects and author/committer signatures.

use crate::{GitObject, ObjectId, ObjectType, Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// An author or committer line: `Name <email> <unix time> <tz>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Timezone offset as written by git, e.g. `+0000`.
    pub tz_offset: String,
}

impl Signature {
    /// Creates a signature with an explicit time.
    pub fn new(name: impl Into<String>, email: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            tz_offset: "+0000".to_string(),
        }
    }

    /// Creates a signature stamped with the current time.
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        Self::new(name, email, timestamp)
    }

    /// Parses `Name <email> 1700000000 +0000`.
    pub fn parse(line: &str) -> Result<Self> {
        let invalid = || StorageError::InvalidObject(format!("invalid signature: {}", line));
        let open = line.find('<').ok_or_else(invalid)?;
        let close = line[open..].find('>').map(|i| i + open).ok_or_else(invalid)?;
        let name = line[..open].trim().to_string();
        let email = line[open + 1..close].to_string();
        let mut rest = line[close + 1..].split_whitespace();
        let timestamp = rest
            .next()
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(invalid)?;
        let tz_offset = rest.next().unwrap_or("+0000").to_string();
        Ok(Self {
            name,
            email,
            timestamp,
            tz_offset,
        })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.tz_offset
        )
    }
}

/// A parsed commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit id.
    pub id: ObjectId,
    /// Root tree.
    pub tree: ObjectId,
    /// Parent commits, first parent first.
    pub parents: Vec<ObjectId>,
    /// Author.
    pub author: Signature,
    /// Committer.
    pub committer: Signature,
    /// Full message.
    pub message: String,
}

impl Commit {
    /// Builds the commit object for the given fields.
    pub fn build(
        tree: ObjectId,
        parents: &[ObjectId],
        author: &Signature,
        committer: &Signature,
        message: &str,
    ) -> GitObject {
        let mut content = format!("tree {}\n", tree);
        for parent in parents {
            content.push_str(&format!("parent {}\n", parent));
        }
        content.push_str(&format!("author {}\n", author));
        content.push_str(&format!("committer {}\n", committer));
        content.push('\n');
        content.push_str(message);
        if !message.ends_with('\n') {
            content.push('\n');
        }
        GitObject::new(ObjectType::Commit, content.into_bytes())
    }

    /// Parses a commit object body.
    pub fn parse(id: ObjectId, data: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(data);
        let (headers, message) = match text.split_once("\n\n") {
            Some((headers, message)) => (headers, message),
            None => (text.as_ref(), ""),
        };

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        for line in headers.lines() {
            if let Some(hex) = line.strip_prefix("tree ") {
                tree = Some(ObjectId::from_hex(hex.trim())?);
            } else if let Some(hex) = line.strip_prefix("parent ") {
                parents.push(ObjectId::from_hex(hex.trim())?);
            } else if let Some(sig) = line.strip_prefix("author ") {
                author = Some(Signature::parse(sig)?);
            } else if let Some(sig) = line.strip_prefix("committer ") {
                committer = Some(Signature::parse(sig)?);
            }
        }

        let tree = tree.ok_or_else(|| {
            StorageError::InvalidObject(format!("commit {} has no tree", id))
        })?;
        let author = author.ok_or_else(|| {
            StorageError::InvalidObject(format!("commit {} has no author", id))
        })?;
        let committer = committer.unwrap_or_else(|| author.clone());

        Ok(Self {
            id,
            tree,
            parents,
            author,
            committer,
            message: message.to_string(),
        })
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }

    /// Returns true for commits without parents.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Returns true for commits with two or more parents.
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// Reads the `object` header of an annotated tag.
pub fn tag_target(data: &[u8]) -> Option<ObjectId> {
    let text = std::str::from_utf8(data).ok()?;
    text.lines()
        .take_while(|line| !line.is_empty())
        .find_map(|line| line.strip_prefix("object "))
        .and_then(|hex| ObjectId::from_hex(hex.trim()).ok())
}
