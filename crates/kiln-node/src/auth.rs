//! Token authentication and repository access control.
//!
//! Git clients send HTTP Basic credentials whose password is an opaque
//! access token. Tokens are never stored in the clear: records carry the
//! SHA-1 hex digest of the token and are looked up by it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Authentication and authorization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The request carries no credentials but needs them.
    #[error("authentication required")]
    MissingCredentials,

    /// The credentials are malformed or match no token.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The token matched but has expired.
    #[error("token expired")]
    TokenExpired,

    /// The caller is known but may not perform the operation.
    #[error("permission denied: {0}")]
    Forbidden(String),
}

/// Token scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenScope {
    /// Clone and fetch.
    #[serde(rename = "repo:read")]
    RepoRead,
    /// Push.
    #[serde(rename = "repo:write")]
    RepoWrite,
    /// Full repository access.
    #[serde(rename = "repo")]
    Repo,
}

impl TokenScope {
    /// Whether this scope allows reading repositories.
    pub fn can_read(&self) -> bool {
        matches!(self, Self::RepoRead | Self::RepoWrite | Self::Repo)
    }

    /// Whether this scope allows writing repositories.
    pub fn can_write(&self) -> bool {
        matches!(self, Self::RepoWrite | Self::Repo)
    }
}

/// Collaborator permission level, ordered `Read < Write < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Clone and fetch.
    Read,
    /// Push.
    Write,
    /// Push and manage the repository.
    Admin,
}

impl Permission {
    /// Check if this permission level grants at least the required level.
    pub fn has(&self, required: Permission) -> bool {
        *self >= required
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Admin => write!(f, "admin"),
        }
    }
}

/// What a request wants to do with a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Clone, fetch or browse.
    Read,
    /// Push, merge or change settings.
    Write,
}

/// A stored access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// User the token acts as.
    pub user: String,
    /// SHA-1 hex digest of the token.
    pub token_sha1: String,
    /// Granted scopes.
    pub scopes: Vec<TokenScope>,
    /// Expiry as unix seconds.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl TokenRecord {
    /// Builds a record for a plaintext token.
    pub fn new(
        user: impl Into<String>,
        token: &str,
        scopes: Vec<TokenScope>,
        expires_at: Option<u64>,
    ) -> Self {
        Self {
            user: user.into(),
            token_sha1: hash_token(token),
            scopes,
            expires_at,
        }
    }

    /// Check if the token has expired at `now` (unix seconds).
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// A collaborator grant on one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorRecord {
    /// Repository key, `owner/name`.
    pub repo: String,
    /// Collaborating user.
    pub user: String,
    /// Granted level.
    pub permission: Permission,
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User name from the token record.
    pub user: String,
    /// Scopes of the presented token.
    pub scopes: Vec<TokenScope>,
}

impl Identity {
    fn can_read(&self) -> bool {
        self.scopes.iter().any(TokenScope::can_read)
    }

    fn can_write(&self) -> bool {
        self.scopes.iter().any(TokenScope::can_write)
    }
}

/// Credentials pulled from an `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `Basic base64(username:token)`.
    Basic {
        /// Client-supplied user name; informational only.
        username: String,
        /// The access token.
        token: String,
    },
    /// `Bearer <token>` or `token <token>`.
    Bearer(String),
}

impl Credentials {
    /// Parses an `Authorization` header value.
    pub fn parse(header: &str) -> Option<Self> {
        if let Some(encoded) = header.strip_prefix("Basic ") {
            let decoded = STANDARD.decode(encoded.trim()).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, token) = decoded.split_once(':')?;
            return Some(Self::Basic {
                username: username.to_string(),
                token: token.to_string(),
            });
        }
        header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("token "))
            .map(|token| Self::Bearer(token.trim().to_string()))
    }

    /// The token carried by these credentials.
    pub fn token(&self) -> &str {
        match self {
            Self::Basic { token, .. } => token,
            Self::Bearer(token) => token,
        }
    }
}

/// SHA-1 hex digest of a token.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha1::digest(token.as_bytes()))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Tokens, collaborators and repository visibility.
#[derive(Debug, Default)]
pub struct AuthStore {
    anonymous_read: bool,
    tokens: RwLock<HashMap<String, TokenRecord>>,
    collaborators: RwLock<HashMap<String, HashMap<String, Permission>>>,
    private: RwLock<HashSet<String>>,
}

impl AuthStore {
    /// Creates an empty store.
    pub fn new(anonymous_read: bool) -> Self {
        Self {
            anonymous_read,
            ..Self::default()
        }
    }

    /// Creates a store seeded from configuration.
    pub fn from_config(config: &crate::config::AuthConfig) -> Self {
        let store = Self::new(config.anonymous_read);
        for token in &config.tokens {
            store.add_token(token.clone());
        }
        for grant in &config.collaborators {
            store.add_collaborator(&grant.repo, &grant.user, grant.permission);
        }
        store
    }

    /// Whether public repositories are readable without credentials.
    pub fn anonymous_read(&self) -> bool {
        self.anonymous_read
    }

    /// Adds or replaces a token record.
    pub fn add_token(&self, record: TokenRecord) {
        self.tokens
            .write()
            .insert(record.token_sha1.to_lowercase(), record);
    }

    /// Grants `user` a permission on `repo` (`owner/name`).
    pub fn add_collaborator(&self, repo: &str, user: &str, permission: Permission) {
        self.collaborators
            .write()
            .entry(repo.to_string())
            .or_default()
            .insert(user.to_string(), permission);
    }

    /// Removes a collaborator. Returns whether a grant existed.
    pub fn remove_collaborator(&self, repo: &str, user: &str) -> bool {
        self.collaborators
            .write()
            .get_mut(repo)
            .is_some_and(|users| users.remove(user).is_some())
    }

    /// Lists the collaborators of `repo`, sorted by user.
    pub fn collaborators(&self, repo: &str) -> Vec<CollaboratorRecord> {
        let mut list: Vec<_> = self
            .collaborators
            .read()
            .get(repo)
            .map(|users| {
                users
                    .iter()
                    .map(|(user, permission)| CollaboratorRecord {
                        repo: repo.to_string(),
                        user: user.clone(),
                        permission: *permission,
                    })
                    .collect()
            })
            .unwrap_or_default();
        list.sort_by(|a, b| a.user.cmp(&b.user));
        list
    }

    /// Marks `repo` private or public.
    pub fn set_private(&self, repo: &str, private: bool) {
        let mut set = self.private.write();
        if private {
            set.insert(repo.to_string());
        } else {
            set.remove(repo);
        }
    }

    /// Whether `repo` is private.
    pub fn is_private(&self, repo: &str) -> bool {
        self.private.read().contains(repo)
    }

    /// Resolves an `Authorization` header to an identity.
    ///
    /// No header yields `Ok(None)`; a header that does not name a live
    /// token is an error.
    pub fn authenticate(&self, header: Option<&str>) -> Result<Option<Identity>, AuthError> {
        self.authenticate_at(header, now_secs())
    }

    fn authenticate_at(
        &self,
        header: Option<&str>,
        now: u64,
    ) -> Result<Option<Identity>, AuthError> {
        let Some(header) = header else {
            return Ok(None);
        };
        let credentials = Credentials::parse(header).ok_or(AuthError::InvalidCredentials)?;
        let digest = hash_token(credentials.token());

        let tokens = self.tokens.read();
        let record = tokens.get(&digest).ok_or(AuthError::InvalidCredentials)?;
        if record.is_expired_at(now) {
            tracing::debug!(user = %record.user, "Rejected expired token");
            return Err(AuthError::TokenExpired);
        }
        Ok(Some(Identity {
            user: record.user.clone(),
            scopes: record.scopes.clone(),
        }))
    }

    fn permission_of(&self, user: &str, owner: &str, repo: &str) -> Option<Permission> {
        if user == owner {
            return Some(Permission::Admin);
        }
        self.collaborators
            .read()
            .get(repo)
            .and_then(|users| users.get(user).copied())
    }

    /// Checks whether `identity` may perform `access` on `owner/name`.
    pub fn authorize(
        &self,
        identity: Option<&Identity>,
        owner: &str,
        name: &str,
        access: Access,
    ) -> Result<(), AuthError> {
        let repo = format!("{}/{}", owner, name);
        let private = self.is_private(&repo);

        if access == Access::Read && !private {
            return match identity {
                None if !self.anonymous_read => Err(AuthError::MissingCredentials),
                _ => Ok(()),
            };
        }

        let identity = identity.ok_or(AuthError::MissingCredentials)?;
        let permission = self.permission_of(&identity.user, owner, &repo);

        match access {
            Access::Read => {
                if !identity.can_read() {
                    return Err(AuthError::Forbidden("token lacks a read scope".into()));
                }
                if permission.is_none() {
                    return Err(AuthError::Forbidden(format!(
                        "{} has no access to {}",
                        identity.user, repo
                    )));
                }
            }
            Access::Write => {
                if !identity.can_write() {
                    return Err(AuthError::Forbidden("token lacks a write scope".into()));
                }
                if !permission.is_some_and(|p| p.has(Permission::Write)) {
                    return Err(AuthError::Forbidden(format!(
                        "{} cannot write to {}",
                        identity.user, repo
                    )));
                }
            }
        }
        Ok(())
    }

    /// Checks whether `identity` may manage `owner/name` (collaborators).
    pub fn authorize_admin(
        &self,
        identity: Option<&Identity>,
        owner: &str,
        name: &str,
    ) -> Result<(), AuthError> {
        self.authorize(identity, owner, name, Access::Write)?;
        let identity = identity.ok_or(AuthError::MissingCredentials)?;
        let repo = format!("{}/{}", owner, name);
        match self.permission_of(&identity.user, owner, &repo) {
            Some(Permission::Admin) => Ok(()),
            _ => Err(AuthError::Forbidden(format!(
                "{} cannot administer {}",
                identity.user, repo
            ))),
        }
    }
}
