//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred in the storage adapter.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object was not found.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// The requested reference was not found.
    #[error("reference not found: {0}")]
    RefNotFound(String),

    /// An object could not be parsed.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// A reference name or value is malformed.
    #[error("invalid reference: {0}")]
    InvalidRef(String),

    /// Stored data does not match its address.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// zlib compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// A compare-and-swap ref update lost against a concurrent writer.
    #[error("reference update rejected: {0}")]
    RefUpdateRejected(String),

    /// An owner, repository or path name is not acceptable.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// A repository with this key already exists.
    #[error("repository already exists: {0}")]
    RepoExists(String),

    /// No repository with this key exists.
    #[error("repository not found: {0}")]
    RepoNotFound(String),
}
