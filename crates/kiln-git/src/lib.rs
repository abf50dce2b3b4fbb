//! Git wire protocol for Kiln.
//!
//! This crate implements pkt-line framing, the pack file format (including
//! delta resolution) and the smart HTTP services, so that standard git
//! clients can clone, fetch and push against Kiln repositories.
//!
//! # Example
//!
//! ```
//! use kiln_git::{advertise_refs, Service};
//! use kiln_storage::Repository;
//!
//! let repo = Repository::in_memory("demo", "alice").unwrap();
//! let mut out = Vec::new();
//! advertise_refs(&mut out, &repo, Service::UploadPack).unwrap();
//! assert!(out.starts_with(b"001e# service=git-upload-pack\n0000"));
//! ```

mod delta;
mod error;
mod pack;
mod pktline;
mod protocol;

pub use delta::{apply_delta, delta_sizes};
pub use error::GitError;
pub use pack::{
    decode_entry_header, encode_entry_header, DecodeMode, EntryError, PackBuilder, PackParser,
    UnpackReport, PACK_SIGNATURE, PACK_VERSION,
};
pub use pktline::{
    read_sideband, Band, PktLine, PktLineReader, PktLineWriter, MAX_PKT_DATA, MAX_PKT_LEN,
    MAX_SIDEBAND_DATA,
};
pub use protocol::{
    advertise_refs, collect_reachable, collect_refs, receive_pack, upload_pack, Command,
    CommandStatus, ReceiveReport, ReceiveRequest, RefAdvertisement, Service, WantHave, AGENT,
};

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
