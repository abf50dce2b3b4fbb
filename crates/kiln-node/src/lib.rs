//! # Kiln Node
//!
//! The HTTP face of a Kiln server.
//!
//! A node serves three kinds of traffic over one axum router:
//!
//! - **Git smart HTTP**: `info/refs`, `git-upload-pack` and
//!   `git-receive-pack` under `/{owner}/{name}[.git]/`, so stock git
//!   clients can clone, fetch and push.
//! - **Repository API**: create, list and inspect repositories, plus
//!   commit logs, diffs, branch merges, blame and file history under
//!   `/api/repos/{owner}/{name}/`.
//! - **Collaborators**: grant and revoke per-repository access.
//!
//! Requests authenticate with HTTP Basic credentials whose password is an
//! access token (see [`auth`]).
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin kiln-node -- --listen-addr 127.0.0.1:8080
//! ```
//!
//! ## Example: Building the router
//!
//! ```rust,no_run
//! use kiln_node::api::{create_router, AppState};
//! use kiln_node::config::Config;
//!
//! let state = AppState::from_config(Config::default()).unwrap();
//! let app = create_router(state);
//! ```

pub mod api;
pub mod auth;
pub mod auth_api;
pub mod config;
pub mod observability;
pub mod repo_api;
