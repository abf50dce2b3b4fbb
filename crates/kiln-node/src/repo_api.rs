//! Repository content endpoints: log, diffs, merges, blame and file history.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use kiln_blame::{file_history, file_history_fast, get_file_blame, BlameLine, FileHistoryEntry};
use kiln_diff::{compare_branches, get_commit_diff, CommitDiff, DiffOptions, DEFAULT_CONTEXT};
use kiln_merge::{merge_branches, ConflictPolicy, MergeOptions, MergeOutcome, MergeResult};
use kiln_storage::{Commit, Signature};
use serde::Deserialize;

use crate::api::{ApiError, AppState};
use crate::auth::Access;

/// Commits returned when a request gives no depth.
pub const DEFAULT_DEPTH: usize = 50;

/// Upper bound on any requested depth.
pub const MAX_DEPTH: usize = 1000;

/// Creates the repository content routes.
pub fn repo_routes() -> Router<AppState> {
    Router::new()
        .route("/api/repos/{owner}/{name}/commits", get(list_commits))
        .route(
            "/api/repos/{owner}/{name}/commits/{sha}/diff",
            get(commit_diff),
        )
        .route("/api/repos/{owner}/{name}/compare", get(compare))
        .route("/api/repos/{owner}/{name}/merge", post(merge))
        .route("/api/repos/{owner}/{name}/blame", get(blame))
        .route("/api/repos/{owner}/{name}/history", get(history))
}

fn depth(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_DEPTH).clamp(1, MAX_DEPTH)
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    depth: Option<usize>,
}

/// Newest-first commit log.
async fn list_commits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<Commit>>, ApiError> {
    let (repo, _) = state.authorized_repo(&headers, &owner, &name, Access::Read)?;
    let spec = query.git_ref.as_deref().unwrap_or("HEAD");
    Ok(Json(repo.log(spec, depth(query.depth))?))
}

#[derive(Debug, Deserialize)]
struct DiffQuery {
    context: Option<usize>,
}

fn diff_options(state: &AppState, context: Option<usize>) -> DiffOptions {
    DiffOptions {
        context: context.unwrap_or(DEFAULT_CONTEXT),
        max_cells: state.config.diff.max_cells,
    }
}

/// Diff of a commit against its first parent.
async fn commit_diff(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name, sha)): Path<(String, String, String)>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<CommitDiff>, ApiError> {
    let (repo, _) = state.authorized_repo(&headers, &owner, &name, Access::Read)?;
    Ok(Json(get_commit_diff(
        &repo,
        &sha,
        &diff_options(&state, query.context),
    )?))
}

#[derive(Debug, Deserialize)]
struct CompareQuery {
    base: String,
    head: String,
    context: Option<usize>,
}

/// Diff between two branch tips.
async fn compare(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<CommitDiff>, ApiError> {
    let (repo, _) = state.authorized_repo(&headers, &owner, &name, Access::Read)?;
    let options = diff_options(&state, query.context);
    Ok(Json(compare_branches(
        &repo,
        &query.base,
        &query.head,
        &options,
    )?))
}

/// Request to merge one branch into another.
#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    /// Branch being merged.
    pub head: String,
    /// Branch receiving the merge commit.
    pub base: String,
    #[serde(default)]
    pub policy: ConflictPolicy,
    #[serde(default)]
    pub message: Option<String>,
}

/// Merges `head` into `base` as the caller.
async fn merge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    Json(req): Json<MergeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (repo, identity) = state.authorized_repo(&headers, &owner, &name, Access::Write)?;
    let user = identity.map(|i| i.user).unwrap_or_else(|| owner.clone());
    let author = Signature::now(user.clone(), format!("{}@users.kiln", user));
    let options = MergeOptions {
        policy: req.policy,
        max_visited: state.config.merge.max_visited,
        message: req.message,
    };

    let outcome = merge_branches(&repo, &req.head, &req.base, &author, &options)?;
    let status = match outcome {
        MergeOutcome::Conflicted { .. } => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    };
    Ok((status, Json(MergeResult::from(&outcome))))
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    path: String,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    depth: Option<usize>,
    #[serde(default)]
    fast: bool,
}

/// Line attribution for one file.
async fn blame(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Vec<BlameLine>>, ApiError> {
    let (repo, _) = state.authorized_repo(&headers, &owner, &name, Access::Read)?;
    let spec = query.git_ref.as_deref().unwrap_or("HEAD");
    get_file_blame(&repo, spec, &query.path, depth(query.depth))?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} at {}", query.path, spec)))
}

/// Commits that touched one file, newest first.
async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<FileQuery>,
) -> Result<Json<Vec<FileHistoryEntry>>, ApiError> {
    let (repo, _) = state.authorized_repo(&headers, &owner, &name, Access::Read)?;
    let spec = query.git_ref.as_deref().unwrap_or("HEAD");
    let entries = if query.fast {
        file_history_fast(&repo, spec, &query.path, depth(query.depth))?
    } else {
        file_history(&repo, spec, &query.path, depth(query.depth))?
    };
    Ok(Json(entries))
}
