//! HTTP API for the Kiln node.
//!
//! Implements the git smart HTTP endpoints for clone, fetch and push, the
//! repository management endpoints, and shared request plumbing (state,
//! error mapping, credential extraction).

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kiln_blame::BlameError;
use kiln_diff::DiffError;
use kiln_git::{advertise_refs, receive_pack, upload_pack, GitError, Service};
use kiln_merge::MergeError;
use kiln_storage::{Branch, RepoStore, Repository, StorageError, Tag};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::auth::{Access, AuthError, AuthStore, Identity};
use crate::auth_api::auth_routes;
use crate::config::{Config, StorageBackend};
use crate::observability::request_id_middleware;
use crate::repo_api::repo_routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository store.
    pub repos: Arc<RepoStore>,
    /// Tokens, collaborators and visibility.
    pub auth: Arc<AuthStore>,
    /// Node configuration.
    pub config: Arc<Config>,
}

impl AppState {
    /// Builds state from configuration, opening the configured storage and
    /// restoring each repository's visibility.
    pub fn from_config(config: Config) -> Result<Self, StorageError> {
        let repos = match config.storage {
            StorageBackend::Memory => RepoStore::in_memory(),
            StorageBackend::Filesystem => {
                std::fs::create_dir_all(&config.data_dir)?;
                RepoStore::on_disk(&config.data_dir)?
            }
        };
        let auth = AuthStore::from_config(&config.auth);
        for repo in repos.list() {
            if repo.settings()?.private {
                auth.set_private(&format!("{}/{}", repo.owner, repo.name), true);
            }
        }
        Ok(Self {
            repos: Arc::new(repos),
            auth: Arc::new(auth),
            config: Arc::new(config),
        })
    }

    /// Resolves the caller from the request headers.
    pub fn identity(&self, headers: &HeaderMap) -> Result<Option<Identity>, ApiError> {
        let header = headers
            .get(header::AUTHORIZATION)
            .map(|value| value.to_str().map_err(|_| AuthError::InvalidCredentials))
            .transpose()?;
        Ok(self.auth.authenticate(header)?)
    }

    /// Looks up `owner/name` and checks that the caller may `access` it.
    pub fn authorized_repo(
        &self,
        headers: &HeaderMap,
        owner: &str,
        name: &str,
        access: Access,
    ) -> Result<(Arc<Repository>, Option<Identity>), ApiError> {
        let name = strip_git_suffix(name);
        let repo = self.repos.get(owner, name)?;
        let identity = self.identity(headers)?;
        self.auth.authorize(identity.as_ref(), owner, name, access)?;
        Ok((repo, identity))
    }
}

/// Trims a trailing `.git` from a repository path segment.
pub fn strip_git_suffix(name: &str) -> &str {
    name.strip_suffix(".git").unwrap_or(name)
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("diff error: {0}")]
    Diff(#[from] DiffError),
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),
    #[error("blame error: {0}")]
    Blame(#[from] BlameError),
    #[error("internal error: {0}")]
    Internal(String),
}

fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::RepoNotFound(_) | StorageError::RefNotFound(_) => StatusCode::NOT_FOUND,
        StorageError::RepoExists(_) | StorageError::RefUpdateRejected(_) => StatusCode::CONFLICT,
        StorageError::InvalidName(_) | StorageError::InvalidRef(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Auth(AuthError::Forbidden(_)) => StatusCode::FORBIDDEN,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Git(err) => match err {
                GitError::Storage(inner) => storage_status(inner),
                GitError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            },
            ApiError::Storage(err) => storage_status(err),
            ApiError::Diff(DiffError::RefNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Diff(DiffError::Storage(inner)) => storage_status(inner),
            ApiError::Merge(err) => match err {
                MergeError::RefNotFound(_) => StatusCode::NOT_FOUND,
                MergeError::NoMergeBase { .. } | MergeError::RefUpdateRejected(_) => {
                    StatusCode::CONFLICT
                }
                MergeError::Storage(inner) => storage_status(inner),
            },
            ApiError::Blame(err) => match err {
                BlameError::RefNotFound(_) | BlameError::Diff(DiffError::RefNotFound(_)) => {
                    StatusCode::NOT_FOUND
                }
                BlameError::Diff(DiffError::Storage(inner)) | BlameError::Storage(inner) => {
                    storage_status(inner)
                }
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"kiln\""),
            );
        }
        response
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Repository info for listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct RepoInfo {
    pub owner: String,
    pub name: String,
    pub private: bool,
}

/// Repository details.
#[derive(Debug, Serialize, Deserialize)]
pub struct RepoDetails {
    pub owner: String,
    pub name: String,
    pub private: bool,
    /// Branch `HEAD` points at.
    pub default_branch: Option<String>,
    pub branches: Vec<Branch>,
    pub tags: Vec<Tag>,
}

/// Request to create a repository.
#[derive(Debug, Deserialize)]
pub struct CreateRepoRequest {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub private: bool,
    /// Defaults to the node's configured branch.
    #[serde(default)]
    pub default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceQuery {
    service: Option<String>,
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    let max_body = state.config.git.max_body_bytes;
    let timeout = Duration::from_secs(state.config.git.request_timeout_secs);

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Repository management
        .route("/api/repos", get(list_repos).post(create_repo))
        .route("/api/repos/{owner}/{name}", get(get_repo))
        .merge(repo_routes())
        .merge(auth_routes())
        // Git smart HTTP protocol
        .route("/{owner}/{name}/info/refs", get(git_info_refs))
        .route("/{owner}/{name}/git-upload-pack", post(git_upload_pack))
        .route("/{owner}/{name}/git-receive-pack", post(git_receive_pack))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Lists the repositories visible to the caller.
async fn list_repos(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<RepoInfo>>, ApiError> {
    let identity = state.identity(&headers)?;
    let repos = state
        .repos
        .list()
        .into_iter()
        .filter(|repo| {
            state
                .auth
                .authorize(identity.as_ref(), &repo.owner, &repo.name, Access::Read)
                .is_ok()
        })
        .map(|repo| RepoInfo {
            private: state
                .auth
                .is_private(&format!("{}/{}", repo.owner, repo.name)),
            owner: repo.owner.clone(),
            name: repo.name.clone(),
        })
        .collect();
    Ok(Json(repos))
}

/// Creates a new repository owned by the caller.
async fn create_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateRepoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .identity(&headers)?
        .ok_or(AuthError::MissingCredentials)?;
    if identity.user != req.owner {
        return Err(AuthError::Forbidden(format!(
            "{} cannot create repositories for {}",
            identity.user, req.owner
        ))
        .into());
    }
    if !identity.scopes.iter().any(|s| s.can_write()) {
        return Err(AuthError::Forbidden("token lacks a write scope".into()).into());
    }

    let branch = req
        .default_branch
        .as_deref()
        .unwrap_or(&state.config.default_branch);
    let repo = state.repos.create(&req.owner, &req.name, branch)?;
    if req.private {
        repo.set_private(true)?;
    }
    state
        .auth
        .set_private(&format!("{}/{}", repo.owner, repo.name), req.private);

    Ok((
        StatusCode::CREATED,
        Json(RepoInfo {
            owner: repo.owner.clone(),
            name: repo.name.clone(),
            private: req.private,
        }),
    ))
}

/// Gets repository info.
async fn get_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<RepoDetails>, ApiError> {
    let (repo, _) = state.authorized_repo(&headers, &owner, &name, Access::Read)?;

    Ok(Json(RepoDetails {
        private: state
            .auth
            .is_private(&format!("{}/{}", repo.owner, repo.name)),
        owner: repo.owner.clone(),
        name: repo.name.clone(),
        default_branch: repo.current_branch()?,
        branches: repo.list_branches()?,
        tags: repo.list_tags()?,
    }))
}

fn git_response(content_type: &'static str, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Decodes the request body, inflating it when the client gzipped it.
fn request_body(headers: &HeaderMap, body: Bytes, limit: usize) -> Result<Vec<u8>, ApiError> {
    let gzipped = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    if !gzipped {
        return Ok(body.to_vec());
    }

    let mut out = Vec::new();
    flate2::read::GzDecoder::new(body.as_ref())
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| ApiError::BadRequest(format!("invalid gzip body: {}", e)))?;
    if out.len() > limit {
        return Err(ApiError::BadRequest("request body too large".into()));
    }
    Ok(out)
}

async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

/// Git info/refs endpoint - advertises references.
async fn git_info_refs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<ServiceQuery>,
) -> Result<Response, ApiError> {
    let requested = query.service.unwrap_or_default();
    let service = Service::parse(&requested)
        .ok_or_else(|| ApiError::BadRequest(format!("unsupported service '{}'", requested)))?;
    let access = match service {
        Service::UploadPack => Access::Read,
        Service::ReceivePack => Access::Write,
    };
    let (repo, _) = state.authorized_repo(&headers, &owner, &name, access)?;

    let output = blocking(move || {
        let mut output = Vec::new();
        advertise_refs(&mut output, &repo, service)?;
        Ok(output)
    })
    .await?;

    Ok(git_response(service.advertisement_content_type(), output))
}

/// Git upload-pack endpoint - handles fetch/clone.
async fn git_upload_pack(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (repo, _) = state.authorized_repo(&headers, &owner, &name, Access::Read)?;
    let input = request_body(&headers, body, state.config.git.max_body_bytes)?;

    let output = blocking(move || {
        let mut output = Vec::new();
        let sent = upload_pack(&mut input.as_slice(), &mut output, &repo)?;
        tracing::info!(
            owner = %repo.owner,
            name = %repo.name,
            objects = sent,
            "Upload-pack completed"
        );
        Ok(output)
    })
    .await?;

    Ok(git_response(
        Service::UploadPack.result_content_type(),
        output,
    ))
}

/// Git receive-pack endpoint - handles push.
async fn git_receive_pack(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (repo, identity) = state.authorized_repo(&headers, &owner, &name, Access::Write)?;
    let input = request_body(&headers, body, state.config.git.max_body_bytes)?;
    let mode = state.config.git.decode_mode;
    let pusher = identity.map(|i| i.user).unwrap_or_default();

    let output = blocking(move || {
        let mut output = Vec::new();
        let report = receive_pack(&mut input.as_slice(), &mut output, &repo, mode)?;
        tracing::info!(
            owner = %repo.owner,
            name = %repo.name,
            pusher = %pusher,
            commands = report.statuses.len(),
            ok = report.all_ok(),
            "Push completed"
        );
        Ok(output)
    })
    .await?;

    Ok(git_response(
        Service::ReceivePack.result_content_type(),
        output,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_git_suffix() {
        assert_eq!(strip_git_suffix("repo.git"), "repo");
        assert_eq!(strip_git_suffix("repo"), "repo");
        assert_eq!(strip_git_suffix(".git"), "");
    }

    #[test]
    fn test_error_statuses() {
        let cases = [
            (
                ApiError::Storage(StorageError::RepoNotFound("a/b".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Auth(AuthError::MissingCredentials),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApiError::Auth(AuthError::Forbidden("no".into())),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::Git(GitError::InvalidPktLine("bad".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Merge(MergeError::RefNotFound("x".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Storage(StorageError::Corruption("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{}", err);
        }
    }

    #[test]
    fn test_unauthorized_has_challenge() {
        let response = ApiError::Auth(AuthError::InvalidCredentials).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"kiln\""
        );
    }

    #[test]
    fn test_gzip_request_body() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"0000").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let body = request_body(&headers, Bytes::from(compressed.clone()), 1024).unwrap();
        assert_eq!(body, b"0000");

        assert!(request_body(&headers, Bytes::from(compressed), 2).is_err());
        assert!(request_body(&headers, Bytes::from_static(b"nope"), 1024).is_err());
    }
}
