//! Collaborator management endpoints.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::{strip_git_suffix, ApiError, AppState};
use crate::auth::{CollaboratorRecord, Permission};

/// Creates the collaborator routes.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/repos/{owner}/{name}/collaborators",
            get(list_collaborators),
        )
        .route(
            "/api/repos/{owner}/{name}/collaborators/{user}",
            put(put_collaborator).delete(remove_collaborator),
        )
}

/// Request body for granting access.
#[derive(Debug, Serialize, Deserialize)]
pub struct CollaboratorRequest {
    pub permission: Permission,
}

fn admin_check(
    state: &AppState,
    headers: &HeaderMap,
    owner: &str,
    name: &str,
) -> Result<String, ApiError> {
    let name = strip_git_suffix(name);
    let repo = state.repos.get(owner, name)?;
    let identity = state.identity(headers)?;
    state.auth.authorize_admin(identity.as_ref(), owner, name)?;
    Ok(format!("{}/{}", repo.owner, repo.name))
}

async fn list_collaborators(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
) -> Result<Json<Vec<CollaboratorRecord>>, ApiError> {
    let key = admin_check(&state, &headers, &owner, &name)?;
    Ok(Json(state.auth.collaborators(&key)))
}

async fn put_collaborator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name, user)): Path<(String, String, String)>,
    Json(req): Json<CollaboratorRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let key = admin_check(&state, &headers, &owner, &name)?;
    if user == owner {
        return Err(ApiError::BadRequest(
            "the owner cannot be a collaborator".into(),
        ));
    }
    state.auth.add_collaborator(&key, &user, req.permission);
    tracing::info!(repo = %key, user = %user, permission = %req.permission, "Collaborator granted");

    Ok(Json(CollaboratorRecord {
        repo: key,
        user,
        permission: req.permission,
    }))
}

async fn remove_collaborator(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((owner, name, user)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let key = admin_check(&state, &headers, &owner, &name)?;
    if !state.auth.remove_collaborator(&key, &user) {
        return Err(ApiError::NotFound(format!("collaborator {} on {}", user, key)));
    }
    tracing::info!(repo = %key, user = %user, "Collaborator removed");
    Ok(StatusCode::NO_CONTENT)
}
