use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use tutor_core::TutorError;
use tutor_core::error::ApiError;
use tutor_core::sandbox::{Sandbox, SandboxError};

use crate::error::AppError;
use crate::extract::AppPath;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/v1/sessions/{id}/sandbox",
        get(get_sandbox).post(ensure_sandbox).delete(destroy_sandbox),
    )
}

fn sandbox_error(err: SandboxError) -> AppError {
    match err {
        SandboxError::NotFound(id) => AppError::NotFound {
            resource: format!("sandbox for session {id}"),
            docs_hint: Some(format!("POST /v1/sessions/{id}/sandbox provisions one.")),
        },
        other => TutorError::from(other).into(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/sandbox",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Sandbox bound to the session", body = Sandbox),
        (status = 404, description = "No sandbox for this session", body = ApiError)
    ),
    tag = "sandbox"
)]
pub async fn get_sandbox(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Sandbox>, AppError> {
    state
        .sandboxes
        .get(id)
        .await
        .map(Json)
        .ok_or_else(|| sandbox_error(SandboxError::NotFound(id)))
}

/// Provision the session's sandbox, or return the live one
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/sandbox",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Sandbox ready", body = Sandbox),
        (status = 400, description = "Session is not active", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 502, description = "Sandbox driver failed", body = ApiError)
    ),
    tag = "sandbox"
)]
pub async fn ensure_sandbox(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Sandbox>, AppError> {
    let session = state.sessions.get(id).await?;
    if !session.is_active() {
        return Err(TutorError::SessionNotActive {
            id,
            status: session.status,
        }
        .into());
    }
    let sandbox = state.sandboxes.ensure(id).await.map_err(sandbox_error)?;
    Ok(Json(sandbox))
}

#[utoipa::path(
    delete,
    path = "/v1/sessions/{id}/sandbox",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Sandbox destroyed", body = Sandbox),
        (status = 404, description = "No sandbox for this session", body = ApiError)
    ),
    tag = "sandbox"
)]
pub async fn destroy_sandbox(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Sandbox>, AppError> {
    let sandbox = state.sandboxes.destroy(id).await.map_err(sandbox_error)?;
    Ok(Json(sandbox))
}
