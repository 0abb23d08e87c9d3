use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use uuid::Uuid;

use tutor_core::error::ApiError;
use tutor_core::model::Patch;
use tutor_core::patch::{AppliedPatch, PatchPreview};

use crate::error::AppError;
use crate::extract::AppPath;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions/{id}/patch/preview", get(preview_patch))
        .route("/v1/sessions/{id}/patch/apply", post(apply_patch))
        .route("/v1/sessions/{id}/patch/reject", post(reject_patch))
        .route("/v1/sessions/{id}/patches", get(list_patches))
}

/// Show the pending patch against the session's current code
#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/patch/preview",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Pending patch with unified diff, or pending=false when there is none", body = PatchPreview),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "patches"
)]
pub async fn preview_patch(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<PatchPreview>, AppError> {
    Ok(Json(state.patches.preview_pending(id).await?))
}

/// Write the pending patch into the session's code
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/patch/apply",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Patch applied", body = AppliedPatch),
        (status = 400, description = "Session is not active", body = ApiError),
        (status = 404, description = "Unknown session or no pending patch", body = ApiError)
    ),
    tag = "patches"
)]
pub async fn apply_patch(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<AppliedPatch>, AppError> {
    Ok(Json(state.patches.apply_pending(id).await?))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/patch/reject",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Patch rejected", body = Patch),
        (status = 404, description = "Unknown session or no pending patch", body = ApiError)
    ),
    tag = "patches"
)]
pub async fn reject_patch(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Patch>, AppError> {
    Ok(Json(state.patches.reject_pending(id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/patches",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Patches, oldest first", body = Vec<Patch>),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "patches"
)]
pub async fn list_patches(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Vec<Patch>>, AppError> {
    Ok(Json(state.patches.session_patches(id).await?))
}
