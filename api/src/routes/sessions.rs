use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use tutor_core::appreciation::Appreciation;
use tutor_core::error::ApiError;
use tutor_core::model::{
    Code, CreateSessionRequest, Intervention, Session, SessionIntent, SessionStatus,
};
use tutor_core::session::{CompletedSession, CriterionUpdate};

use crate::error::AppError;
use crate::extract::{AppJson, AppPath, UserId};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", get(list_sessions).post(create_session))
        .route("/v1/sessions/{id}", get(get_session).delete(delete_session))
        .route("/v1/sessions/{id}/complete", post(complete_session))
        .route("/v1/sessions/{id}/abandon", post(abandon_session))
        .route("/v1/sessions/{id}/interventions", get(list_interventions))
        .route(
            "/v1/sessions/{id}/spec/criteria/{criterion_id}/satisfy",
            post(satisfy_criterion),
        )
}

/// One row of the session listing.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionListItem {
    pub id: Uuid,
    pub user_id: String,
    pub intent: SessionIntent,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercise_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_path: Option<String>,
    pub track: String,
    pub run_count: u32,
    pub hint_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Session> for SessionListItem {
    fn from(s: Session) -> Self {
        Self {
            id: s.id,
            user_id: s.user_id,
            intent: s.intent,
            status: s.status,
            exercise_id: s.exercise_id,
            spec_path: s.spec_path,
            track: s.policy.track,
            run_count: s.run_count,
            hint_count: s.hint_count,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CompleteSessionResponse {
    #[serde(flatten)]
    pub completed: CompletedSession,
    /// Positive signals earned by the session, highest priority first
    pub appreciations: Vec<Appreciation>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct FormatRequest {
    /// Snapshot to format; the session's current code when absent
    #[serde(default)]
    pub code: Option<Code>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FormatResponse {
    pub code: Code,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CriterionResponse {
    #[serde(flatten)]
    pub update: CriterionUpdate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appreciation: Option<Appreciation>,
}

/// List all sessions, newest first
#[utoipa::path(
    get,
    path = "/v1/sessions",
    responses((status = 200, description = "Sessions, newest first", body = Vec<SessionListItem>)),
    tag = "sessions"
)]
pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionListItem>>, AppError> {
    let sessions = state.sessions.list().await?;
    Ok(Json(sessions.into_iter().map(SessionListItem::from).collect()))
}

/// Start a session on an exercise or a spec
#[utoipa::path(
    post,
    path = "/v1/sessions",
    request_body = CreateSessionRequest,
    params(("x-user-id" = Option<String>, Header, description = "Learner id, defaults to 'local'")),
    responses(
        (status = 201, description = "Session created", body = Session),
        (status = 400, description = "Invalid origin or intent", body = ApiError),
        (status = 404, description = "Exercise or spec not found", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    user: UserId,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.sessions.create(user.as_str(), req).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session", body = Session),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.sessions.get(id).await?))
}

/// Delete a session with its runs, interventions, patches and sandbox
#[utoipa::path(
    delete,
    path = "/v1/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn delete_session(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<StatusCode, AppError> {
    state.sessions.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Finish an active session: summary, profile update and appreciation
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/complete",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session completed", body = CompleteSessionResponse),
        (status = 400, description = "Session is not active", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn complete_session(
    State(state): State<AppState>,
    user: UserId,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<CompleteSessionResponse>, AppError> {
    let completed = state.sessions.complete(id).await?;

    let appreciation = &state.appreciation;
    let mut appreciations: Vec<Appreciation> = [
        appreciation.check_session(user.as_str(), &completed.session, None),
        appreciation.check_progress(user.as_str(), &completed.profile, &completed.previous_profile),
        completed.topic_progress.as_ref().and_then(|topic| {
            appreciation.check_skill(user.as_str(), topic, completed.first_in_topic)
        }),
    ]
    .into_iter()
    .flatten()
    .collect();
    appreciations.sort_by(|a, b| b.priority.cmp(&a.priority));

    Ok(Json(CompleteSessionResponse {
        completed,
        appreciations,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/abandon",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session abandoned", body = Session),
        (status = 400, description = "Session is not active", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn abandon_session(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Session>, AppError> {
    Ok(Json(state.sessions.abandon(id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/interventions",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Interventions, oldest first", body = Vec<Intervention>),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn list_interventions(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Vec<Intervention>>, AppError> {
    Ok(Json(state.sessions.list_interventions(id).await?))
}

/// Format a snapshot without touching the session
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/format",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = FormatRequest,
    responses(
        (status = 200, description = "Formatted snapshot", body = FormatResponse),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 502, description = "Formatter failed", body = ApiError)
    ),
    tag = "runs"
)]
pub async fn format_code(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<FormatRequest>,
) -> Result<Json<FormatResponse>, AppError> {
    let code = state.sessions.format_fix(id, req.code).await?;
    Ok(Json(FormatResponse { code }))
}

/// Mark one acceptance criterion of the session's spec as satisfied
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/spec/criteria/{criterion_id}/satisfy",
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("criterion_id" = String, Path, description = "Acceptance criterion id")
    ),
    responses(
        (status = 200, description = "Criterion state and spec progress", body = CriterionResponse),
        (status = 400, description = "Not a spec session or unknown criterion", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "sessions"
)]
pub async fn satisfy_criterion(
    State(state): State<AppState>,
    user: UserId,
    AppPath((id, criterion_id)): AppPath<(Uuid, String)>,
) -> Result<Json<CriterionResponse>, AppError> {
    let update = state.sessions.satisfy_criterion(id, &criterion_id).await?;
    let appreciation = if update.changed {
        state
            .appreciation
            .check_spec(user.as_str(), &update.spec, Some(&update.criterion))
    } else {
        None
    };
    Ok(Json(CriterionResponse {
        update,
        appreciation,
    }))
}
