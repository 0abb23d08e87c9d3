use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use tutor_core::appreciation::Appreciation;
use tutor_core::error::ApiError;
use tutor_core::model::{Run, RunRequest, Session};

use crate::error::AppError;
use crate::extract::{AppJson, AppPath, UserId};
use crate::routes::sessions;
use crate::state::AppState;

/// Routes that execute learner code. Rate limited by the caller.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions/{id}/runs", post(run_code))
        .route("/v1/sessions/{id}/format", post(sessions::format_code))
}

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions/{id}/runs", get(list_runs))
        .route("/v1/sessions/{id}/runs/{run_id}", get(get_run))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RunResponse {
    pub run: Run,
    pub session: Session,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appreciation: Option<Appreciation>,
}

/// Format, build and test a snapshot in the session's workspace
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/runs",
    params(("id" = Uuid, Path, description = "Session id")),
    request_body = RunRequest,
    responses(
        (status = 200, description = "Run recorded", body = RunResponse),
        (status = 400, description = "Session is not active or the snapshot is invalid", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 502, description = "Execution backend failed", body = ApiError)
    ),
    tag = "runs"
)]
pub async fn run_code(
    State(state): State<AppState>,
    user: UserId,
    AppPath(id): AppPath<Uuid>,
    AppJson(req): AppJson<RunRequest>,
) -> Result<Json<RunResponse>, AppError> {
    let outcome = state.sessions.run_code(id, req).await?;
    let appreciation = state.appreciation.check_session(
        user.as_str(),
        &outcome.session,
        outcome.run.result.as_ref(),
    );
    Ok(Json(RunResponse {
        run: outcome.run,
        session: outcome.session,
        appreciation,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/runs",
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Runs, oldest first", body = Vec<Run>),
        (status = 404, description = "Unknown session", body = ApiError)
    ),
    tag = "runs"
)]
pub async fn list_runs(
    State(state): State<AppState>,
    AppPath(id): AppPath<Uuid>,
) -> Result<Json<Vec<Run>>, AppError> {
    Ok(Json(state.sessions.list_runs(id).await?))
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{id}/runs/{run_id}",
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("run_id" = Uuid, Path, description = "Run id")
    ),
    responses(
        (status = 200, description = "Run", body = Run),
        (status = 404, description = "Unknown session or run", body = ApiError)
    ),
    tag = "runs"
)]
pub async fn get_run(
    State(state): State<AppState>,
    AppPath((id, run_id)): AppPath<(Uuid, Uuid)>,
) -> Result<Json<Run>, AppError> {
    Ok(Json(state.sessions.get_run(id, run_id).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use uuid::Uuid;

    use crate::test_support::TestApp;

    #[tokio::test]
    async fn passing_first_run_is_appreciated() {
        let app = TestApp::new().await;
        let id = app.exercise_session().await;

        let (status, body) = app
            .post(
                &format!("/v1/sessions/{id}/runs"),
                json!({"code": {"main.go": "package main\n"}, "test": true}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["run"]["result"]["test"]["ok"], true);
        assert_eq!(body["session"]["run_count"], 1);
        assert_eq!(body["appreciation"]["moment"], "first_try_success");

        let run_id = body["run"]["id"].as_str().expect("run id").to_string();
        let (status, run) = app.get(&format!("/v1/sessions/{id}/runs/{run_id}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["id"], run_id.as_str());

        let (_, runs) = app.get(&format!("/v1/sessions/{id}/runs")).await;
        assert_eq!(runs.as_array().expect("array").len(), 1);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let app = TestApp::new().await;
        let id = app.exercise_session().await;
        let (status, body) = app
            .get(&format!("/v1/sessions/{id}/runs/{}", Uuid::now_v7()))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "run_not_found");
    }

    #[tokio::test]
    async fn run_body_requires_code() {
        let app = TestApp::new().await;
        let id = app.exercise_session().await;
        let (status, body) = app.post(&format!("/v1/sessions/{id}/runs"), json!({"test": true})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "code");
    }
}
