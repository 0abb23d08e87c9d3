use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use tutor_core::policy::LearningPolicy;
use tutor_core::profile::LearningProfile;

use crate::error::AppError;
use crate::extract::AppPath;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/profiles/{user}", get(get_profile))
        .route("/v1/tracks", get(list_tracks))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TracksResponse {
    pub default_track: String,
    pub tracks: Vec<LearningPolicy>,
}

/// Aggregate learning history; empty for learners with no completed session
#[utoipa::path(
    get,
    path = "/v1/profiles/{user}",
    params(("user" = String, Path, description = "Learner id")),
    responses((status = 200, description = "Learning profile", body = LearningProfile)),
    tag = "profiles"
)]
pub async fn get_profile(
    State(state): State<AppState>,
    AppPath(user): AppPath<String>,
) -> Result<Json<LearningProfile>, AppError> {
    Ok(Json(state.sessions.profile(&user).await?))
}

#[utoipa::path(
    get,
    path = "/v1/tracks",
    responses((status = 200, description = "Built-in learning tracks", body = TracksResponse)),
    tag = "profiles"
)]
pub async fn list_tracks(State(state): State<AppState>) -> Json<TracksResponse> {
    let policies = state.sessions.policies();
    Json(TracksResponse {
        default_track: policies.default_track().to_string(),
        tracks: policies.tracks().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::test_support::TestApp;

    #[tokio::test]
    async fn unknown_learner_has_an_empty_profile() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/v1/profiles/grace").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "grace");
        assert_eq!(body["sessions_completed"], 0);
    }

    #[tokio::test]
    async fn tracks_include_the_builtins() {
        let app = TestApp::new().await;
        let (_, body) = app.get("/v1/tracks").await;
        assert_eq!(body["default_track"], "practice");
        let names: Vec<&str> = body["tracks"]
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|t| t["track"].as_str())
            .collect();
        for expected in ["practice", "interview_prep", "guided", "spec_authoring"] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }
}
