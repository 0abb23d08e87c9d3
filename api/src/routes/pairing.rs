use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use tutor_core::error::ApiError;
use tutor_core::model::InterventionIntent;
use tutor_core::policy::HelpRequest;
use tutor_core::{PairingEvent, PairingOutcome, TutorError};

use crate::error::AppError;
use crate::extract::AppPath;
use crate::state::AppState;

/// Pairing routes. Rate limited by the caller.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/sessions/{id}/{intent}", post(pair))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PairingQuery {
    /// Answer with server-sent events instead of a single JSON body
    #[serde(default)]
    pub stream: bool,
}

fn parse_help_request(body: &Bytes) -> Result<HelpRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(HelpRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| AppError::Validation {
        message: format!("Invalid request body: {e}"),
        field: Some("body".to_string()),
        received: None,
        docs_hint: Some(
            "Send an object with optional level, justification, run_id, provider and question."
                .to_string(),
        ),
    })
}

fn event_json(name: &'static str, value: &impl serde::Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(value)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, event = name, "failed to encode stream event");
            Event::default().event("error").data("encoding failed")
        })
}

fn error_event(err: &TutorError) -> Event {
    event_json(
        "error",
        &serde_json::json!({
            "error_code": err.code(),
            "message": err.to_string(),
        }),
    )
}

/// Ask the tutor for help: hint, review, stuck, next, explain or escalate
///
/// With `?stream=true` the answer arrives as server-sent events: `token`
/// events carry `{"content": ...}` fragments, a final `done` event carries
/// the recorded intervention (and staged patch), and `error` ends a failed
/// stream. Gate rejections are returned as plain JSON errors either way.
#[utoipa::path(
    post,
    path = "/v1/sessions/{id}/{intent}",
    params(
        ("id" = Uuid, Path, description = "Session id"),
        ("intent" = InterventionIntent, Path, description = "What kind of help is wanted"),
        PairingQuery
    ),
    request_body(content = HelpRequest, description = "Optional; an empty body uses intent defaults"),
    responses(
        (status = 200, description = "Intervention recorded", body = PairingOutcome),
        (status = 400, description = "Policy gate rejected the request", body = ApiError),
        (status = 404, description = "Unknown session", body = ApiError),
        (status = 429, description = "Cooldown active", body = ApiError),
        (status = 502, description = "Model call failed", body = ApiError)
    ),
    tag = "pairing"
)]
pub async fn pair(
    State(state): State<AppState>,
    AppPath((id, intent)): AppPath<(Uuid, InterventionIntent)>,
    Query(query): Query<PairingQuery>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = parse_help_request(&body)?;

    if !query.stream {
        let outcome = state.engine.request(id, intent, request).await?;
        return Ok(Json(outcome).into_response());
    }

    let stream = state.engine.stream(id, intent, request).await?;
    let events = stream.map(move |item| {
        let event = match item {
            Ok(PairingEvent::Token(content)) => {
                event_json("token", &serde_json::json!({ "content": content }))
            }
            Ok(PairingEvent::Done(outcome)) => event_json("done", &*outcome),
            Err(err) => {
                tracing::warn!(session_id = %id, intent = %intent, error = %err, "pairing stream failed");
                error_event(&err)
            }
        };
        Ok::<_, Infallible>(event)
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::test_support::TestApp;

    #[test]
    fn blank_body_means_defaults() {
        let req = parse_help_request(&Bytes::from_static(b"  \n")).expect("defaults");
        assert!(req.level.is_none());
        assert!(parse_help_request(&Bytes::from_static(b"{\"level\": \"x\"}")).is_err());
    }

    #[tokio::test]
    async fn hint_records_intervention_then_cools_down() {
        let app = TestApp::new().await;
        let id = app.exercise_session().await;

        let (status, body) = app.post_raw(&format!("/v1/sessions/{id}/hint"), "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intervention"]["intent"], "hint");
        assert_eq!(body["intervention"]["level"], 1);
        assert_eq!(body["session"]["hint_count"], 1);

        let (status, body) = app
            .post(&format!("/v1/sessions/{id}/review"), json!({}))
            .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error_code"], "cooldown_active");
    }

    #[tokio::test]
    async fn escalation_without_hints_is_rejected() {
        let app = TestApp::new().await;
        let id = app.exercise_session().await;
        let (status, body) = app
            .post(
                &format!("/v1/sessions/{id}/escalate"),
                json!({"level": 5, "justification": "I have tried this for an hour"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "insufficient_hints");
    }

    #[tokio::test]
    async fn unknown_intent_is_rejected() {
        let app = TestApp::new().await;
        let id = app.exercise_session().await;
        let (status, _) = app.post(&format!("/v1/sessions/{id}/solve"), json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn streaming_answers_with_sse() {
        let app = TestApp::new().await;
        let id = app.exercise_session().await;

        let (status, content_type, text) = app
            .post_text(&format!("/v1/sessions/{id}/explain?stream=true"), "{}")
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/event-stream"));
        assert!(text.contains("event: token"));
        assert!(text.contains("event: done"));

        let (_, session) = app.get(&format!("/v1/sessions/{id}")).await;
        assert_eq!(session["hint_count"], 1);
    }
}
