use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use tutor_core::error::{ApiError, ErrorKind, TutorError, codes};

/// Application error type that maps to structured API error responses.
#[derive(Debug)]
pub enum AppError {
    /// Failure raised by the tutoring core
    Tutor(TutorError),
    /// Malformed request rejected before reaching the core
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    NotFound {
        resource: String,
        docs_hint: Option<String>,
    },
    Internal(String),
}

impl From<TutorError> for AppError {
    fn from(err: TutorError) -> Self {
        AppError::Tutor(err)
    }
}

fn request_id() -> String {
    Uuid::now_v7().to_string()
}

fn received_for(err: &TutorError) -> Option<serde_json::Value> {
    match err {
        TutorError::LevelExceedsPolicy { requested, .. } => Some(serde_json::json!(requested)),
        TutorError::InvalidEscalationLevel(level) => Some(serde_json::json!(level)),
        TutorError::InsufficientHints { have, .. } => Some(serde_json::json!(have)),
        _ => None,
    }
}

fn hint_for(err: &TutorError) -> Option<String> {
    match err {
        TutorError::CooldownActive { retry_after_secs } => Some(format!(
            "Keep working on your own for {retry_after_secs}s, then ask again."
        )),
        TutorError::InsufficientHints { need, .. } => Some(format!(
            "Ask for at least {need} hints before escalating."
        )),
        TutorError::JustificationRequired { min_len } => Some(format!(
            "Explain in at least {min_len} characters what you tried and why it did not work."
        )),
        TutorError::LevelExceedsPolicy { max, .. } => Some(format!(
            "Request a level of {max} or lower, or escalate with a justification."
        )),
        TutorError::SessionNotActive { .. } => {
            Some("Start a new session to keep working.".to_string())
        }
        _ => None,
    }
}

fn tutor_response(err: TutorError) -> Response {
    let (status, class) = if matches!(err, TutorError::CooldownActive { .. }) {
        (StatusCode::TOO_MANY_REQUESTS, codes::RATE_LIMITED)
    } else {
        match err.kind() {
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, codes::NOT_FOUND),
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, codes::VALIDATION_FAILED),
            ErrorKind::StateConflict => (StatusCode::BAD_REQUEST, codes::POLICY_VIOLATION),
            ErrorKind::Upstream => {
                tracing::warn!(error = %err, code = err.code(), "upstream failure");
                (StatusCode::BAD_GATEWAY, codes::UPSTREAM_FAILED)
            }
            ErrorKind::Internal => {
                tracing::error!(error = %err, code = err.code(), "internal error");
                return internal_response();
            }
        }
    };

    let field = match &err {
        TutorError::InvalidRequest { field, .. } => field.clone(),
        TutorError::JustificationRequired { .. } => Some("justification".to_string()),
        TutorError::LevelExceedsPolicy { .. } | TutorError::InvalidEscalationLevel(_) => {
            Some("level".to_string())
        }
        _ => None,
    };

    let body = ApiError {
        error: class.to_string(),
        error_code: Some(err.code().to_string()),
        message: err.to_string(),
        field,
        received: received_for(&err),
        request_id: request_id(),
        docs_hint: hint_for(&err),
    };

    let mut response = (status, Json(body)).into_response();
    if let TutorError::CooldownActive { retry_after_secs } = err {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
    }
    response
}

fn internal_response() -> Response {
    let body = ApiError {
        error: codes::INTERNAL_ERROR.to_string(),
        error_code: None,
        message: "An internal error occurred".to_string(),
        field: None,
        received: None,
        request_id: request_id(),
        docs_hint: None,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Tutor(err) => tutor_response(err),
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: codes::VALIDATION_FAILED.to_string(),
                    error_code: None,
                    message,
                    field,
                    received,
                    request_id: request_id(),
                    docs_hint,
                }),
            )
                .into_response(),
            AppError::NotFound {
                resource,
                docs_hint,
            } => (
                StatusCode::NOT_FOUND,
                Json(ApiError {
                    error: codes::NOT_FOUND.to_string(),
                    error_code: None,
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id: request_id(),
                    docs_hint,
                }),
            )
                .into_response(),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                internal_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should collect")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("body should be json")
    }

    #[tokio::test]
    async fn cooldown_maps_to_429_with_retry_after() {
        let response =
            AppError::from(TutorError::CooldownActive { retry_after_secs: 12 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .expect("retry-after header should exist"),
            "12"
        );
        let body = body_json(response).await;
        assert_eq!(body["error"], codes::RATE_LIMITED);
        assert_eq!(body["error_code"], "cooldown_active");
    }

    #[tokio::test]
    async fn policy_rejections_are_bad_requests() {
        let response = AppError::from(TutorError::LevelExceedsPolicy {
            requested: 5,
            max: 3,
            track: "practice".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], codes::POLICY_VIOLATION);
        assert_eq!(body["field"], "level");
        assert_eq!(body["received"], 5);
    }

    #[tokio::test]
    async fn not_found_and_upstream_statuses() {
        let missing = AppError::from(TutorError::SessionNotFound(Uuid::now_v7())).into_response();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let upstream =
            AppError::from(TutorError::InterventionFailed("model offline".into())).into_response();
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn internal_errors_hide_details() {
        let response =
            AppError::from(TutorError::Internal("disk on fire at /var/lib".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], codes::INTERNAL_ERROR);
        assert!(!body["message"].as_str().unwrap_or_default().contains("/var/lib"));
    }
}
