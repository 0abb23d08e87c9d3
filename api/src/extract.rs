//! Custom extractors that convert axum rejections to structured AppError responses.
//!
//! Use `AppJson<T>` / `AppPath<T>` as drop-in replacements for `axum::Json<T>` /
//! `axum::extract::Path<T>`. Failures produce a JSON `AppError` instead of
//! axum's default plain-text rejection.

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Path, Request, rejection::JsonRejection},
    http::request::Parts,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

pub const USER_HEADER: &str = "x-user-id";
pub const DEFAULT_USER: &str = "local";
const MAX_USER_LEN: usize = 128;

/// JSON extractor that converts deserialization errors to structured `AppError` responses.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

/// Convert a `JsonRejection` to a structured `AppError::Validation`.
pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let field_hint = extract_field_from_serde_message(&body_text);

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field_hint.unwrap_or("body".to_string())),
        received: None,
        docs_hint: Some(
            "Check the request body against the endpoint's schema (GET /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

/// Try to extract a field name from serde's error messages.
fn extract_field_from_serde_message(msg: &str) -> Option<String> {
    for pattern in ["missing field `", "unknown field `", "unknown variant `"] {
        if let Some(start) = msg.find(pattern) {
            let after = &msg[start + pattern.len()..];
            if let Some(end) = after.find('`') {
                return Some(after[..end].to_string());
            }
        }
    }
    None
}

/// Path extractor whose rejection is a validation error naming the bad segment.
pub struct AppPath<T>(pub T);

impl<S, T> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(AppPath(value)),
            Err(rejection) => Err(AppError::Validation {
                message: format!("Invalid path: {}", rejection.body_text()),
                field: Some("path".to_string()),
                received: Some(serde_json::json!(parts.uri.path())),
                docs_hint: Some("Session and run ids are UUIDs.".to_string()),
            }),
        }
    }
}

/// Learner identity taken from the `x-user-id` header. Absent means the
/// single local learner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn valid_user_id(id: &str) -> bool {
    id.len() <= MAX_USER_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_HEADER) else {
            return Ok(UserId(DEFAULT_USER.to_string()));
        };
        let value = raw.to_str().map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return Ok(UserId(DEFAULT_USER.to_string()));
        }
        if !valid_user_id(value) {
            return Err(AppError::Validation {
                message: format!("Invalid {USER_HEADER} header"),
                field: Some(USER_HEADER.to_string()),
                received: Some(serde_json::json!(value)),
                docs_hint: Some(format!(
                    "Use up to {MAX_USER_LEN} letters, digits or '-', '_', '.', '@'."
                )),
            });
        }
        Ok(UserId(value.to_string()))
    }
}
