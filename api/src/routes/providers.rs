use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use tutor_core::error::ApiError;
use tutor_core::llm::{LlmError, ProviderInfo};

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/providers", get(list_providers))
        .route("/v1/providers/default", put(set_default_provider))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetDefaultProviderRequest {
    pub name: String,
}

fn snapshot(state: &AppState) -> ProvidersResponse {
    ProvidersResponse {
        providers: state.llm.list(),
        default: state.llm.default_name(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/providers",
    responses((status = 200, description = "Registered LLM providers", body = ProvidersResponse)),
    tag = "providers"
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(snapshot(&state))
}

/// Route future requests without an explicit provider to `name`
#[utoipa::path(
    put,
    path = "/v1/providers/default",
    request_body = SetDefaultProviderRequest,
    responses(
        (status = 200, description = "Default changed", body = ProvidersResponse),
        (status = 404, description = "No provider with that name", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn set_default_provider(
    State(state): State<AppState>,
    AppJson(req): AppJson<SetDefaultProviderRequest>,
) -> Result<Json<ProvidersResponse>, AppError> {
    state.llm.set_default(req.name.trim()).map_err(|e| match e {
        LlmError::UnknownProvider(name) => AppError::NotFound {
            resource: format!("provider '{name}'"),
            docs_hint: Some("GET /v1/providers lists the registered providers.".to_string()),
        },
        other => AppError::Internal(other.to_string()),
    })?;
    tracing::info!(provider = %req.name.trim(), "default provider changed");
    Ok(Json(snapshot(&state)))
}
