use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tutor_core::SessionManager;
use tutor_core::content::{FsExerciseLoader, FsSpecStore};
use tutor_core::executor::LocalExecutor;
use tutor_core::llm::{OllamaProvider, ProviderRegistry};
use tutor_core::policy::PolicyTable;
use tutor_core::sandbox::{LocalDirDriver, SandboxManager};
use tutor_core::store::{FileStore, Store};

mod config;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;
mod store;
#[cfg(test)]
mod test_support;

use config::Config;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tutor Daemon API",
        version = "0.1.0",
        description = "Pairing sessions with an AI tutor: runs, graded help, patches and appreciation."
    ),
    paths(
        routes::health::health_check,
        routes::sessions::list_sessions,
        routes::sessions::create_session,
        routes::sessions::get_session,
        routes::sessions::delete_session,
        routes::sessions::complete_session,
        routes::sessions::abandon_session,
        routes::sessions::list_interventions,
        routes::sessions::format_code,
        routes::sessions::satisfy_criterion,
        routes::runs::run_code,
        routes::runs::list_runs,
        routes::runs::get_run,
        routes::pairing::pair,
        routes::patches::preview_patch,
        routes::patches::apply_patch,
        routes::patches::reject_patch,
        routes::patches::list_patches,
        routes::sandbox::get_sandbox,
        routes::sandbox::ensure_sandbox,
        routes::sandbox::destroy_sandbox,
        routes::providers::list_providers,
        routes::providers::set_default_provider,
        routes::profiles::get_profile,
        routes::profiles::list_tracks,
    ),
    components(schemas(
        tutor_core::ApiError,
        routes::health::HealthResponse,
        routes::sessions::SessionListItem,
        routes::sessions::CompleteSessionResponse,
        routes::sessions::FormatRequest,
        routes::sessions::FormatResponse,
        routes::sessions::CriterionResponse,
        routes::runs::RunResponse,
        routes::providers::ProvidersResponse,
        routes::providers::SetDefaultProviderRequest,
        routes::profiles::TracksResponse,
        tutor_core::model::Session,
        tutor_core::model::CreateSessionRequest,
        tutor_core::model::Run,
        tutor_core::model::RunRequest,
        tutor_core::model::RunResult,
        tutor_core::model::StepResult,
        tutor_core::model::Intervention,
        tutor_core::model::InterventionIntent,
        tutor_core::model::Patch,
        tutor_core::model::PatchStatus,
        tutor_core::policy::HelpRequest,
        tutor_core::policy::LearningPolicy,
        tutor_core::PairingOutcome,
        tutor_core::patch::PatchPreview,
        tutor_core::patch::AppliedPatch,
        tutor_core::appreciation::Appreciation,
        tutor_core::appreciation::Moment,
        tutor_core::appreciation::SessionSummary,
        tutor_core::profile::LearningProfile,
        tutor_core::profile::TopicProgress,
        tutor_core::content::SpecProgress,
        tutor_core::content::AcceptanceCriterion,
        tutor_core::sandbox::Sandbox,
        tutor_core::sandbox::SandboxState,
        tutor_core::llm::ProviderInfo,
    )),
    tags(
        (name = "sessions", description = "Session lifecycle"),
        (name = "runs", description = "Format, build and test"),
        (name = "pairing", description = "Graded tutor help"),
        (name = "patches", description = "Proposed edits"),
    )
)]
struct ApiDoc;

async fn open_store(config: &Config) -> Arc<dyn Store> {
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("Failed to connect to database");
            sqlx::migrate!("../migrations")
                .run(&pool)
                .await
                .expect("Failed to run migrations");
            Arc::new(store::PgStore::new(pool))
        }
        None => {
            let root = config.data_dir.join("sessions");
            Arc::new(
                FileStore::open(&root)
                    .await
                    .expect("Failed to open session store"),
            )
        }
    }
}

fn provider_registry(config: &Config) -> Arc<ProviderRegistry> {
    let registry = Arc::new(ProviderRegistry::new());
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("Failed to build HTTP client");
    registry.register(
        "ollama",
        Arc::new(OllamaProvider::new(
            client,
            config.ollama_url.clone(),
            config.ollama_model.clone(),
        )),
    );
    if let Some(name) = &config.default_provider {
        if let Err(e) = registry.set_default(name) {
            tracing::warn!(provider = %name, error = %e, "configured default provider is not registered");
        }
    }
    registry
}

/// Destroy sandboxes idle for longer than `max_idle`, checking at a
/// fraction of that interval.
fn spawn_sandbox_reaper(sandboxes: Arc<SandboxManager>, max_idle: Duration) {
    let period = (max_idle / 4).clamp(Duration::from_secs(5), Duration::from_secs(60));
    let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
        tracing::warn!("sandbox idle limit out of range, reaper disabled");
        return;
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let reaped = sandboxes.reap_idle(chrono::Utc::now(), max_idle).await;
            if !reaped.is_empty() {
                tracing::info!(count = reaped.len(), "reaped idle sandboxes");
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tutor_api=debug,tutor_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let store = open_store(&config).await;
    let sessions = SessionManager::new(
        store,
        Arc::new(LocalExecutor::new(config.executor.clone())),
        Arc::new(FsExerciseLoader::new(&config.exercises_dir)),
        Arc::new(FsSpecStore::new(&config.specs_dir)),
        PolicyTable::builtin(&config.default_track),
    );
    let sandboxes = Arc::new(SandboxManager::new(Arc::new(LocalDirDriver::new(
        &config.sandbox_root,
    ))));
    spawn_sandbox_reaper(sandboxes.clone(), config.sandbox_idle);

    let app_state = state::AppState::new(sessions, provider_registry(&config), sandboxes);
    tracing::info!(
        storage = app_state.storage_backend(),
        exercises = %config.exercises_dir.display(),
        specs = %config.specs_dir.display(),
        track = %config.default_track,
        "tutor daemon configured"
    );

    let cors_layer = middleware::cors::build_cors_layer();

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::router(true))
        .layer(middleware::access_log::AccessLogLayer::new())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let addr = config.listen_addr();
    tracing::info!("Tutor daemon listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_pairing_and_patch_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/v1/sessions",
            "/v1/sessions/{id}/{intent}",
            "/v1/sessions/{id}/patch/apply",
            "/v1/sessions/{id}/spec/criteria/{criterion_id}/satisfy",
        ] {
            assert!(paths.iter().any(|p| p.as_str() == expected), "missing {expected}");
        }
    }
}
