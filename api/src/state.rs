use std::sync::Arc;

use tutor_core::appreciation::AppreciationGenerator;
use tutor_core::llm::ProviderRegistry;
use tutor_core::sandbox::SandboxManager;
use tutor_core::{PatchPipeline, SessionManager, TutorEngine};

/// Shared application state available to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub patches: Arc<PatchPipeline>,
    pub engine: TutorEngine,
    pub llm: Arc<ProviderRegistry>,
    pub appreciation: Arc<AppreciationGenerator>,
    pub sandboxes: Arc<SandboxManager>,
}

impl AppState {
    /// Bind `sandboxes` to the session manager and wire the engine and patch
    /// pipeline around it.
    pub fn new(
        sessions: SessionManager,
        llm: Arc<ProviderRegistry>,
        sandboxes: Arc<SandboxManager>,
    ) -> Self {
        let sessions = Arc::new(sessions.with_sandboxes(sandboxes.clone()));
        let patches = Arc::new(PatchPipeline::new(sessions.clone()));
        let engine = TutorEngine::new(sessions.clone(), patches.clone(), llm.clone());
        Self {
            sessions,
            patches,
            engine,
            llm,
            appreciation: Arc::new(AppreciationGenerator::default()),
            sandboxes,
        }
    }

    pub fn storage_backend(&self) -> &'static str {
        self.sessions.store().backend()
    }
}
