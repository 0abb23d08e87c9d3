//! Long-lived execution environments bound one-to-one to sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("no sandbox for session {0}")]
    NotFound(Uuid),

    #[error("sandbox driver failed: {0}")]
    Driver(String),

    #[error("sandbox {id} is {state}, cannot {action}")]
    InvalidState {
        id: Uuid,
        state: SandboxState,
        action: &'static str,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Creating,
    Ready,
    Busy,
    Stopped,
    Failed,
}

impl std::fmt::Display for SandboxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SandboxState::Creating => "creating",
            SandboxState::Ready => "ready",
            SandboxState::Busy => "busy",
            SandboxState::Stopped => "stopped",
            SandboxState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Sandbox {
    pub id: Uuid,
    pub session_id: Uuid,
    pub state: SandboxState,
    /// Where the driver placed the environment
    pub workdir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Provisions and tears down the environment behind a sandbox.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    /// Returns the working directory of the new environment.
    async fn create(&self, sandbox_id: Uuid) -> Result<String, SandboxError>;
    async fn destroy(&self, sandbox_id: Uuid, workdir: &str) -> Result<(), SandboxError>;
}

/// One directory per sandbox below a root.
pub struct LocalDirDriver {
    root: PathBuf,
}

impl LocalDirDriver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SandboxDriver for LocalDirDriver {
    async fn create(&self, sandbox_id: Uuid) -> Result<String, SandboxError> {
        let dir = self.root.join(sandbox_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SandboxError::Driver(format!("create {}: {e}", dir.display())))?;
        Ok(dir.to_string_lossy().into_owned())
    }

    async fn destroy(&self, _sandbox_id: Uuid, workdir: &str) -> Result<(), SandboxError> {
        match tokio::fs::remove_dir_all(workdir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::Driver(format!("remove {workdir}: {e}"))),
        }
    }
}

/// Tracks sandboxes by session. At most one sandbox exists per session.
pub struct SandboxManager {
    driver: Arc<dyn SandboxDriver>,
    sandboxes: Mutex<HashMap<Uuid, Sandbox>>,
}

impl SandboxManager {
    pub fn new(driver: Arc<dyn SandboxDriver>) -> Self {
        Self {
            driver,
            sandboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Return the session's sandbox, creating it on first use. A sandbox left
    /// `failed` or `stopped` is replaced.
    pub async fn ensure(&self, session_id: Uuid) -> Result<Sandbox, SandboxError> {
        let mut sandboxes = self.sandboxes.lock().await;
        if let Some(existing) = sandboxes.get(&session_id) {
            if !matches!(existing.state, SandboxState::Failed | SandboxState::Stopped) {
                return Ok(existing.clone());
            }
        }

        let now = Utc::now();
        let mut sandbox = Sandbox {
            id: Uuid::now_v7(),
            session_id,
            state: SandboxState::Creating,
            workdir: String::new(),
            error: None,
            created_at: now,
            last_used_at: now,
        };

        match self.driver.create(sandbox.id).await {
            Ok(workdir) => {
                sandbox.workdir = workdir;
                sandbox.state = SandboxState::Ready;
                tracing::info!(session_id = %session_id, sandbox_id = %sandbox.id, "sandbox ready");
                sandboxes.insert(session_id, sandbox.clone());
                Ok(sandbox)
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "sandbox creation failed");
                sandbox.state = SandboxState::Failed;
                sandbox.error = Some(e.to_string());
                sandboxes.insert(session_id, sandbox);
                Err(e)
            }
        }
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Sandbox> {
        self.sandboxes.lock().await.get(&session_id).cloned()
    }

    pub async fn list(&self) -> Vec<Sandbox> {
        let mut all: Vec<Sandbox> = self.sandboxes.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub async fn touch(&self, session_id: Uuid) -> Result<(), SandboxError> {
        let mut sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get_mut(&session_id)
            .ok_or(SandboxError::NotFound(session_id))?;
        sandbox.last_used_at = Utc::now();
        Ok(())
    }

    /// Transition `ready` → `busy` for the duration of an execution.
    pub async fn mark_busy(&self, session_id: Uuid) -> Result<(), SandboxError> {
        self.transition(session_id, SandboxState::Ready, SandboxState::Busy, "start work")
            .await
    }

    pub async fn mark_ready(&self, session_id: Uuid) -> Result<(), SandboxError> {
        self.transition(session_id, SandboxState::Busy, SandboxState::Ready, "finish work")
            .await
    }

    async fn transition(
        &self,
        session_id: Uuid,
        from: SandboxState,
        to: SandboxState,
        action: &'static str,
    ) -> Result<(), SandboxError> {
        let mut sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get_mut(&session_id)
            .ok_or(SandboxError::NotFound(session_id))?;
        if sandbox.state != from {
            return Err(SandboxError::InvalidState {
                id: sandbox.id,
                state: sandbox.state,
                action,
            });
        }
        sandbox.state = to;
        sandbox.last_used_at = Utc::now();
        Ok(())
    }

    /// Tear down and forget the session's sandbox.
    pub async fn destroy(&self, session_id: Uuid) -> Result<Sandbox, SandboxError> {
        let removed = self
            .sandboxes
            .lock()
            .await
            .remove(&session_id)
            .ok_or(SandboxError::NotFound(session_id))?;
        self.driver.destroy(removed.id, &removed.workdir).await?;
        tracing::info!(session_id = %session_id, sandbox_id = %removed.id, "sandbox destroyed");
        Ok(Sandbox {
            state: SandboxState::Stopped,
            ..removed
        })
    }

    /// Destroy `ready` sandboxes unused for longer than `max_idle`. Busy ones
    /// are left alone. Returns the reaped session ids.
    pub async fn reap_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> Vec<Uuid> {
        let idle: Vec<Uuid> = {
            let sandboxes = self.sandboxes.lock().await;
            sandboxes
                .values()
                .filter(|s| {
                    matches!(s.state, SandboxState::Ready | SandboxState::Failed)
                        && now.signed_duration_since(s.last_used_at) > max_idle
                })
                .map(|s| s.session_id)
                .collect()
        };

        let mut reaped = Vec::with_capacity(idle.len());
        for session_id in idle {
            match self.destroy(session_id).await {
                Ok(_) => reaped.push(session_id),
                Err(e) => tracing::warn!(session_id = %session_id, error = %e, "idle reap failed"),
            }
        }
        reaped
    }
}
