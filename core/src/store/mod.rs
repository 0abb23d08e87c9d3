//! Persistence contract for sessions and their history.
//!
//! Backends are swappable: [`MemoryStore`] for tests and throwaway daemons,
//! [`FileStore`] for the default on-disk layout, and the Postgres store in
//! the API crate. Every record is keyed by its entity id; deleting a session
//! removes its runs, interventions and patches with it.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Intervention, Patch, Run, Session};
use crate::profile::LearningProfile;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored record could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("storage backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for health output and logs.
    fn backend(&self) -> &'static str;

    async fn load_session(&self, id: Uuid) -> Result<Option<Session>, StoreError>;
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;
    /// All sessions, newest first.
    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError>;
    /// Returns `false` when no such session existed.
    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn save_run(&self, run: &Run) -> Result<(), StoreError>;
    async fn load_run(&self, session_id: Uuid, run_id: Uuid) -> Result<Option<Run>, StoreError>;
    /// Runs of a session, oldest first.
    async fn list_runs(&self, session_id: Uuid) -> Result<Vec<Run>, StoreError>;

    async fn save_intervention(&self, intervention: &Intervention) -> Result<(), StoreError>;
    /// Interventions of a session, oldest first.
    async fn list_interventions(&self, session_id: Uuid) -> Result<Vec<Intervention>, StoreError>;

    async fn save_patch(&self, patch: &Patch) -> Result<(), StoreError>;
    /// Patches of a session, oldest first.
    async fn list_patches(&self, session_id: Uuid) -> Result<Vec<Patch>, StoreError>;

    async fn load_profile(&self, user_id: &str) -> Result<Option<LearningProfile>, StoreError>;
    async fn save_profile(&self, profile: &LearningProfile) -> Result<(), StoreError>;
}
