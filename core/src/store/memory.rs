use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::model::{Intervention, Patch, Run, Session};
use crate::profile::LearningProfile;

#[derive(Default)]
struct SessionRecords {
    session: Option<Session>,
    runs: Vec<Run>,
    interventions: Vec<Intervention>,
    patches: Vec<Patch>,
}

/// In-process store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, SessionRecords>>,
    profiles: RwLock<HashMap<String, LearningProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn upsert<T: Clone>(items: &mut Vec<T>, item: &T, same: impl Fn(&T) -> bool) {
    match items.iter_mut().find(|existing| same(existing)) {
        Some(existing) => *existing = item.clone(),
        None => items.push(item.clone()),
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).and_then(|r| r.session.clone()))
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session.id).or_default().session = Some(session.clone());
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<Session> = sessions
            .values()
            .filter_map(|r| r.session.clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .remove(&id)
            .is_some_and(|records| records.session.is_some()))
    }

    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let records = sessions.entry(run.session_id).or_default();
        upsert(&mut records.runs, run, |r| r.id == run.id);
        Ok(())
    }

    async fn load_run(&self, session_id: Uuid, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&session_id)
            .and_then(|r| r.runs.iter().find(|run| run.id == run_id).cloned()))
    }

    async fn list_runs(&self, session_id: Uuid) -> Result<Vec<Run>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&session_id)
            .map(|r| r.runs.clone())
            .unwrap_or_default())
    }

    async fn save_intervention(&self, intervention: &Intervention) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let records = sessions.entry(intervention.session_id).or_default();
        upsert(&mut records.interventions, intervention, |i| {
            i.id == intervention.id
        });
        Ok(())
    }

    async fn list_interventions(&self, session_id: Uuid) -> Result<Vec<Intervention>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&session_id)
            .map(|r| r.interventions.clone())
            .unwrap_or_default())
    }

    async fn save_patch(&self, patch: &Patch) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let records = sessions.entry(patch.session_id).or_default();
        upsert(&mut records.patches, patch, |p| p.id == patch.id);
        Ok(())
    }

    async fn list_patches(&self, session_id: Uuid) -> Result<Vec<Patch>, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&session_id)
            .map(|r| r.patches.clone())
            .unwrap_or_default())
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<LearningProfile>, StoreError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn save_profile(&self, profile: &LearningProfile) -> Result<(), StoreError> {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }
}
