use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::model::{Intervention, Patch, Run, Session};
use crate::profile::LearningProfile;

/// JSON files on disk, one directory per session:
///
/// ```text
/// <root>/sessions/<id>/session.json
/// <root>/sessions/<id>/runs/<run_id>.json
/// <root>/sessions/<id>/interventions/<intervention_id>.json
/// <root>/sessions/<id>/patches/<patch_id>.json
/// <root>/profiles/<user>.json
/// ```
///
/// Writes go to a temp file in the same directory and are renamed into
/// place, so readers never observe a partially written record.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("sessions")).await?;
        tokio::fs::create_dir_all(root.join("profiles")).await?;
        Ok(Self { root })
    }

    fn session_dir(&self, id: Uuid) -> PathBuf {
        self.root.join("sessions").join(id.to_string())
    }

    fn profile_path(&self, user_id: &str) -> PathBuf {
        self.root
            .join("profiles")
            .join(format!("{}.json", sanitize_key(user_id)))
    }
}

/// Keep user-supplied keys inside the profiles directory.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Backend(format!("{} has no parent", path.display())))?;
    tokio::fs::create_dir_all(dir).await?;

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = dir.join(format!(".tmp-{}", Uuid::now_v7()));
    tokio::fs::write(&tmp, &json).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Decode every `*.json` file in `dir`, skipping temp files. A missing
/// directory reads as empty.
async fn read_dir_json<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut items = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            if let Some(item) = read_json(&path).await? {
                items.push(item);
            }
        }
    }
    Ok(items)
}

#[async_trait]
impl Store for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        read_json(&self.session_dir(id).join("session.json")).await
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        write_json(&self.session_dir(session.id).join("session.json"), session).await
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let mut entries = tokio::fs::read_dir(self.root.join("sessions")).await?;
        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match read_json::<Session>(&entry.path().join("session.json")).await {
                Ok(Some(session)) => sessions.push(session),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable session");
                }
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, StoreError> {
        let dir = self.session_dir(id);
        let existed = tokio::fs::try_exists(dir.join("session.json")).await?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(existed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        let path = self
            .session_dir(run.session_id)
            .join("runs")
            .join(format!("{}.json", run.id));
        write_json(&path, run).await
    }

    async fn load_run(&self, session_id: Uuid, run_id: Uuid) -> Result<Option<Run>, StoreError> {
        let path = self
            .session_dir(session_id)
            .join("runs")
            .join(format!("{run_id}.json"));
        read_json(&path).await
    }

    async fn list_runs(&self, session_id: Uuid) -> Result<Vec<Run>, StoreError> {
        let mut runs: Vec<Run> = read_dir_json(&self.session_dir(session_id).join("runs")).await?;
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }

    async fn save_intervention(&self, intervention: &Intervention) -> Result<(), StoreError> {
        let path = self
            .session_dir(intervention.session_id)
            .join("interventions")
            .join(format!("{}.json", intervention.id));
        write_json(&path, intervention).await
    }

    async fn list_interventions(&self, session_id: Uuid) -> Result<Vec<Intervention>, StoreError> {
        let mut items: Vec<Intervention> =
            read_dir_json(&self.session_dir(session_id).join("interventions")).await?;
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    async fn save_patch(&self, patch: &Patch) -> Result<(), StoreError> {
        let path = self
            .session_dir(patch.session_id)
            .join("patches")
            .join(format!("{}.json", patch.id));
        write_json(&path, patch).await
    }

    async fn list_patches(&self, session_id: Uuid) -> Result<Vec<Patch>, StoreError> {
        let mut patches: Vec<Patch> =
            read_dir_json(&self.session_dir(session_id).join("patches")).await?;
        patches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(patches)
    }

    async fn load_profile(&self, user_id: &str) -> Result<Option<LearningProfile>, StoreError> {
        read_json(&self.profile_path(user_id)).await
    }

    async fn save_profile(&self, profile: &LearningProfile) -> Result<(), StoreError> {
        write_json(&self.profile_path(&profile.user_id), profile).await
    }
}
