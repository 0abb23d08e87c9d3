//! Patch pipeline: pull a single-file edit out of tutor content, stage it,
//! and let the learner apply or reject it.
//!
//! Extraction is deliberately conservative. Content that names several
//! files, contains a diff, or is otherwise ambiguous yields no patch.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use similar::TextDiff;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::TutorError;
use crate::executor::validate_file_name;
use crate::model::{Code, Intervention, Patch, PatchStatus, Session};
use crate::session::{SessionLock, SessionManager};

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^[ \t]*```([^\n`]*)\n(.*?)^[ \t]*```[ \t]*$").expect("valid regex")
});
static TITLE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:title|file|filename)=["']?([^"'\s]+)["']?"#).expect("valid regex")
});
static FILE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?://|#|--|;)\s*(?:file|filename|path):\s*(\S+)\s*$").expect("valid regex")
});

const DIFF_LANGUAGES: [&str; 2] = ["diff", "patch"];

#[derive(Debug, PartialEq)]
struct Block {
    file: Option<String>,
    content: String,
    is_diff: bool,
}

fn looks_like_file(token: &str) -> bool {
    let Some((stem, ext)) = token.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && !ext.is_empty()
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && validate_file_name(token).is_ok()
}

fn parse_block(info: &str, body: &str) -> Block {
    let info = info.trim();
    let language = info.split_whitespace().next().unwrap_or("");
    let is_diff = DIFF_LANGUAGES.contains(&language.to_ascii_lowercase().as_str());

    let mut file = TITLE_ATTR
        .captures(info)
        .map(|c| c[1].to_string())
        .or_else(|| {
            info.split_whitespace()
                .find(|token| looks_like_file(token))
                .map(str::to_string)
        });

    let mut content = body.to_string();
    if file.is_none() {
        let first_line = body.lines().next().unwrap_or("");
        if let Some(caps) = FILE_MARKER.captures(first_line) {
            if looks_like_file(&caps[1]) {
                file = Some(caps[1].to_string());
                content = body
                    .split_once('\n')
                    .map(|(_, rest)| rest.to_string())
                    .unwrap_or_default();
            }
        }
    }

    Block {
        file: file.filter(|f| validate_file_name(f).is_ok()),
        content,
        is_diff,
    }
}

fn fenced_blocks(content: &str) -> Vec<Block> {
    FENCE
        .captures_iter(content)
        .map(|caps| parse_block(&caps[1], &caps[2]))
        .collect()
}

/// Candidate patches for `intervention` against `current_code`. Returns at
/// most one patch, and none whenever the target is ambiguous or the proposal
/// matches the current file.
pub fn extract_from_intervention(
    intervention: &Intervention,
    session_id: Uuid,
    current_code: &Code,
) -> Vec<Patch> {
    let blocks = fenced_blocks(&intervention.content);
    if blocks.is_empty() || blocks.iter().any(|b| b.is_diff) {
        return Vec::new();
    }

    let tagged: Vec<&Block> = blocks.iter().filter(|b| b.file.is_some()).collect();
    let (target, content) = match tagged.as_slice() {
        [only] => match &only.file {
            Some(file) => (file.clone(), only.content.clone()),
            None => return Vec::new(),
        },
        [] => {
            let single_file = if current_code.len() == 1 {
                current_code.keys().next()
            } else {
                None
            };
            match (blocks.as_slice(), single_file) {
                ([only], Some(file)) => (file.clone(), only.content.clone()),
                _ => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    if content.trim().is_empty() || current_code.get(&target) == Some(&content) {
        return Vec::new();
    }

    vec![Patch {
        id: Uuid::now_v7(),
        session_id,
        intervention_id: intervention.id,
        target_file: target,
        proposed_content: content,
        status: PatchStatus::Pending,
        created_at: Utc::now(),
        resolved_at: None,
    }]
}

/// Unified line diff of one file.
pub fn unified_diff(file: &str, current: &str, proposed: &str) -> String {
    TextDiff::from_lines(current, proposed)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{file}"), &format!("b/{file}"))
        .to_string()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PatchPreview {
    /// False when nothing is pending; the other fields are then absent
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    /// Empty when the patch creates a new file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

impl PatchPreview {
    fn none() -> Self {
        Self {
            pending: false,
            patch: None,
            target_file: None,
            current_content: None,
            proposed_content: None,
            diff: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AppliedPatch {
    pub patch: Patch,
    pub file: String,
    pub content: String,
    pub session: Session,
}

pub struct PatchPipeline {
    sessions: Arc<SessionManager>,
}

impl PatchPipeline {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    async fn pending(&self, session_id: Uuid) -> Result<Option<Patch>, TutorError> {
        let patches = self.sessions.store().list_patches(session_id).await?;
        Ok(patches
            .into_iter()
            .rev()
            .find(|p| p.status == PatchStatus::Pending))
    }

    /// Stage `patch` as the session's only pending patch. Whatever was
    /// pending before is marked expired.
    pub async fn stage_locked(&self, lock: &SessionLock, patch: Patch) -> Result<Patch, TutorError> {
        let session_id = lock.session_id();
        if patch.session_id != session_id {
            return Err(TutorError::Internal(format!(
                "patch for {} staged under lock for {session_id}",
                patch.session_id
            )));
        }

        let store = self.sessions.store();
        let now = Utc::now();
        for mut stale in store
            .list_patches(session_id)
            .await?
            .into_iter()
            .filter(|p| p.status == PatchStatus::Pending)
        {
            stale.status = PatchStatus::Expired;
            stale.resolved_at = Some(now);
            store.save_patch(&stale).await?;
            tracing::debug!(session_id = %session_id, patch_id = %stale.id, "pending patch superseded");
        }

        store.save_patch(&patch).await?;
        tracing::info!(
            session_id = %session_id,
            patch_id = %patch.id,
            target_file = %patch.target_file,
            "patch staged"
        );
        Ok(patch)
    }

    /// Extract from `intervention` and stage the result, if any.
    pub async fn stage_from_intervention_locked(
        &self,
        lock: &SessionLock,
        intervention: &Intervention,
        current_code: &Code,
    ) -> Result<Option<Patch>, TutorError> {
        match extract_from_intervention(intervention, lock.session_id(), current_code)
            .into_iter()
            .next()
        {
            Some(patch) => self.stage_locked(lock, patch).await.map(Some),
            None => Ok(None),
        }
    }

    /// Safe read: "nothing pending" is a normal answer, not an error.
    pub async fn preview_pending(&self, session_id: Uuid) -> Result<PatchPreview, TutorError> {
        let session = self.sessions.get(session_id).await?;
        let Some(patch) = self.pending(session_id).await? else {
            return Ok(PatchPreview::none());
        };
        let current = session
            .code
            .get(&patch.target_file)
            .cloned()
            .unwrap_or_default();
        Ok(PatchPreview {
            pending: true,
            target_file: Some(patch.target_file.clone()),
            diff: Some(unified_diff(
                &patch.target_file,
                &current,
                &patch.proposed_content,
            )),
            current_content: Some(current),
            proposed_content: Some(patch.proposed_content.clone()),
            patch: Some(patch),
        })
    }

    pub async fn apply_pending(&self, session_id: Uuid) -> Result<AppliedPatch, TutorError> {
        let lock = self.sessions.lock(session_id).await;
        let session = self.sessions.get_locked(&lock).await?;
        if !session.is_active() {
            return Err(TutorError::SessionNotActive {
                id: session_id,
                status: session.status,
            });
        }
        let mut patch = self
            .pending(session_id)
            .await?
            .ok_or(TutorError::PatchNotFound(session_id))?;

        // Resolve the patch first so a failed write can never leave it
        // applicable twice.
        patch.status = PatchStatus::Applied;
        patch.resolved_at = Some(Utc::now());
        self.sessions.store().save_patch(&patch).await?;

        let mut code = session.code;
        code.insert(patch.target_file.clone(), patch.proposed_content.clone());
        let session = match self.sessions.update_code_locked(&lock, code).await {
            Ok(session) => session,
            Err(err) => {
                patch.status = PatchStatus::Pending;
                patch.resolved_at = None;
                if let Err(e) = self.sessions.store().save_patch(&patch).await {
                    tracing::error!(session_id = %session_id, patch_id = %patch.id, error = %e, "failed to reopen patch");
                }
                return Err(err);
            }
        };

        tracing::info!(session_id = %session_id, patch_id = %patch.id, "patch applied");
        Ok(AppliedPatch {
            file: patch.target_file.clone(),
            content: patch.proposed_content.clone(),
            patch,
            session,
        })
    }

    pub async fn reject_pending(&self, session_id: Uuid) -> Result<Patch, TutorError> {
        let lock = self.sessions.lock(session_id).await;
        self.sessions.get_locked(&lock).await?;
        let mut patch = self
            .pending(session_id)
            .await?
            .ok_or(TutorError::PatchNotFound(session_id))?;

        patch.status = PatchStatus::Rejected;
        patch.resolved_at = Some(Utc::now());
        self.sessions.store().save_patch(&patch).await?;
        tracing::info!(session_id = %session_id, patch_id = %patch.id, "patch rejected");
        Ok(patch)
    }

    /// Every patch of the session, all statuses, oldest first.
    pub async fn session_patches(&self, session_id: Uuid) -> Result<Vec<Patch>, TutorError> {
        self.sessions.get(session_id).await?;
        Ok(self.sessions.store().list_patches(session_id).await?)
    }
}
