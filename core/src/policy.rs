//! Learning tracks and the help-request gate.
//!
//! Every help request passes three checks in order and stops at the first
//! failure: session state, cooldown, then level (or the escalation
//! preconditions when the learner explicitly escalates).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{MIN_HINTS_FOR_ESCALATION, MIN_JUSTIFICATION_LEN, TutorError};
use crate::model::{InterventionIntent, MAX_LEVEL, Session};

pub const DEFAULT_TRACK: &str = "practice";

/// Per-track help policy, frozen into a session at creation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct LearningPolicy {
    /// Highest level obtainable without explicit escalation
    pub max_level: u8,
    /// Minimum spacing between interventions in one session
    pub cooldown_seconds: u64,
    pub track: String,
}

impl LearningPolicy {
    pub fn new(track: impl Into<String>, max_level: u8, cooldown_seconds: u64) -> Self {
        Self {
            max_level,
            cooldown_seconds,
            track: track.into(),
        }
    }
}

/// Registry of named tracks with a fallback.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    tracks: BTreeMap<String, LearningPolicy>,
    default_track: String,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::builtin(DEFAULT_TRACK)
    }
}

impl PolicyTable {
    /// Built-in tracks. An unknown `default_track` falls back to `practice`.
    pub fn builtin(default_track: &str) -> Self {
        let tracks: BTreeMap<String, LearningPolicy> = [
            LearningPolicy::new("practice", 3, 30),
            LearningPolicy::new("interview_prep", 2, 60),
            LearningPolicy::new("guided", 4, 10),
            LearningPolicy::new("spec_authoring", 3, 15),
        ]
        .into_iter()
        .map(|policy| (policy.track.clone(), policy))
        .collect();

        let default_track = if tracks.contains_key(default_track) {
            default_track.to_string()
        } else {
            DEFAULT_TRACK.to_string()
        };
        Self {
            tracks,
            default_track,
        }
    }

    pub fn with_track(mut self, policy: LearningPolicy) -> Self {
        self.tracks.insert(policy.track.clone(), policy);
        self
    }

    pub fn default_track(&self) -> &str {
        &self.default_track
    }

    pub fn tracks(&self) -> impl Iterator<Item = &LearningPolicy> {
        self.tracks.values()
    }

    /// Resolve a requested track name, falling back to the default track
    /// when it is absent or unknown.
    pub fn resolve(&self, requested: Option<&str>) -> LearningPolicy {
        requested
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .and_then(|name| self.tracks.get(name))
            .or_else(|| self.tracks.get(&self.default_track))
            .cloned()
            .unwrap_or_else(|| LearningPolicy::new(DEFAULT_TRACK, 3, 30))
    }
}

/// A learner's request for help, as seen by the gate.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct HelpRequest {
    /// Requested level (0-5); defaults per intent, required for escalation
    #[serde(default)]
    pub level: Option<u8>,
    /// Required for escalation: why the learner needs a near-complete answer
    #[serde(default)]
    pub justification: Option<String>,
    /// Run the intervention responds to
    #[serde(default)]
    pub run_id: Option<uuid::Uuid>,
    /// Provider override; the registry default is used otherwise
    #[serde(default)]
    pub provider: Option<String>,
    /// Free-text question from the learner
    #[serde(default)]
    pub question: Option<String>,
}

/// What the gate allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub level: u8,
    pub escalated: bool,
}

/// Seconds left on the session's cooldown, or `None` when it has elapsed.
pub fn cooldown_remaining(session: &Session, now: DateTime<Utc>) -> Option<u64> {
    let last = session.last_intervention_at?;
    let elapsed = now.signed_duration_since(last).num_seconds().max(0) as u64;
    let cooldown = session.policy.cooldown_seconds;
    (elapsed < cooldown).then(|| cooldown - elapsed)
}

/// Decide whether `intent` at the requested level may be served now.
pub fn evaluate(
    session: &Session,
    intent: InterventionIntent,
    req: &HelpRequest,
    now: DateTime<Utc>,
) -> Result<Decision, TutorError> {
    if !session.is_active() {
        return Err(TutorError::SessionNotActive {
            id: session.id,
            status: session.status,
        });
    }

    if let Some(retry_after_secs) = cooldown_remaining(session, now) {
        return Err(TutorError::CooldownActive { retry_after_secs });
    }

    if intent == InterventionIntent::Escalate {
        return check_escalation(session, req).map(|level| Decision {
            level,
            escalated: true,
        });
    }

    let level = req
        .level
        .or_else(|| intent.default_level())
        .unwrap_or(1);
    if level > MAX_LEVEL {
        return Err(TutorError::InvalidRequest {
            field: Some("level".to_string()),
            message: format!("level must be between 0 and {MAX_LEVEL}, got {level}"),
        });
    }
    if level > session.policy.max_level {
        return Err(TutorError::LevelExceedsPolicy {
            requested: level,
            max: session.policy.max_level,
            track: session.policy.track.clone(),
        });
    }
    Ok(Decision {
        level,
        escalated: false,
    })
}

fn check_escalation(session: &Session, req: &HelpRequest) -> Result<u8, TutorError> {
    let level = req.level.unwrap_or(0);
    if !matches!(level, 4 | 5) {
        return Err(TutorError::InvalidEscalationLevel(level));
    }

    let justification_len = req
        .justification
        .as_deref()
        .map(|j| j.trim().chars().count())
        .unwrap_or(0);
    if justification_len < MIN_JUSTIFICATION_LEN {
        return Err(TutorError::JustificationRequired {
            min_len: MIN_JUSTIFICATION_LEN,
        });
    }

    if session.hint_count < MIN_HINTS_FOR_ESCALATION {
        return Err(TutorError::InsufficientHints {
            have: session.hint_count,
            need: MIN_HINTS_FOR_ESCALATION,
        });
    }
    Ok(level)
}
