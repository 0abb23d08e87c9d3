use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::policy::LearningPolicy;

/// Working snapshot of a session's files: filename → contents.
pub type Code = BTreeMap<String, String>;

/// Why a session exists. Exercise sessions are always `training`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionIntent {
    Training,
    FeatureGuidance,
    SpecAuthoring,
}

impl SessionIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionIntent::Training => "training",
            SessionIntent::FeatureGuidance => "feature_guidance",
            SessionIntent::SpecAuthoring => "spec_authoring",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A learner's pairing session. Only the session manager mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Session {
    pub id: Uuid,
    /// Learner the session belongs to (drives profile and appreciation state)
    pub user_id: String,
    /// `pack/slug` of the exercise, for practice sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercise_id: Option<String>,
    /// Spec document path, for feature-guidance and spec-authoring sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_path: Option<String>,
    pub intent: SessionIntent,
    pub status: SessionStatus,
    /// Topic of the exercise, when the pack declares one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub code: Code,
    /// Resolved at creation and frozen for the session's lifetime
    pub policy: LearningPolicy,
    pub run_count: u32,
    pub hint_count: u32,
    pub escalation_count: u32,
    /// Outcome of the most recent test step, if any run tested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tests_passed: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_intervention_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Only populated for `spec_authoring` sessions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authoring_docs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authoring_section: Option<String>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Seconds between creation and `now` (or the end of the session).
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        let end = self.ended_at.unwrap_or(now);
        end.signed_duration_since(self.created_at)
            .num_seconds()
            .max(0)
    }
}

/// Request to create a session. Exactly one origin must be given:
/// an `exercise_id`, or a `spec_path` together with a non-training `intent`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub exercise_id: Option<String>,
    #[serde(default)]
    pub spec_path: Option<String>,
    #[serde(default)]
    pub intent: Option<SessionIntent>,
    /// Learning track name; unknown or absent falls back to the default track
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub authoring_docs: Vec<String>,
    #[serde(default)]
    pub authoring_section: Option<String>,
}

/// Outcome of one format/build/test step.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct StepResult {
    pub ok: bool,
    /// Raw diagnostic output (diff for format, compiler output for build, test log for test)
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Independent sub-results of a run. A skipped step is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct RunResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test: Option<StepResult>,
}

impl RunResult {
    pub fn tests_passed(&self) -> bool {
        self.test.as_ref().is_some_and(|t| t.ok)
    }

    pub fn build_failed(&self) -> bool {
        self.build.as_ref().is_some_and(|b| !b.ok)
    }
}

/// One execution attempt. `code` is a copy taken at run time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Run {
    pub id: Uuid,
    pub session_id: Uuid,
    pub code: Code,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct RunRequest {
    pub code: Code,
    #[serde(default)]
    pub format: bool,
    #[serde(default = "default_true")]
    pub build: bool,
    #[serde(default)]
    pub test: bool,
    /// Extra arguments appended to the test command
    #[serde(default)]
    pub test_flags: Vec<String>,
}

/// What the learner asked the tutor for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InterventionIntent {
    Hint,
    Review,
    Stuck,
    Next,
    Explain,
    Escalate,
}

impl InterventionIntent {
    pub const ALL: [InterventionIntent; 6] = [
        InterventionIntent::Hint,
        InterventionIntent::Review,
        InterventionIntent::Stuck,
        InterventionIntent::Next,
        InterventionIntent::Explain,
        InterventionIntent::Escalate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionIntent::Hint => "hint",
            InterventionIntent::Review => "review",
            InterventionIntent::Stuck => "stuck",
            InterventionIntent::Next => "next",
            InterventionIntent::Explain => "explain",
            InterventionIntent::Escalate => "escalate",
        }
    }

    /// Help-seeking intents consume the hint budget. Review is
    /// learner-initiated code review and escalation is tracked separately.
    pub fn counts_toward_hints(&self) -> bool {
        matches!(
            self,
            InterventionIntent::Hint
                | InterventionIntent::Stuck
                | InterventionIntent::Next
                | InterventionIntent::Explain
        )
    }

    /// Level used when the request does not name one. Escalation must be explicit.
    pub fn default_level(&self) -> Option<u8> {
        match self {
            InterventionIntent::Explain | InterventionIntent::Hint => Some(1),
            InterventionIntent::Next | InterventionIntent::Review => Some(2),
            InterventionIntent::Stuck => Some(3),
            InterventionIntent::Escalate => None,
        }
    }
}

impl fmt::Display for InterventionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterventionIntent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InterventionIntent::ALL
            .into_iter()
            .find(|intent| intent.as_str() == s)
            .ok_or_else(|| format!("unknown intervention intent '{s}'"))
    }
}

pub const MAX_LEVEL: u8 = 5;

/// Freeform classification derived from intent and level.
pub fn intervention_type(intent: InterventionIntent, level: u8) -> &'static str {
    if intent == InterventionIntent::Review {
        return "code_review";
    }
    match level {
        0 | 1 => "nudge",
        2 => "guidance",
        3 => "walkthrough",
        4 => "partial_solution",
        _ => "solution",
    }
}

/// One recorded tutoring exchange. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Intervention {
    pub id: Uuid,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    pub intent: InterventionIntent,
    pub level: u8,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Pending,
    Applied,
    Rejected,
    Expired,
}

impl PatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchStatus::Pending => "pending",
            PatchStatus::Applied => "applied",
            PatchStatus::Rejected => "rejected",
            PatchStatus::Expired => "expired",
        }
    }
}

/// A staged whole-file replacement extracted from an intervention.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Patch {
    pub id: Uuid,
    pub session_id: Uuid,
    pub intervention_id: Uuid,
    pub target_file: String,
    pub proposed_content: String,
    pub status: PatchStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}
