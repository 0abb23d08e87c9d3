//! Positive-reinforcement signals derived from session, profile and spec
//! deltas, plus the end-of-session summary.
//!
//! Messages are rate limited per user with a decaying threshold: right after
//! a message only a moment of [`AppreciationConfig::breakthrough_priority`]
//! or more is shown, and the bar falls linearly to zero over the window.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::content::{AcceptanceCriterion, Spec, SpecProgress};
use crate::model::{RunResult, Session};
use crate::profile::{LearningProfile, TopicProgress};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Moment {
    SpecComplete,
    TopicMastery,
    FirstTrySuccess,
    NoHintsNeeded,
    ReducedDependency,
    CriterionSatisfied,
    NoEscalation,
    MinimalHints,
    ConsistentSuccess,
    QuickResolution,
    AllTestsPassing,
    FirstInTopic,
}

impl Moment {
    pub const ALL: [Moment; 12] = [
        Moment::SpecComplete,
        Moment::TopicMastery,
        Moment::FirstTrySuccess,
        Moment::NoHintsNeeded,
        Moment::ReducedDependency,
        Moment::CriterionSatisfied,
        Moment::NoEscalation,
        Moment::MinimalHints,
        Moment::ConsistentSuccess,
        Moment::QuickResolution,
        Moment::AllTestsPassing,
        Moment::FirstInTopic,
    ];

    pub fn priority(&self) -> u8 {
        match self {
            Moment::SpecComplete => 10,
            Moment::TopicMastery => 9,
            Moment::FirstTrySuccess => 8,
            Moment::NoHintsNeeded => 7,
            Moment::ReducedDependency => 6,
            Moment::CriterionSatisfied => 5,
            Moment::NoEscalation => 4,
            Moment::MinimalHints | Moment::ConsistentSuccess => 3,
            Moment::QuickResolution => 2,
            Moment::AllTestsPassing | Moment::FirstInTopic => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Moment::SpecComplete => "spec_complete",
            Moment::TopicMastery => "topic_mastery",
            Moment::FirstTrySuccess => "first_try_success",
            Moment::NoHintsNeeded => "no_hints_needed",
            Moment::ReducedDependency => "reduced_dependency",
            Moment::CriterionSatisfied => "criterion_satisfied",
            Moment::NoEscalation => "no_escalation",
            Moment::MinimalHints => "minimal_hints",
            Moment::ConsistentSuccess => "consistent_success",
            Moment::QuickResolution => "quick_resolution",
            Moment::AllTestsPassing => "all_tests_passing",
            Moment::FirstInTopic => "first_in_topic",
        }
    }

    fn templates(&self) -> &'static [&'static str] {
        match self {
            Moment::SpecComplete => &[
                "Every acceptance criterion is satisfied. The spec is done!",
                "Spec complete: all criteria check out.",
            ],
            Moment::TopicMastery => &[
                "You've mastered {topic}.",
                "{topic} is solidly in your toolkit now.",
            ],
            Moment::FirstTrySuccess => &[
                "Tests passed on the very first run. Nicely done.",
                "First run, all green!",
            ],
            Moment::NoHintsNeeded => &[
                "You solved it without a single hint.",
                "All tests pass and no hints needed. That's independent work.",
            ],
            Moment::ReducedDependency => &[
                "You're leaning on hints a lot less than before.",
                "Your hint usage is trending down. You're getting more self-sufficient.",
            ],
            Moment::CriterionSatisfied => &[
                "Another acceptance criterion satisfied.",
                "One more criterion done. Keep going.",
            ],
            Moment::NoEscalation => &[
                "You got there with hints alone, no escalation needed.",
            ],
            Moment::MinimalHints => &[
                "Solved with just a couple of hints.",
                "Only a little help needed this time.",
            ],
            Moment::ConsistentSuccess => &[
                "That's {streak} sessions in a row with passing tests.",
                "{streak} successful sessions running. Great consistency.",
            ],
            Moment::QuickResolution => &["Quick work! That didn't take long."],
            Moment::AllTestsPassing => &["All tests pass.", "Green across the board."],
            Moment::FirstInTopic => &[
                "First steps in {topic}. Welcome!",
                "You've started on {topic}.",
            ],
        }
    }
}

impl fmt::Display for Moment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Moment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Moment::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown moment '{s}'"))
    }
}

/// Priority of a moment by name; unknown names rank 0.
pub fn priority_for(name: &str) -> u8 {
    name.parse::<Moment>().map(|m| m.priority()).unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Appreciation {
    pub moment: Moment,
    pub priority: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AppreciationConfig {
    pub window: Duration,
    /// Moments at or above this priority are never suppressed
    pub breakthrough_priority: u8,
    /// Minimum relative drop in hints per session
    pub reduced_dependency_ratio: f64,
    /// Sessions each profile snapshot needs before dependency is compared
    pub min_sessions_for_progress: u32,
    pub quick_resolution: Duration,
    pub consistent_streak: u32,
}

impl Default for AppreciationConfig {
    fn default() -> Self {
        Self {
            window: Duration::minutes(5),
            breakthrough_priority: 8,
            reduced_dependency_ratio: 0.2,
            min_sessions_for_progress: 3,
            quick_resolution: Duration::minutes(10),
            consistent_streak: 3,
        }
    }
}

/// Owns the per-user "last shown" clock. Create one per daemon and share it.
pub struct AppreciationGenerator {
    config: AppreciationConfig,
    last_shown: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for AppreciationGenerator {
    fn default() -> Self {
        Self::new(AppreciationConfig::default())
    }
}

impl AppreciationGenerator {
    pub fn new(config: AppreciationConfig) -> Self {
        Self {
            config,
            last_shown: Mutex::new(HashMap::new()),
        }
    }

    /// Priority a moment needs to be shown to `user_id` at `now`.
    fn required_priority(&self, last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(last) = last else {
            return 0.0;
        };
        let window = self.config.window.num_milliseconds().max(1) as f64;
        let elapsed = now.signed_duration_since(last).num_milliseconds().max(0) as f64;
        if elapsed >= window {
            return 0.0;
        }
        f64::from(self.config.breakthrough_priority) * (1.0 - elapsed / window)
    }

    /// Pick the best candidate and issue it if the rate limit allows.
    fn offer(
        &self,
        user_id: &str,
        candidates: &[Moment],
        vars: &[(&str, String)],
        now: DateTime<Utc>,
    ) -> Option<Appreciation> {
        let moment = candidates
            .iter()
            .copied()
            .fold(None::<Moment>, |best, m| match best {
                Some(b) if b.priority() >= m.priority() => Some(b),
                _ => Some(m),
            })?;

        let mut last_shown = self.last_shown.lock().unwrap_or_else(|e| e.into_inner());
        let required = self.required_priority(last_shown.get(user_id).copied(), now);
        if f64::from(moment.priority()) < required {
            tracing::debug!(user_id, moment = %moment, required, "appreciation suppressed");
            return None;
        }
        last_shown.insert(user_id.to_string(), now);
        drop(last_shown);

        let template = moment
            .templates()
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("Nice work.");
        let message = vars
            .iter()
            .fold(template.to_string(), |text, (key, value)| {
                text.replace(&format!("{{{key}}}"), value)
            });

        Some(Appreciation {
            moment,
            priority: moment.priority(),
            message,
            created_at: now,
        })
    }

    pub fn check_session(
        &self,
        user_id: &str,
        session: &Session,
        run: Option<&RunResult>,
    ) -> Option<Appreciation> {
        self.check_session_at(user_id, session, run, Utc::now())
    }

    /// Moments earned by a passing run (or, without a run, the session's last
    /// test outcome).
    pub fn check_session_at(
        &self,
        user_id: &str,
        session: &Session,
        run: Option<&RunResult>,
        now: DateTime<Utc>,
    ) -> Option<Appreciation> {
        let passed = match run {
            Some(run) => run.tests_passed(),
            None => session.last_tests_passed.unwrap_or(false),
        };
        if !passed {
            return None;
        }

        let mut candidates = vec![Moment::AllTestsPassing];
        if session.run_count == 1 {
            candidates.push(Moment::FirstTrySuccess);
        }
        match session.hint_count {
            0 => candidates.push(Moment::NoHintsNeeded),
            1..=2 => candidates.push(Moment::MinimalHints),
            _ => {}
        }
        if session.hint_count > 0 && session.escalation_count == 0 {
            candidates.push(Moment::NoEscalation);
        }
        if now.signed_duration_since(session.created_at) <= self.config.quick_resolution {
            candidates.push(Moment::QuickResolution);
        }
        self.offer(user_id, &candidates, &[], now)
    }

    pub fn check_progress(
        &self,
        user_id: &str,
        current: &LearningProfile,
        previous: &LearningProfile,
    ) -> Option<Appreciation> {
        self.check_progress_at(user_id, current, previous, Utc::now())
    }

    pub fn check_progress_at(
        &self,
        user_id: &str,
        current: &LearningProfile,
        previous: &LearningProfile,
        now: DateTime<Utc>,
    ) -> Option<Appreciation> {
        let mut candidates = Vec::new();

        let min = self.config.min_sessions_for_progress;
        if current.sessions_completed >= min && previous.sessions_completed >= min {
            let before = previous.hint_dependency();
            let after = current.hint_dependency();
            if before > 0.0 && (before - after) / before >= self.config.reduced_dependency_ratio {
                candidates.push(Moment::ReducedDependency);
            }
        }
        if current.consecutive_successes >= self.config.consistent_streak
            && current.consecutive_successes > previous.consecutive_successes
        {
            candidates.push(Moment::ConsistentSuccess);
        }

        let streak = current.consecutive_successes.to_string();
        self.offer(user_id, &candidates, &[("streak", streak)], now)
    }

    pub fn check_skill(
        &self,
        user_id: &str,
        skill: &TopicProgress,
        is_first: bool,
    ) -> Option<Appreciation> {
        self.check_skill_at(user_id, skill, is_first, Utc::now())
    }

    pub fn check_skill_at(
        &self,
        user_id: &str,
        skill: &TopicProgress,
        is_first: bool,
        now: DateTime<Utc>,
    ) -> Option<Appreciation> {
        let mut candidates = Vec::new();
        if skill.is_mastered() {
            candidates.push(Moment::TopicMastery);
        }
        if is_first {
            candidates.push(Moment::FirstInTopic);
        }
        self.offer(user_id, &candidates, &[("topic", skill.topic.clone())], now)
    }

    pub fn check_spec(
        &self,
        user_id: &str,
        spec: &Spec,
        criterion: Option<&AcceptanceCriterion>,
    ) -> Option<Appreciation> {
        self.check_spec_at(user_id, spec, criterion, Utc::now())
    }

    /// `criterion` is the one that just transitioned, if any.
    pub fn check_spec_at(
        &self,
        user_id: &str,
        spec: &Spec,
        criterion: Option<&AcceptanceCriterion>,
        now: DateTime<Utc>,
    ) -> Option<Appreciation> {
        let candidate = if spec.is_complete() {
            Moment::SpecComplete
        } else if criterion.is_some_and(|c| c.satisfied) {
            Moment::CriterionSatisfied
        } else {
            return None;
        };
        self.offer(user_id, &[candidate], &[], now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub accomplishment: String,
    pub message: String,
    pub duration_minutes: i64,
    pub hints_used: u32,
    pub runs: u32,
    pub escalations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_progress: Option<SpecProgress>,
}

const QUICK_PROGRESS_MINUTES: i64 = 15;
const PERSISTENT_MINUTES: i64 = 30;
const PERSISTENT_HINTS: u32 = 3;
const PERSISTENT_RUNS: u32 = 5;

/// End-of-session summary. `None` only when there is no session.
pub fn generate_session_summary(
    session: Option<&Session>,
    spec_progress: Option<&SpecProgress>,
) -> Option<SessionSummary> {
    let session = session?;
    let minutes = session.elapsed_secs(Utc::now()) / 60;
    let hints = session.hint_count;
    let runs = session.run_count;

    let (accomplishment, message) = if spec_progress.is_some_and(SpecProgress::is_complete) {
        ("Spec Complete", "Every acceptance criterion is satisfied.".to_string())
    } else if hints == 0 {
        ("Self-Reliant", "You worked through this without any hints.".to_string())
    } else if hints == 1 {
        ("Focused Learning", "One hint was all you needed.".to_string())
    } else if minutes < QUICK_PROGRESS_MINUTES {
        ("Quick Progress", format!("Wrapped up in {minutes} minutes."))
    } else if spec_progress.is_some() && runs == 0 {
        let progress = spec_progress.copied().unwrap_or(SpecProgress {
            satisfied: 0,
            total: 0,
        });
        (
            "Making Progress",
            format!(
                "{} of {} criteria satisfied so far.",
                progress.satisfied, progress.total
            ),
        )
    } else if hints >= PERSISTENT_HINTS && runs >= PERSISTENT_RUNS && minutes >= PERSISTENT_MINUTES
    {
        (
            "Persistent Effort",
            format!("{runs} runs over {minutes} minutes. You kept at it."),
        )
    } else {
        ("Session Complete", format!("{runs} runs, {hints} hints."))
    };

    Some(SessionSummary {
        session_id: session.id,
        accomplishment: accomplishment.to_string(),
        message,
        duration_minutes: minutes,
        hints_used: hints,
        runs,
        escalations: session.escalation_count,
        spec_progress: spec_progress.copied(),
    })
}
