use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::Session;

pub const MASTERY_COMPLETION: f64 = 0.8;
pub const MASTERY_LEVEL: u8 = 3;

/// Per-topic progress inside a learning profile.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct TopicProgress {
    pub topic: String,
    pub sessions: u32,
    /// Sessions in this topic that ended with passing tests
    pub completed: u32,
    /// 0-5, grows with completed sessions
    pub level: u8,
    /// completed / sessions
    pub completion: f64,
}

impl TopicProgress {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sessions: 0,
            completed: 0,
            level: 0,
            completion: 0.0,
        }
    }

    pub fn is_mastered(&self) -> bool {
        self.completion >= MASTERY_COMPLETION && self.level >= MASTERY_LEVEL
    }
}

/// Aggregate learning history for one user.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct LearningProfile {
    pub user_id: String,
    pub sessions_completed: u32,
    pub total_hints: u32,
    pub total_runs: u32,
    pub total_escalations: u32,
    /// Completed sessions in a row whose last test step passed
    pub consecutive_successes: u32,
    #[serde(default)]
    pub topics: BTreeMap<String, TopicProgress>,
    pub updated_at: DateTime<Utc>,
}

impl LearningProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            sessions_completed: 0,
            total_hints: 0,
            total_runs: 0,
            total_escalations: 0,
            consecutive_successes: 0,
            topics: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Average hints per completed session.
    pub fn hint_dependency(&self) -> f64 {
        if self.sessions_completed == 0 {
            return 0.0;
        }
        f64::from(self.total_hints) / f64::from(self.sessions_completed)
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Fold a finished session into the profile. Returns the session's topic
    /// progress after the update, when the session has a topic.
    pub fn fold_session(&mut self, session: &Session) -> Option<TopicProgress> {
        let passed = session.last_tests_passed.unwrap_or(false);
        self.sessions_completed += 1;
        self.total_hints += session.hint_count;
        self.total_runs += session.run_count;
        self.total_escalations += session.escalation_count;
        self.consecutive_successes = if passed {
            self.consecutive_successes + 1
        } else {
            0
        };
        self.updated_at = Utc::now();

        let topic = session.topic.as_deref()?;
        let progress = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicProgress::new(topic));
        progress.sessions += 1;
        if passed {
            progress.completed += 1;
        }
        progress.level = progress.completed.min(5) as u8;
        progress.completion = f64::from(progress.completed) / f64::from(progress.sessions);
        Some(progress.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::LearningPolicy;
    use crate::policy::tests::session_with;

    fn finished(hints: u32, passed: bool, topic: Option<&str>) -> Session {
        let mut session = session_with(LearningPolicy::new("practice", 3, 30));
        session.hint_count = hints;
        session.run_count = 2;
        session.last_tests_passed = Some(passed);
        session.topic = topic.map(str::to_string);
        session
    }

    #[test]
    fn folding_tracks_totals_and_streaks() {
        let mut profile = LearningProfile::new("learner");
        profile.fold_session(&finished(2, true, None));
        profile.fold_session(&finished(0, true, None));
        assert_eq!(profile.sessions_completed, 2);
        assert_eq!(profile.total_hints, 2);
        assert_eq!(profile.total_runs, 4);
        assert_eq!(profile.consecutive_successes, 2);
        assert!((profile.hint_dependency() - 1.0).abs() < f64::EPSILON);

        profile.fold_session(&finished(1, false, None));
        assert_eq!(profile.consecutive_successes, 0);
    }

    #[test]
    fn topic_reaches_mastery_after_three_passes() {
        let mut profile = LearningProfile::new("learner");
        let mut last = None;
        for _ in 0..3 {
            last = profile.fold_session(&finished(0, true, Some("loops")));
        }
        let progress = last.expect("topic progress is returned");
        assert_eq!(progress.level, 3);
        assert!(progress.is_mastered());
    }

    #[test]
    fn empty_profile_has_zero_dependency() {
        assert_eq!(LearningProfile::new("x").hint_dependency(), 0.0);
    }
}
