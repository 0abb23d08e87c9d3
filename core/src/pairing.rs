//! Tutoring engine: gates a help request, asks the model, records the
//! intervention and stages any patch it contains.
//!
//! The session lock is held while the gate runs and again while the result
//! is recorded, never across the model call. Between the two, an in-flight
//! reservation keeps a second request for the same session from slipping
//! through the cooldown check.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::TutorError;
use crate::llm::{LlmError, ProviderRegistry};
use crate::model::{Intervention, InterventionIntent, Patch, Session, intervention_type};
use crate::patch::PatchPipeline;
use crate::policy::{self, Decision, HelpRequest};
use crate::prompt::{PromptContext, build_prompt};
use crate::session::SessionManager;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PairingOutcome {
    pub intervention: Intervention,
    /// Patch staged from the intervention, when one could be extracted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub enum PairingEvent {
    Token(String),
    Done(Box<PairingOutcome>),
}

pub type PairingStream = BoxStream<'static, Result<PairingEvent, TutorError>>;

/// Releases the session's in-flight slot when dropped.
struct InFlight {
    session_id: Uuid,
    slots: Arc<Mutex<HashSet<Uuid>>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.remove(&self.session_id);
    }
}

/// A request that passed the gate, with everything needed to finish it.
struct Admission {
    _slot: InFlight,
    session_id: Uuid,
    intent: InterventionIntent,
    decision: Decision,
    request: HelpRequest,
    context: PromptContext,
}

#[derive(Clone)]
pub struct TutorEngine {
    sessions: Arc<SessionManager>,
    patches: Arc<PatchPipeline>,
    llm: Arc<ProviderRegistry>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl TutorEngine {
    pub fn new(
        sessions: Arc<SessionManager>,
        patches: Arc<PatchPipeline>,
        llm: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            sessions,
            patches,
            llm,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn reserve(&self, session: &Session) -> Result<InFlight, TutorError> {
        let mut slots = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !slots.insert(session.id) {
            return Err(TutorError::CooldownActive {
                retry_after_secs: session.policy.cooldown_seconds.max(1),
            });
        }
        Ok(InFlight {
            session_id: session.id,
            slots: self.in_flight.clone(),
        })
    }

    async fn admit(
        &self,
        session_id: Uuid,
        intent: InterventionIntent,
        request: HelpRequest,
    ) -> Result<Admission, TutorError> {
        let (session, decision, slot, last_run) = {
            let lock = self.sessions.lock(session_id).await;
            let session = self.sessions.get_locked(&lock).await?;
            let decision = policy::evaluate(&session, intent, &request, Utc::now()).map_err(|e| {
                tracing::info!(session_id = %session_id, intent = %intent, reason = e.code(), "help request rejected");
                e
            })?;
            let last_run = match request.run_id {
                Some(run_id) => Some(self.sessions.get_run(session_id, run_id).await?),
                None => self.sessions.store().list_runs(session_id).await?.pop(),
            };
            let slot = self.reserve(&session)?;
            (session, decision, slot, last_run)
        };

        let exercise = self.sessions.exercise_for(&session).await;
        let spec = self.sessions.spec_for(&session).await;
        Ok(Admission {
            _slot: slot,
            session_id,
            intent,
            decision,
            context: PromptContext {
                session,
                exercise,
                spec,
                last_run,
                question: request.question.clone(),
            },
            request,
        })
    }

    fn prompt_for(admission: &Admission) -> crate::llm::GenerateRequest {
        build_prompt(
            &admission.context,
            admission.intent,
            admission.decision.level,
            admission
                .decision
                .escalated
                .then_some(admission.request.justification.as_deref())
                .flatten(),
        )
    }

    /// Record the finished intervention and stage its patch.
    async fn finish(
        &self,
        admission: Admission,
        content: String,
        provider: String,
    ) -> Result<PairingOutcome, TutorError> {
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }

        let lock = self.sessions.lock(admission.session_id).await;
        let current = self.sessions.get_locked(&lock).await?;
        if !current.is_active() {
            return Err(TutorError::SessionNotActive {
                id: current.id,
                status: current.status,
            });
        }

        let Decision { level, escalated } = admission.decision;
        let intervention = Intervention {
            id: Uuid::now_v7(),
            session_id: admission.session_id,
            run_id: admission.context.last_run.as_ref().map(|r| r.id),
            intent: admission.intent,
            level,
            kind: intervention_type(admission.intent, level).to_string(),
            content,
            provider: Some(provider),
            justification: if escalated {
                admission.request.justification.clone()
            } else {
                None
            },
            created_at: Utc::now(),
        };

        let session = self
            .sessions
            .record_intervention_locked(&lock, &intervention)
            .await?;
        let patch = self
            .patches
            .stage_from_intervention_locked(&lock, &intervention, &session.code)
            .await?;

        Ok(PairingOutcome {
            intervention,
            patch,
            session,
        })
    }

    /// Serve one help request end to end.
    pub async fn request(
        &self,
        session_id: Uuid,
        intent: InterventionIntent,
        request: HelpRequest,
    ) -> Result<PairingOutcome, TutorError> {
        let admission = self.admit(session_id, intent, request).await?;
        let prompt = Self::prompt_for(&admission);

        let (provider, response) = self
            .llm
            .generate(admission.request.provider.as_deref(), &prompt)
            .await
            .map_err(|e| {
                tracing::warn!(session_id = %session_id, intent = %intent, error = %e, "model call failed");
                TutorError::from(e)
            })?;

        self.finish(admission, response.content, provider).await
    }

    /// Streaming variant. Gate and upstream failures surface before the
    /// first event. Dropping the stream early records nothing: counters and
    /// the cooldown clock stay as they were.
    pub async fn stream(
        &self,
        session_id: Uuid,
        intent: InterventionIntent,
        request: HelpRequest,
    ) -> Result<PairingStream, TutorError> {
        let admission = self.admit(session_id, intent, request).await?;
        let prompt = Self::prompt_for(&admission);
        let (provider, mut chunks) = self
            .llm
            .generate_stream(admission.request.provider.as_deref(), &prompt)
            .await
            .map_err(|e| {
                tracing::warn!(session_id = %session_id, intent = %intent, error = %e, "model stream failed to open");
                TutorError::from(e)
            })?;

        let engine = self.clone();
        let events = async_stream::stream! {
            let mut content = String::new();
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => {
                        if !chunk.content.is_empty() {
                            content.push_str(&chunk.content);
                            yield Ok(PairingEvent::Token(chunk.content));
                        }
                        if chunk.done {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "model stream failed");
                        yield Err(TutorError::from(e));
                        return;
                    }
                }
            }
            match engine.finish(admission, content, provider).await {
                Ok(outcome) => yield Ok(PairingEvent::Done(Box::new(outcome))),
                Err(e) => yield Err(e),
            }
        };
        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::llm::tests::ScriptedProvider;
    use crate::model::PatchStatus;
    use crate::session::tests::{exercise_request, manager};

    struct Harness {
        engine: TutorEngine,
        sessions: Arc<SessionManager>,
        provider: Arc<ScriptedProvider>,
    }

    async fn harness(replies: Vec<Result<String, String>>) -> Harness {
        let sessions = Arc::new(manager().await);
        let patches = Arc::new(PatchPipeline::new(sessions.clone()));
        let provider = Arc::new(ScriptedProvider::new("scripted", replies));
        let registry = Arc::new(ProviderRegistry::new());
        registry.register("scripted", provider.clone());
        Harness {
            engine: TutorEngine::new(sessions.clone(), patches, registry),
            sessions,
            provider,
        }
    }

    fn ok(text: &str) -> Result<String, String> {
        Ok(text.to_string())
    }

    /// Move the cooldown clock back without going through business rules.
    async fn backdate(sessions: &SessionManager, id: Uuid, secs: i64) {
        let mut session = sessions.get(id).await.expect("session");
        if let Some(at) = session.last_intervention_at {
            session.last_intervention_at = Some(at - Duration::seconds(secs));
        }
        sessions.store().save_session(&session).await.expect("seed");
    }

    fn escalation(level: u8, justification: &str) -> HelpRequest {
        HelpRequest {
            level: Some(level),
            justification: Some(justification.into()),
            ..HelpRequest::default()
        }
    }

    #[tokio::test]
    async fn hint_on_fresh_session_records_intervention() {
        let h = harness(vec![ok("Check the loop bounds.")]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");

        let outcome = h
            .engine
            .request(session.id, InterventionIntent::Hint, HelpRequest::default())
            .await
            .expect("hint served");
        assert_eq!(outcome.session.hint_count, 1);
        assert_eq!(outcome.intervention.intent, InterventionIntent::Hint);
        assert_eq!(outcome.intervention.level, 1);
        assert_eq!(outcome.intervention.kind, "nudge");
        assert_eq!(outcome.intervention.provider.as_deref(), Some("scripted"));
        assert!(outcome.patch.is_none());
    }

    #[tokio::test]
    async fn second_hint_inside_cooldown_is_rejected() {
        let h = harness(vec![ok("first"), ok("second")]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");

        h.engine
            .request(session.id, InterventionIntent::Hint, HelpRequest::default())
            .await
            .expect("first hint");
        let err = h
            .engine
            .request(session.id, InterventionIntent::Hint, HelpRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::CooldownActive { retry_after_secs } if retry_after_secs > 0));
        assert_eq!(h.sessions.get(session.id).await.expect("session").hint_count, 1);
        assert_eq!(h.provider.prompts.lock().expect("prompts").len(), 1);
    }

    #[tokio::test]
    async fn failed_model_call_has_no_side_effects() {
        let h = harness(vec![Err("overloaded".into())]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");

        let err = h
            .engine
            .request(session.id, InterventionIntent::Hint, HelpRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::InterventionFailed(_)));
        let after = h.sessions.get(session.id).await.expect("session");
        assert_eq!(after.hint_count, 0);
        assert!(after.last_intervention_at.is_none());
        assert!(h.sessions.list_interventions(session.id).await.expect("history").is_empty());
    }

    #[tokio::test]
    async fn escalation_gates_then_bypasses_max_level() {
        let justification = "I have tried both hints already";
        let h = harness(vec![ok("a"), ok("b"), ok("full answer")]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");

        assert!(matches!(
            h.engine
                .request(session.id, InterventionIntent::Escalate, escalation(3, justification))
                .await,
            Err(TutorError::InvalidEscalationLevel(3))
        ));

        h.engine
            .request(session.id, InterventionIntent::Hint, HelpRequest::default())
            .await
            .expect("hint 1");
        backdate(&h.sessions, session.id, 60).await;
        assert!(matches!(
            h.engine
                .request(session.id, InterventionIntent::Escalate, escalation(4, justification))
                .await,
            Err(TutorError::InsufficientHints { have: 1, need: 2 })
        ));

        h.engine
            .request(session.id, InterventionIntent::Hint, HelpRequest::default())
            .await
            .expect("hint 2");
        backdate(&h.sessions, session.id, 60).await;
        let outcome = h
            .engine
            .request(session.id, InterventionIntent::Escalate, escalation(4, justification))
            .await
            .expect("escalation allowed");
        assert_eq!(outcome.intervention.level, 4);
        assert_eq!(outcome.intervention.justification.as_deref(), Some(justification));
        assert_eq!(outcome.session.escalation_count, 1);
        assert_eq!(outcome.session.hint_count, 2);
    }

    #[tokio::test]
    async fn level_above_track_maximum_needs_escalation() {
        let h = harness(vec![ok("unused")]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");
        let req = HelpRequest {
            level: Some(4),
            ..HelpRequest::default()
        };
        assert!(matches!(
            h.engine.request(session.id, InterventionIntent::Hint, req).await,
            Err(TutorError::LevelExceedsPolicy { requested: 4, max: 3, .. })
        ));
    }

    #[tokio::test]
    async fn file_tagged_answer_stages_a_patch() {
        let reply = "Replace main.go with:\n```go main.go\npackage main\n\nfunc main() {}\n```\n";
        let h = harness(vec![ok(reply)]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");

        let outcome = h
            .engine
            .request(session.id, InterventionIntent::Stuck, HelpRequest::default())
            .await
            .expect("served");
        let patch = outcome.patch.expect("patch staged");
        assert_eq!(patch.target_file, "main.go");
        assert_eq!(patch.status, PatchStatus::Pending);
        assert_eq!(patch.intervention_id, outcome.intervention.id);
    }

    #[tokio::test]
    async fn concurrent_requests_on_one_session_admit_only_one() {
        let h = harness(vec![ok("one"), ok("two")]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");

        let (a, b) = tokio::join!(
            h.engine.request(session.id, InterventionIntent::Hint, HelpRequest::default()),
            h.engine.request(session.id, InterventionIntent::Hint, HelpRequest::default()),
        );
        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        assert_eq!(h.sessions.get(session.id).await.expect("session").hint_count, 1);
    }

    #[tokio::test]
    async fn stream_yields_tokens_then_done() {
        let h = harness(vec![ok("look at the loop")]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");

        let events: Vec<_> = h
            .engine
            .stream(session.id, InterventionIntent::Hint, HelpRequest::default())
            .await
            .expect("stream opens")
            .collect()
            .await;

        let tokens: String = events
            .iter()
            .filter_map(|e| match e {
                Ok(PairingEvent::Token(t)) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, "look at the loop");
        match events.last() {
            Some(Ok(PairingEvent::Done(outcome))) => {
                assert_eq!(outcome.intervention.content, "look at the loop");
                assert_eq!(outcome.session.hint_count, 1);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_stream_records_nothing_and_frees_the_session() {
        let h = harness(vec![ok("a long answer"), ok("second try")]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");

        let mut stream = h
            .engine
            .stream(session.id, InterventionIntent::Hint, HelpRequest::default())
            .await
            .expect("stream opens");
        let first = stream.next().await.expect("one event").expect("token");
        assert!(matches!(first, PairingEvent::Token(_)));
        drop(stream);

        let after = h.sessions.get(session.id).await.expect("session");
        assert_eq!(after.hint_count, 0);
        assert!(after.last_intervention_at.is_none());

        h.engine
            .request(session.id, InterventionIntent::Hint, HelpRequest::default())
            .await
            .expect("session is not left reserved");
    }

    #[tokio::test]
    async fn finished_session_rejects_help() {
        let h = harness(vec![ok("unused")]).await;
        let session = h.sessions.create("learner", exercise_request()).await.expect("created");
        h.sessions.abandon(session.id).await.expect("abandoned");
        assert!(matches!(
            h.engine
                .request(session.id, InterventionIntent::Hint, HelpRequest::default())
                .await,
            Err(TutorError::SessionNotActive { .. })
        ));
        assert!(matches!(
            h.engine
                .request(Uuid::now_v7(), InterventionIntent::Hint, HelpRequest::default())
                .await,
            Err(TutorError::SessionNotFound(_))
        ));
    }
}
