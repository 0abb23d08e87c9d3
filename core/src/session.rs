//! Session lifecycle: the single writer of session state.
//!
//! Every read-modify-write on a session happens under that session's lock.
//! Helpers suffixed `_locked` take a [`SessionLock`] as proof the caller
//! holds it, so the policy engine and patch pipeline can compose several
//! steps into one critical section.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::appreciation::{SessionSummary, generate_session_summary};
use crate::content::{
    AcceptanceCriterion, ContentError, Exercise, ExerciseLoader, Spec, SpecProgress, SpecStore,
    split_exercise_id,
};
use crate::error::TutorError;
use crate::executor::{Executor, validate_file_name};
use crate::model::{
    Code, CreateSessionRequest, Intervention, InterventionIntent, Run, RunRequest, RunResult,
    Session, SessionIntent, SessionStatus, StepResult,
};
use crate::policy::PolicyTable;
use crate::profile::{LearningProfile, TopicProgress};
use crate::sandbox::{SandboxError, SandboxManager};
use crate::store::Store;

/// Held while a session is being mutated.
pub struct SessionLock {
    id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLock {
    pub fn session_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunOutcome {
    pub session: Session,
    pub run: Run,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CompletedSession {
    pub session: Session,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
    pub profile: LearningProfile,
    #[serde(skip)]
    pub previous_profile: LearningProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_progress: Option<TopicProgress>,
    /// True when this was the learner's first session in the topic
    pub first_in_topic: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CriterionUpdate {
    pub criterion: AcceptanceCriterion,
    /// False when the criterion was already satisfied
    pub changed: bool,
    pub progress: SpecProgress,
    #[serde(skip)]
    pub spec: Spec,
}

pub struct SessionManager {
    store: Arc<dyn Store>,
    executor: Arc<dyn Executor>,
    exercises: Arc<dyn ExerciseLoader>,
    specs: Arc<dyn SpecStore>,
    policies: PolicyTable,
    sandboxes: Option<Arc<SandboxManager>>,
    locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<dyn Executor>,
        exercises: Arc<dyn ExerciseLoader>,
        specs: Arc<dyn SpecStore>,
        policies: PolicyTable,
    ) -> Self {
        Self {
            store,
            executor,
            exercises,
            specs,
            policies,
            sandboxes: None,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn with_sandboxes(mut self, sandboxes: Arc<SandboxManager>) -> Self {
        self.sandboxes = Some(sandboxes);
        self
    }

    /// Raw persistence, bypassing every business rule. For seeding state in
    /// tests and administrative tooling only.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn sandboxes(&self) -> Option<&Arc<SandboxManager>> {
        self.sandboxes.as_ref()
    }

    pub async fn lock(&self, id: Uuid) -> SessionLock {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id).or_default().clone()
        };
        SessionLock {
            id,
            _guard: mutex.lock_owned().await,
        }
    }

    fn forget_lock(&self, id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(&id);
    }

    pub async fn create(
        &self,
        user_id: &str,
        req: CreateSessionRequest,
    ) -> Result<Session, TutorError> {
        let exercise_id = non_empty(req.exercise_id.as_deref());
        let spec_path = non_empty(req.spec_path.as_deref());

        let (intent, code, topic, spec_path) = match (exercise_id, spec_path) {
            (Some(_), Some(_)) => {
                return Err(TutorError::InvalidRequest {
                    field: None,
                    message: "provide either exercise_id or spec_path, not both".into(),
                });
            }
            (None, None) => {
                return Err(TutorError::InvalidRequest {
                    field: None,
                    message: "one of exercise_id or spec_path is required".into(),
                });
            }
            (Some(exercise_id), None) => {
                if matches!(req.intent, Some(intent) if intent != SessionIntent::Training) {
                    return Err(TutorError::invalid(
                        "intent",
                        "exercise sessions always use the training intent",
                    ));
                }
                let exercise = self.load_exercise(exercise_id).await?;
                (
                    SessionIntent::Training,
                    exercise.starter,
                    exercise.topic,
                    None,
                )
            }
            (None, Some(spec_path)) => {
                let intent = match req.intent {
                    Some(intent @ (SessionIntent::FeatureGuidance | SessionIntent::SpecAuthoring)) => {
                        intent
                    }
                    _ => {
                        return Err(TutorError::invalid(
                            "intent",
                            "spec sessions need intent feature_guidance or spec_authoring",
                        ));
                    }
                };
                let spec = self.load_spec(spec_path).await?;
                (intent, Code::new(), None, Some(spec.path))
            }
        };

        let requested_track = non_empty(req.track.as_deref()).or(
            (intent == SessionIntent::SpecAuthoring).then_some("spec_authoring"),
        );
        let policy = self.policies.resolve(requested_track);

        let (authoring_docs, authoring_section) = if intent == SessionIntent::SpecAuthoring {
            let mut docs: Vec<String> = spec_path.iter().cloned().collect();
            for doc in req.authoring_docs {
                let doc = doc.trim().to_string();
                if !doc.is_empty() && !docs.contains(&doc) {
                    docs.push(doc);
                }
            }
            (docs, non_empty(req.authoring_section.as_deref()).map(str::to_string))
        } else {
            (Vec::new(), None)
        };

        let now = Utc::now();
        let session = Session {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            exercise_id: exercise_id.map(str::to_string),
            spec_path,
            intent,
            status: SessionStatus::Active,
            topic,
            code,
            policy,
            run_count: 0,
            hint_count: 0,
            escalation_count: 0,
            last_tests_passed: None,
            created_at: now,
            updated_at: now,
            last_run_at: None,
            last_intervention_at: None,
            ended_at: None,
            authoring_docs,
            authoring_section,
        };
        self.store.save_session(&session).await?;

        tracing::info!(
            session_id = %session.id,
            user_id = %session.user_id,
            intent = session.intent.as_str(),
            track = %session.policy.track,
            "session created"
        );
        Ok(session)
    }

    async fn load_exercise(&self, exercise_id: &str) -> Result<Exercise, TutorError> {
        let (pack, slug) = split_exercise_id(exercise_id).ok_or_else(|| {
            TutorError::invalid("exercise_id", "exercise_id must look like 'pack/slug'")
        })?;
        match self.exercises.load_exercise(pack, slug).await {
            Ok(exercise) => Ok(exercise),
            Err(ContentError::NotFound(_)) => {
                Err(TutorError::ExerciseNotFound(exercise_id.to_string()))
            }
            Err(ContentError::InvalidPath(_)) => Err(TutorError::invalid(
                "exercise_id",
                format!("invalid exercise id '{exercise_id}'"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_spec(&self, spec_path: &str) -> Result<Spec, TutorError> {
        match self.specs.load_spec(spec_path).await {
            Ok(spec) => Ok(spec),
            Err(ContentError::NotFound(_)) => Err(TutorError::SpecNotFound(spec_path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Exercise behind a training session. `None` for spec sessions or when
    /// the pack has since been removed.
    pub async fn exercise_for(&self, session: &Session) -> Option<Exercise> {
        let id = session.exercise_id.as_deref()?;
        match self.load_exercise(id).await {
            Ok(exercise) => Some(exercise),
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "exercise unavailable");
                None
            }
        }
    }

    pub async fn spec_for(&self, session: &Session) -> Option<Spec> {
        let path = session.spec_path.as_deref()?;
        match self.load_spec(path).await {
            Ok(spec) => Some(spec),
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "spec unavailable");
                None
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Session, TutorError> {
        self.store
            .load_session(id)
            .await?
            .ok_or(TutorError::SessionNotFound(id))
    }

    pub async fn get_locked(&self, lock: &SessionLock) -> Result<Session, TutorError> {
        self.get(lock.id).await
    }

    pub async fn save_locked(&self, lock: &SessionLock, session: &Session) -> Result<(), TutorError> {
        if session.id != lock.id {
            return Err(TutorError::Internal(format!(
                "lock for {} used to save session {}",
                lock.id, session.id
            )));
        }
        self.store.save_session(session).await?;
        Ok(())
    }

    /// All sessions, newest first.
    pub async fn list(&self) -> Result<Vec<Session>, TutorError> {
        Ok(self.store.list_sessions().await?)
    }

    /// Hard delete. Unknown and already-deleted ids both fail with
    /// `SessionNotFound`.
    pub async fn delete(&self, id: Uuid) -> Result<(), TutorError> {
        let lock = self.lock(id).await;
        if !self.store.delete_session(id).await? {
            drop(lock);
            self.forget_lock(id);
            return Err(TutorError::SessionNotFound(id));
        }

        if let Some(sandboxes) = &self.sandboxes {
            match sandboxes.destroy(id).await {
                Ok(_) | Err(SandboxError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "sandbox teardown failed on delete");
                }
            }
        }
        drop(lock);
        self.forget_lock(id);
        tracing::info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Execute the requested steps against `req.code` and make that code the
    /// session's working snapshot. A failing build skips the test step. When
    /// the backend itself errors nothing about the session changes.
    pub async fn run_code(&self, id: Uuid, req: RunRequest) -> Result<RunOutcome, TutorError> {
        let lock = self.lock(id).await;
        let mut session = self.get_locked(&lock).await?;
        if !session.is_active() {
            return Err(TutorError::SessionNotActive {
                id,
                status: session.status,
            });
        }

        validate_code(&req.code)?;

        let sandbox_held = match &self.sandboxes {
            Some(sandboxes) if sandboxes.get(id).await.is_some() => {
                sandboxes.mark_busy(id).await.is_ok()
            }
            _ => false,
        };
        let executed = self.execute(&req).await;
        if sandbox_held {
            if let Some(sandboxes) = &self.sandboxes {
                if let Err(e) = sandboxes.mark_ready(id).await {
                    tracing::warn!(session_id = %id, error = %e, "sandbox release failed");
                }
            }
        }
        let result = executed.map_err(|e| {
            tracing::warn!(session_id = %id, error = %e, "execution backend failed");
            e
        })?;

        let now = Utc::now();
        let run = Run {
            id: Uuid::now_v7(),
            session_id: id,
            code: req.code.clone(),
            result: Some(result.clone()),
            created_at: now,
        };
        self.store.save_run(&run).await?;

        session.code = req.code;
        session.run_count += 1;
        session.last_run_at = Some(now);
        session.updated_at = now;
        if let Some(test) = &result.test {
            session.last_tests_passed = Some(test.ok);
        }
        self.save_locked(&lock, &session).await?;

        tracing::info!(
            session_id = %id,
            run_id = %run.id,
            run_count = session.run_count,
            build_ok = ?result.build.as_ref().map(|b| b.ok),
            tests_ok = ?result.test.as_ref().map(|t| t.ok),
            "run recorded"
        );
        Ok(RunOutcome { session, run })
    }

    async fn execute(&self, req: &RunRequest) -> Result<RunResult, TutorError> {
        let mut result = RunResult::default();

        if req.format {
            let format = self.executor.run_format(&req.code).await?;
            result.format = Some(StepResult {
                ok: format.ok,
                output: format.diff,
                duration_ms: None,
            });
        }

        if req.build {
            let build = self.executor.run_build(&req.code).await?;
            result.build = Some(StepResult {
                ok: build.ok,
                output: build.output,
                duration_ms: None,
            });
        }

        if req.test && !result.build_failed() {
            let test = self.executor.run_tests(&req.code, &req.test_flags).await?;
            result.test = Some(StepResult {
                ok: test.ok,
                output: test.output,
                duration_ms: Some(test.duration_ms),
            });
        }
        Ok(result)
    }

    /// Replace the working snapshot directly.
    pub async fn update_code(&self, id: Uuid, code: Code) -> Result<Session, TutorError> {
        let lock = self.lock(id).await;
        self.update_code_locked(&lock, code).await
    }

    pub async fn update_code_locked(
        &self,
        lock: &SessionLock,
        code: Code,
    ) -> Result<Session, TutorError> {
        validate_code(&code)?;
        let mut session = self.get_locked(lock).await?;
        session.code = code;
        session.updated_at = Utc::now();
        self.save_locked(lock, &session).await?;
        Ok(session)
    }

    pub async fn record_intervention(&self, intervention: &Intervention) -> Result<Session, TutorError> {
        let lock = self.lock(intervention.session_id).await;
        self.record_intervention_locked(&lock, intervention).await
    }

    /// Append to history and advance the session's counters and cooldown clock.
    pub async fn record_intervention_locked(
        &self,
        lock: &SessionLock,
        intervention: &Intervention,
    ) -> Result<Session, TutorError> {
        if intervention.session_id != lock.id {
            return Err(TutorError::Internal(format!(
                "intervention for {} recorded under lock for {}",
                intervention.session_id, lock.id
            )));
        }
        let mut session = self.get_locked(lock).await?;
        self.store.save_intervention(intervention).await?;

        if intervention.intent.counts_toward_hints() {
            session.hint_count += 1;
        }
        if intervention.intent == InterventionIntent::Escalate {
            session.escalation_count += 1;
        }
        session.last_intervention_at = Some(intervention.created_at);
        session.updated_at = Utc::now();
        self.save_locked(lock, &session).await?;

        tracing::info!(
            session_id = %session.id,
            intervention_id = %intervention.id,
            intent = %intervention.intent,
            level = intervention.level,
            hint_count = session.hint_count,
            "intervention recorded"
        );
        Ok(session)
    }

    async fn end(&self, id: Uuid, status: SessionStatus) -> Result<Session, TutorError> {
        let lock = self.lock(id).await;
        let mut session = self.get_locked(&lock).await?;
        if !session.is_active() {
            return Err(TutorError::SessionNotActive {
                id,
                status: session.status,
            });
        }
        let now = Utc::now();
        session.status = status;
        session.ended_at = Some(now);
        session.updated_at = now;
        self.save_locked(&lock, &session).await?;
        tracing::info!(session_id = %id, status = %status, "session ended");
        Ok(session)
    }

    /// Finish an active session and fold it into the learner's profile.
    pub async fn complete(&self, id: Uuid) -> Result<CompletedSession, TutorError> {
        let session = self.end(id, SessionStatus::Completed).await?;

        let previous_profile = self.profile(&session.user_id).await?;
        let mut profile = previous_profile.clone();
        let topic_progress = profile.fold_session(&session);
        self.store.save_profile(&profile).await?;

        let first_in_topic = session
            .topic
            .as_deref()
            .is_some_and(|topic| !previous_profile.has_topic(topic));
        let spec_progress = self.spec_for(&session).await.map(|spec| spec.progress());
        let summary = generate_session_summary(Some(&session), spec_progress.as_ref());

        Ok(CompletedSession {
            session,
            summary,
            profile,
            previous_profile,
            topic_progress,
            first_in_topic,
        })
    }

    pub async fn abandon(&self, id: Uuid) -> Result<Session, TutorError> {
        self.end(id, SessionStatus::Abandoned).await
    }

    pub async fn list_runs(&self, id: Uuid) -> Result<Vec<Run>, TutorError> {
        self.get(id).await?;
        Ok(self.store.list_runs(id).await?)
    }

    pub async fn get_run(&self, id: Uuid, run_id: Uuid) -> Result<Run, TutorError> {
        self.store
            .load_run(id, run_id)
            .await?
            .ok_or(TutorError::RunNotFound(run_id))
    }

    pub async fn list_interventions(&self, id: Uuid) -> Result<Vec<Intervention>, TutorError> {
        self.get(id).await?;
        Ok(self.store.list_interventions(id).await?)
    }

    /// Formatter output for `code` (or the current snapshot). The session
    /// itself is left untouched.
    pub async fn format_fix(&self, id: Uuid, code: Option<Code>) -> Result<Code, TutorError> {
        let session = self.get(id).await?;
        let code = code.unwrap_or(session.code);
        validate_code(&code)?;
        Ok(self.executor.run_format_fix(&code).await?)
    }

    /// Mark an acceptance criterion of the session's spec as satisfied.
    pub async fn satisfy_criterion(
        &self,
        id: Uuid,
        criterion_id: &str,
    ) -> Result<CriterionUpdate, TutorError> {
        let lock = self.lock(id).await;
        let session = self.get_locked(&lock).await?;
        if !session.is_active() {
            return Err(TutorError::SessionNotActive {
                id,
                status: session.status,
            });
        }
        let path = session
            .spec_path
            .as_deref()
            .ok_or_else(|| TutorError::invalid("spec_path", "session is not bound to a spec"))?;

        let mut spec = self.load_spec(path).await?;
        let changed = spec.satisfy(criterion_id).ok_or_else(|| {
            TutorError::invalid(
                "criterion_id",
                format!("spec has no acceptance criterion '{criterion_id}'"),
            )
        })?;
        if changed {
            self.specs.save_spec(&spec).await?;
        }

        let criterion = spec
            .criterion(criterion_id)
            .cloned()
            .ok_or_else(|| TutorError::Internal("criterion vanished after update".into()))?;
        Ok(CriterionUpdate {
            criterion,
            changed,
            progress: spec.progress(),
            spec,
        })
    }

    pub async fn profile(&self, user_id: &str) -> Result<LearningProfile, TutorError> {
        Ok(self
            .store
            .load_profile(user_id)
            .await?
            .unwrap_or_else(|| LearningProfile::new(user_id)))
    }
}

/// Snapshot file names must be relative paths that stay inside the
/// workspace.
fn validate_code(code: &Code) -> Result<(), TutorError> {
    for name in code.keys() {
        validate_file_name(name)?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::content::{MemorySpecStore, StaticExercises};
    use crate::executor::{BuildOutcome, ExecError, FormatOutcome, TestOutcome};
    use crate::store::MemoryStore;

    /// Executor whose outcomes are fixed up front and which counts calls.
    pub(crate) struct ScriptedExecutor {
        pub(crate) build_ok: bool,
        pub(crate) tests_ok: bool,
        pub(crate) broken: bool,
        pub(crate) test_calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        pub(crate) fn passing() -> Self {
            Self {
                build_ok: true,
                tests_ok: true,
                broken: false,
                test_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        async fn run_format(&self, code: &Code) -> Result<FormatOutcome, ExecError> {
            if self.broken {
                return Err(ExecError::NotConfigured("format"));
            }
            let unformatted = code.values().any(|c| c.contains("  "));
            Ok(FormatOutcome {
                ok: !unformatted,
                diff: if unformatted { "-  x\n+ x".into() } else { String::new() },
            })
        }

        async fn run_format_fix(&self, code: &Code) -> Result<Code, ExecError> {
            Ok(code
                .iter()
                .map(|(name, content)| (name.clone(), content.replace("  ", " ")))
                .collect())
        }

        async fn run_build(&self, _code: &Code) -> Result<BuildOutcome, ExecError> {
            if self.broken {
                return Err(ExecError::Spawn {
                    command: "go build".into(),
                    reason: "not installed".into(),
                });
            }
            Ok(BuildOutcome {
                ok: self.build_ok,
                output: if self.build_ok { String::new() } else { "undefined: x".into() },
            })
        }

        async fn run_tests(&self, _code: &Code, _flags: &[String]) -> Result<TestOutcome, ExecError> {
            self.test_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TestOutcome {
                ok: self.tests_ok,
                output: "ok".into(),
                duration_ms: 12,
            })
        }
    }

    pub(crate) const EXERCISE_ID: &str = "pack/basics/hello";
    pub(crate) const SPEC_PATH: &str = "features/search.json";

    pub(crate) fn hello_exercise() -> Exercise {
        Exercise {
            id: EXERCISE_ID.into(),
            pack: "pack".into(),
            slug: "basics/hello".into(),
            title: "Hello".into(),
            description: "Print a greeting".into(),
            topic: Some("basics".into()),
            difficulty: None,
            starter: Code::from([("main.go".to_string(), "package main\n".to_string())]),
        }
    }

    pub(crate) fn search_spec() -> Spec {
        Spec {
            path: SPEC_PATH.into(),
            title: "Search".into(),
            body: "Users can search notes".into(),
            acceptance_criteria: vec![
                AcceptanceCriterion {
                    id: "ac-1".into(),
                    text: "empty query returns nothing".into(),
                    satisfied: false,
                },
                AcceptanceCriterion {
                    id: "ac-2".into(),
                    text: "results are ranked".into(),
                    satisfied: false,
                },
            ],
        }
    }

    pub(crate) async fn manager_with(executor: ScriptedExecutor) -> (SessionManager, Arc<ScriptedExecutor>) {
        let executor = Arc::new(executor);
        let specs = MemorySpecStore::new();
        specs.insert(search_spec()).await;
        let manager = SessionManager::new(
            Arc::new(MemoryStore::new()),
            executor.clone(),
            Arc::new(StaticExercises::new().with(hello_exercise())),
            Arc::new(specs),
            PolicyTable::default(),
        );
        (manager, executor)
    }

    pub(crate) async fn manager() -> SessionManager {
        manager_with(ScriptedExecutor::passing()).await.0
    }

    pub(crate) fn exercise_request() -> CreateSessionRequest {
        CreateSessionRequest {
            exercise_id: Some(EXERCISE_ID.into()),
            ..CreateSessionRequest::default()
        }
    }

    fn run_request(code: &str) -> RunRequest {
        RunRequest {
            code: Code::from([("main.go".to_string(), code.to_string())]),
            format: false,
            build: true,
            test: true,
            test_flags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_requires_exactly_one_origin() {
        let manager = manager().await;
        let both = CreateSessionRequest {
            exercise_id: Some(EXERCISE_ID.into()),
            spec_path: Some(SPEC_PATH.into()),
            intent: Some(SessionIntent::FeatureGuidance),
            ..CreateSessionRequest::default()
        };
        assert!(matches!(
            manager.create("learner", both).await,
            Err(TutorError::InvalidRequest { .. })
        ));
        assert!(matches!(
            manager.create("learner", CreateSessionRequest::default()).await,
            Err(TutorError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn exercise_session_loads_starter_and_default_track() {
        let manager = manager().await;
        let session = manager
            .create("learner", exercise_request())
            .await
            .expect("session is created");
        assert_eq!(session.intent, SessionIntent::Training);
        assert_eq!(session.policy.track, "practice");
        assert_eq!(session.topic.as_deref(), Some("basics"));
        assert!(session.code.contains_key("main.go"));
        assert_eq!(manager.get(session.id).await.expect("persisted"), session);
    }

    #[tokio::test]
    async fn missing_exercise_and_spec_are_not_found() {
        let manager = manager().await;
        let missing_exercise = CreateSessionRequest {
            exercise_id: Some("pack/nope".into()),
            ..CreateSessionRequest::default()
        };
        assert!(matches!(
            manager.create("learner", missing_exercise).await,
            Err(TutorError::ExerciseNotFound(_))
        ));

        let missing_spec = CreateSessionRequest {
            spec_path: Some("features/none.json".into()),
            intent: Some(SessionIntent::FeatureGuidance),
            ..CreateSessionRequest::default()
        };
        assert!(matches!(
            manager.create("learner", missing_spec).await,
            Err(TutorError::SpecNotFound(_))
        ));
    }

    #[tokio::test]
    async fn spec_session_requires_non_training_intent() {
        let manager = manager().await;
        let req = CreateSessionRequest {
            spec_path: Some(SPEC_PATH.into()),
            intent: Some(SessionIntent::Training),
            ..CreateSessionRequest::default()
        };
        let err = manager.create("learner", req).await.unwrap_err();
        assert!(matches!(err, TutorError::InvalidRequest { field: Some(ref f), .. } if f == "intent"));
    }

    #[tokio::test]
    async fn authoring_session_tracks_docs_and_track() {
        let manager = manager().await;
        let req = CreateSessionRequest {
            spec_path: Some(SPEC_PATH.into()),
            intent: Some(SessionIntent::SpecAuthoring),
            authoring_docs: vec!["docs/notes.md".into(), SPEC_PATH.into()],
            authoring_section: Some("acceptance".into()),
            ..CreateSessionRequest::default()
        };
        let session = manager.create("learner", req).await.expect("created");
        assert_eq!(session.policy.track, "spec_authoring");
        assert_eq!(session.authoring_docs, vec![SPEC_PATH, "docs/notes.md"]);
        assert_eq!(session.authoring_section.as_deref(), Some("acceptance"));
    }

    #[tokio::test]
    async fn run_updates_snapshot_and_counters() {
        let manager = manager().await;
        let session = manager.create("learner", exercise_request()).await.expect("created");

        let code = "package main\nfunc main(){}";
        let mut req = run_request(code);
        req.format = true;
        req.test = false;
        let outcome = manager.run_code(session.id, req).await.expect("run succeeds");

        assert_eq!(outcome.session.run_count, 1);
        assert_eq!(outcome.session.code["main.go"], code);
        assert!(outcome.session.last_run_at.is_some());
        let result = outcome.run.result.expect("result is set");
        assert!(result.format.is_some());
        assert!(result.test.is_none());
    }

    #[tokio::test]
    async fn failing_build_skips_tests() {
        let (manager, executor) = manager_with(ScriptedExecutor {
            build_ok: false,
            ..ScriptedExecutor::passing()
        })
        .await;
        let session = manager.create("learner", exercise_request()).await.expect("created");

        let outcome = manager
            .run_code(session.id, run_request("broken"))
            .await
            .expect("run is recorded");
        let result = outcome.run.result.expect("result");
        assert!(result.build_failed());
        assert!(result.test.is_none());
        assert_eq!(executor.test_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.session.last_tests_passed, None);
    }

    #[tokio::test]
    async fn backend_error_leaves_session_untouched() {
        let (manager, _) = manager_with(ScriptedExecutor {
            broken: true,
            ..ScriptedExecutor::passing()
        })
        .await;
        let session = manager.create("learner", exercise_request()).await.expect("created");

        let err = manager
            .run_code(session.id, run_request("package main"))
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::ExecutionFailed(_)));
        let after = manager.get(session.id).await.expect("still there");
        assert_eq!(after.run_count, 0);
        assert_eq!(after.code, session.code);
        assert!(manager.list_runs(session.id).await.expect("runs").is_empty());
    }

    #[tokio::test]
    async fn escaping_file_names_are_rejected_before_any_step() {
        let manager = manager().await;
        let session = manager.create("learner", exercise_request()).await.expect("created");

        let req = RunRequest {
            code: Code::from([("../evil.go".to_string(), "x".to_string())]),
            format: false,
            build: false,
            test: false,
            test_flags: Vec::new(),
        };
        let err = manager.run_code(session.id, req).await.unwrap_err();
        assert!(matches!(err, TutorError::InvalidRequest { .. }));

        let absolute = Code::from([("/etc/passwd".to_string(), "x".to_string())]);
        assert!(matches!(
            manager.update_code(session.id, absolute).await,
            Err(TutorError::InvalidRequest { .. })
        ));

        let after = manager.get(session.id).await.expect("still there");
        assert_eq!(after.code, session.code);
        assert_eq!(after.run_count, 0);
    }

    #[test]
    fn executor_errors_are_classified() {
        let invalid: TutorError = ExecError::InvalidFileName("../x".into()).into();
        assert_eq!(invalid.kind(), crate::error::ErrorKind::Validation);

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/tmp/.tmpX1");
        let workspace: TutorError = ExecError::Workspace(io).into();
        assert!(matches!(workspace, TutorError::Internal(_)));

        let spawn: TutorError = ExecError::NotConfigured("build").into();
        assert!(matches!(spawn, TutorError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn run_on_finished_session_is_rejected() {
        let manager = manager().await;
        let session = manager.create("learner", exercise_request()).await.expect("created");
        manager.abandon(session.id).await.expect("abandoned");

        assert!(matches!(
            manager.run_code(session.id, run_request("x")).await,
            Err(TutorError::SessionNotActive { status: SessionStatus::Abandoned, .. })
        ));
        assert!(matches!(
            manager.complete(session.id).await,
            Err(TutorError::SessionNotActive { .. })
        ));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found_and_second_delete_fails() {
        let manager = manager().await;
        let session = manager.create("learner", exercise_request()).await.expect("created");
        manager
            .run_code(session.id, run_request("package main"))
            .await
            .expect("run");

        manager.delete(session.id).await.expect("first delete");
        assert!(matches!(
            manager.get(session.id).await,
            Err(TutorError::SessionNotFound(_))
        ));
        assert!(matches!(
            manager.delete(session.id).await,
            Err(TutorError::SessionNotFound(_))
        ));
        assert!(matches!(
            manager.delete(Uuid::now_v7()).await,
            Err(TutorError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn review_does_not_count_as_hint() {
        let manager = manager().await;
        let session = manager.create("learner", exercise_request()).await.expect("created");

        let intervention = |intent: InterventionIntent| Intervention {
            id: Uuid::now_v7(),
            session_id: session.id,
            run_id: None,
            intent,
            level: 2,
            kind: "guidance".into(),
            content: "look again".into(),
            provider: None,
            justification: None,
            created_at: Utc::now(),
        };

        let after_review = manager
            .record_intervention(&intervention(InterventionIntent::Review))
            .await
            .expect("recorded");
        assert_eq!(after_review.hint_count, 0);
        assert!(after_review.last_intervention_at.is_some());

        let after_hint = manager
            .record_intervention(&intervention(InterventionIntent::Hint))
            .await
            .expect("recorded");
        assert_eq!(after_hint.hint_count, 1);
        assert_eq!(
            manager.list_interventions(session.id).await.expect("history").len(),
            2
        );
    }

    #[tokio::test]
    async fn complete_folds_profile_and_summarises() {
        let manager = manager().await;
        let session = manager.create("learner", exercise_request()).await.expect("created");
        for _ in 0..3 {
            manager
                .run_code(session.id, run_request("package main"))
                .await
                .expect("run");
        }

        let completed = manager.complete(session.id).await.expect("completed");
        assert_eq!(completed.session.status, SessionStatus::Completed);
        assert!(completed.session.ended_at.is_some());
        assert!(completed.first_in_topic);
        assert_eq!(completed.profile.sessions_completed, 1);
        assert_eq!(completed.previous_profile.sessions_completed, 0);
        assert_eq!(
            completed.summary.expect("summary").accomplishment,
            "Self-Reliant"
        );
        let stored = manager.profile("learner").await.expect("profile");
        assert_eq!(stored.total_runs, 3);
    }

    #[tokio::test]
    async fn format_fix_does_not_mutate_session() {
        let manager = manager().await;
        let session = manager.create("learner", exercise_request()).await.expect("created");
        let messy = Code::from([("main.go".to_string(), "func  main()".to_string())]);

        let fixed = manager
            .format_fix(session.id, Some(messy))
            .await
            .expect("fix runs");
        assert_eq!(fixed["main.go"], "func main()");
        assert_eq!(manager.get(session.id).await.expect("session").code, session.code);
    }

    #[tokio::test]
    async fn satisfying_criteria_reports_progress() {
        let manager = manager().await;
        let req = CreateSessionRequest {
            spec_path: Some(SPEC_PATH.into()),
            intent: Some(SessionIntent::FeatureGuidance),
            ..CreateSessionRequest::default()
        };
        let session = manager.create("learner", req).await.expect("created");

        let first = manager
            .satisfy_criterion(session.id, "ac-1")
            .await
            .expect("satisfied");
        assert!(first.changed);
        assert_eq!(first.progress, SpecProgress { satisfied: 1, total: 2 });

        let again = manager
            .satisfy_criterion(session.id, "ac-1")
            .await
            .expect("idempotent");
        assert!(!again.changed);

        assert!(matches!(
            manager.satisfy_criterion(session.id, "ac-42").await,
            Err(TutorError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn counters_never_decrease_across_operations() {
        let manager = manager().await;
        let session = manager.create("learner", exercise_request()).await.expect("created");
        let mut last = (0, 0);
        for round in 0..4 {
            let current = if round % 2 == 0 {
                manager
                    .run_code(session.id, run_request("package main"))
                    .await
                    .expect("run")
                    .session
            } else {
                manager
                    .update_code(session.id, Code::new())
                    .await
                    .expect("update")
            };
            assert!(current.run_count >= last.0);
            assert!(current.hint_count >= last.1);
            last = (current.run_count, current.hint_count);
        }
    }

    #[tokio::test]
    async fn delete_destroys_bound_sandbox() {
        use crate::sandbox::{LocalDirDriver, SandboxManager};

        let root = tempfile::tempdir().expect("tempdir");
        let sandboxes = Arc::new(SandboxManager::new(Arc::new(LocalDirDriver::new(root.path()))));
        let manager = manager().await.with_sandboxes(sandboxes.clone());
        let session = manager.create("learner", exercise_request()).await.expect("created");
        sandboxes.ensure(session.id).await.expect("sandbox");

        manager
            .run_code(session.id, run_request("package main"))
            .await
            .expect("run with sandbox");
        assert_eq!(
            sandboxes.get(session.id).await.expect("sandbox").state,
            crate::sandbox::SandboxState::Ready
        );

        manager.delete(session.id).await.expect("deleted");
        assert!(sandboxes.get(session.id).await.is_none());
    }
}
