//! In-process daemon for handler tests: memory store, scripted model and
//! executor, one exercise and one spec.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use futures::{StreamExt, stream};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use tutor_core::SessionManager;
use tutor_core::content::{AcceptanceCriterion, Exercise, MemorySpecStore, Spec, StaticExercises};
use tutor_core::executor::{BuildOutcome, ExecError, Executor, FormatOutcome, TestOutcome};
use tutor_core::llm::{
    ChunkStream, GenerateRequest, GenerateResponse, LlmError, LlmProvider, ProviderRegistry,
    StreamChunk, Usage,
};
use tutor_core::model::Code;
use tutor_core::policy::PolicyTable;
use tutor_core::sandbox::{LocalDirDriver, SandboxManager};
use tutor_core::store::MemoryStore;

use crate::routes;
use crate::state::AppState;

pub const EXERCISE_ID: &str = "go/hello";
pub const SPEC_PATH: &str = "features/search.json";

/// Executor whose builds and tests always pass.
struct PassingExecutor;

#[async_trait]
impl Executor for PassingExecutor {
    async fn run_format(&self, _code: &Code) -> Result<FormatOutcome, ExecError> {
        Ok(FormatOutcome {
            ok: true,
            diff: String::new(),
        })
    }

    async fn run_format_fix(&self, code: &Code) -> Result<Code, ExecError> {
        Ok(code
            .iter()
            .map(|(name, content)| (name.clone(), content.replace("  ", " ")))
            .collect())
    }

    async fn run_build(&self, _code: &Code) -> Result<BuildOutcome, ExecError> {
        Ok(BuildOutcome {
            ok: true,
            output: String::new(),
        })
    }

    async fn run_tests(&self, _code: &Code, _flags: &[String]) -> Result<TestOutcome, ExecError> {
        Ok(TestOutcome {
            ok: true,
            output: "ok  \thello\t0.01s".to_string(),
            duration_ms: 10,
        })
    }
}

/// Answers from a queue, then with a fixed nudge.
struct QueuedModel {
    name: &'static str,
    replies: Mutex<VecDeque<String>>,
}

impl QueuedModel {
    fn new(name: &'static str, replies: &[&str]) -> Self {
        Self {
            name,
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
        }
    }

    fn next_reply(&self) -> String {
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| "Look at what the compiler says about line one.".to_string())
    }
}

#[async_trait]
impl LlmProvider for QueuedModel {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate(&self, _req: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        Ok(GenerateResponse {
            content: self.next_reply(),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        })
    }

    async fn generate_stream(&self, _req: &GenerateRequest) -> Result<ChunkStream, LlmError> {
        let reply = self.next_reply();
        let mut chunks: Vec<Result<StreamChunk, LlmError>> = reply
            .split_inclusive(' ')
            .map(|piece| Ok(StreamChunk::token(piece)))
            .collect();
        chunks.push(Ok(StreamChunk::done(None)));
        Ok(stream::iter(chunks).boxed())
    }
}

fn hello_exercise() -> Exercise {
    Exercise {
        id: EXERCISE_ID.to_string(),
        pack: "go".to_string(),
        slug: "hello".to_string(),
        title: "Hello".to_string(),
        description: "Print a greeting".to_string(),
        topic: Some("basics".to_string()),
        difficulty: Some("easy".to_string()),
        starter: Code::from([("main.go".to_string(), "package main\n".to_string())]),
    }
}

fn search_spec() -> Spec {
    Spec {
        path: SPEC_PATH.to_string(),
        title: "Search".to_string(),
        body: "Users can search their notes.".to_string(),
        acceptance_criteria: vec![
            AcceptanceCriterion {
                id: "ac-1".to_string(),
                text: "an empty query returns nothing".to_string(),
                satisfied: false,
            },
            AcceptanceCriterion {
                id: "ac-2".to_string(),
                text: "results are ranked".to_string(),
                satisfied: false,
            },
        ],
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    _sandbox_root: tempfile::TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_replies(Vec::new()).await
    }

    pub async fn with_replies(replies: Vec<&str>) -> Self {
        let specs = MemorySpecStore::new();
        specs.insert(search_spec()).await;
        let sessions = SessionManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(PassingExecutor),
            Arc::new(StaticExercises::new().with(hello_exercise())),
            Arc::new(specs),
            PolicyTable::builtin("practice"),
        );

        let llm = Arc::new(ProviderRegistry::new());
        llm.register("scripted", Arc::new(QueuedModel::new("scripted", &replies)));
        llm.register("backup", Arc::new(QueuedModel::new("backup", &[])));

        let sandbox_root = tempfile::tempdir().expect("sandbox root");
        let sandboxes = Arc::new(SandboxManager::new(Arc::new(LocalDirDriver::new(
            sandbox_root.path(),
        ))));

        let state = AppState::new(sessions, llm, sandboxes);
        let router = routes::router(false).with_state(state.clone());
        Self {
            state,
            router,
            _sandbox_root: sandbox_root,
        }
    }

    /// Create a practice session on the bundled exercise and return its id.
    pub async fn exercise_session(&self) -> String {
        let (status, body) = self
            .post("/v1/sessions", serde_json::json!({ "exercise_id": EXERCISE_ID }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
        body["id"].as_str().expect("session id").to_string()
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, String, String) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request should succeed");
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body should collect")
            .to_bytes();
        (status, content_type, String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn send_json(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, _, text) = self.send(request).await;
        let body = if text.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };
        (status, body)
    }

    fn request(method: Method, uri: &str, body: Option<String>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body)),
            None => builder.body(Body::empty()),
        }
        .expect("request should build")
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send_json(Self::request(Method::GET, uri, None)).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        self.send_json(Self::request(Method::DELETE, uri, None)).await
    }

    pub async fn post(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.send_json(Self::request(Method::POST, uri, Some(body.to_string())))
            .await
    }

    pub async fn put(&self, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        self.send_json(Self::request(Method::PUT, uri, Some(body.to_string())))
            .await
    }

    pub async fn post_raw(&self, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        self.send_json(Self::request(Method::POST, uri, Some(body.to_string())))
            .await
    }

    /// POST and return status, content type and the raw body.
    pub async fn post_text(&self, uri: &str, body: &str) -> (StatusCode, String, String) {
        self.send(Self::request(Method::POST, uri, Some(body.to_string())))
            .await
    }
}

/// Move the session's last intervention an hour into the past so the
/// cooldown no longer applies.
pub async fn backdate_intervention(app: &TestApp, id: &str) {
    let id = Uuid::parse_str(id).expect("session id");
    let store = app.state.sessions.store();
    let mut session = store
        .load_session(id)
        .await
        .expect("load")
        .expect("session exists");
    session.last_intervention_at = session
        .last_intervention_at
        .map(|at| at - chrono::Duration::hours(1));
    store.save_session(&session).await.expect("save");
}
