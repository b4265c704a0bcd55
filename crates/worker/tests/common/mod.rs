//! Shared helpers for HTTP integration tests
//!
//! Builds the production router over scripted engines and a recording
//! notifier, so tests see exactly the middleware stack `main` serves.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use opml_worker::{
    router, AppState, DeliveryError, Dispatcher, EngineKind, EngineOutput, EngineSlot, InferenceEngine, JobRecord,
    Notifier, ResultRegistry,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

pub const NODE_ID: &str = "node-test";

/// Engine returning a fixed result, optionally held until released
pub struct ScriptedEngine {
    kind: EngineKind,
    output: String,
    gate: Option<Arc<Notify>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new(kind: EngineKind, output: &str) -> Self {
        Self {
            kind,
            output: output.to_string(),
            gate: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn execute(&self, job: &JobRecord) -> EngineOutput {
        self.calls.lock().push(job.req_id.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        EngineOutput::success(self.output.clone())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub delivered: Mutex<Vec<JobRecord>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, record: JobRecord) -> Result<(), DeliveryError> {
        self.delivered.lock().push(record);
        Ok(())
    }
}

pub struct TestNode {
    pub app: Router,
    pub dispatcher: Arc<Dispatcher>,
    pub notifier: Arc<RecordingNotifier>,
    pub tasks: TaskTracker,
    pub llm: Arc<ScriptedEngine>,
    pub replay: Arc<ScriptedEngine>,
}

impl TestNode {
    /// Wait for every spawned engine run and callback
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

pub fn build_test_node(llm: ScriptedEngine, replay: ScriptedEngine) -> TestNode {
    let tasks = TaskTracker::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let registry = Arc::new(ResultRegistry::new(notifier.clone(), tasks.clone()));
    let llm = Arc::new(llm);
    let replay = Arc::new(replay);

    let dispatcher = Arc::new(Dispatcher::new(
        EngineSlot::new(llm.clone(), 1, Duration::from_secs(300)),
        EngineSlot::new(replay.clone(), 1, Duration::from_secs(600)),
        registry,
        tasks.clone(),
    ));

    TestNode {
        app: router(AppState::new(dispatcher.clone(), NODE_ID)),
        dispatcher,
        notifier,
        tasks,
        llm,
        replay,
    }
}

pub fn default_node() -> TestNode {
    build_test_node(
        ScriptedEngine::new(EngineKind::Llm, "hello"),
        ScriptedEngine::new(EngineKind::Replay, "0xabc"),
    )
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
