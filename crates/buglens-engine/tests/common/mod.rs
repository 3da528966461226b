#![allow(dead_code)]

use async_trait::async_trait;
use buglens_engine::backend::DebuggerBackend;
use buglens_engine::clock::ManualClock;
use buglens_engine::config::BuglensConfig;
use buglens_engine::engine::CaptureEngine;
use buglens_engine::error::CaptureError;
use buglens_engine::prebuffer::DRAIN_EXPRESSION;
use buglens_engine::protocol::{CdpCommand, TargetEvent, methods};
use buglens_engine::report::HttpErrorSummary;
use buglens_engine::sink::ErrorHandler;
use buglens_engine::store::{KvStore, MemoryKvStore, PersistentLogStore};
use buglens_engine::triage::{GenerationClient, GenerationError, GenerationRequest};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

#[derive(Default)]
pub struct MockBackend {
    pub targets: Mutex<HashSet<String>>,
    pub commands: Mutex<Vec<(String, CdpCommand)>>,
    pub bodies: Mutex<HashMap<String, Value>>,
    pub prebuffer: Mutex<Value>,
    pub page_info: Mutex<Value>,
    pub senders: Mutex<HashMap<String, mpsc::Sender<TargetEvent>>>,
    pub detached: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn with_targets(targets: &[&str]) -> Arc<Self> {
        let backend = Self::default();
        backend
            .targets
            .lock()
            .unwrap()
            .extend(targets.iter().map(|t| t.to_string()));
        *backend.prebuffer.lock().unwrap() = json!([]);
        *backend.page_info.lock().unwrap() =
            json!({ "title": "Shop", "url": "https://shop.example/cart", "userAgent": "test" });
        Arc::new(backend)
    }

    pub fn close_target(&self, target: &str) {
        self.targets.lock().unwrap().remove(target);
    }

    pub fn set_body(&self, request_id: &str, body: &str) {
        self.bodies.lock().unwrap().insert(
            request_id.to_string(),
            json!({ "body": body, "base64Encoded": false }),
        );
    }

    pub fn sent(&self) -> Vec<CdpCommand> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Pushes an event through the channel handed over at attach.
    pub async fn emit(&self, target: &str, method: &str, params: Value) {
        let sender = self.senders.lock().unwrap().get(target).cloned();
        if let Some(sender) = sender {
            sender
                .send(TargetEvent::new(target, method, params))
                .await
                .unwrap();
        }
    }

    fn exists(&self, target: &str) -> bool {
        self.targets.lock().unwrap().contains(target)
    }
}

#[async_trait]
impl DebuggerBackend for MockBackend {
    async fn attach(
        &self,
        target: &str,
        events: mpsc::Sender<TargetEvent>,
    ) -> Result<(), CaptureError> {
        if !self.exists(target) {
            return Err(CaptureError::TargetGone(target.to_string()));
        }
        self.senders
            .lock()
            .unwrap()
            .insert(target.to_string(), events);
        Ok(())
    }

    async fn detach(&self, target: &str) -> Result<(), CaptureError> {
        self.senders.lock().unwrap().remove(target);
        self.detached.lock().unwrap().push(target.to_string());
        Ok(())
    }

    async fn send_command(&self, target: &str, command: CdpCommand) -> Result<Value, CaptureError> {
        self.commands
            .lock()
            .unwrap()
            .push((target.to_string(), command.clone()));
        if !self.exists(target) {
            return Err(CaptureError::TargetGone(target.to_string()));
        }
        match command {
            CdpCommand::GetResponseBody { request_id } => self
                .bodies
                .lock()
                .unwrap()
                .get(&request_id)
                .cloned()
                .ok_or_else(|| {
                    CaptureError::Protocol("No resource with given identifier found".into())
                }),
            CdpCommand::Evaluate { expression } if expression == DRAIN_EXPRESSION => {
                Ok(json!({ "result": { "type": "object", "value": self.prebuffer.lock().unwrap().clone() } }))
            }
            CdpCommand::Evaluate { .. } => {
                Ok(json!({ "result": { "type": "object", "value": self.page_info.lock().unwrap().clone() } }))
            }
            _ => Ok(json!({})),
        }
    }

    async fn target_exists(&self, target: &str) -> bool {
        self.exists(target)
    }
}

/// Collects every error summary the engine hands off.
#[derive(Default)]
pub struct RecordingHandler {
    pub errors: Mutex<Vec<HttpErrorSummary>>,
    pub maintenance_runs: Mutex<usize>,
}

impl RecordingHandler {
    pub fn errors(&self) -> Vec<HttpErrorSummary> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorHandler for RecordingHandler {
    async fn handle_error(&self, error: HttpErrorSummary) {
        self.errors.lock().unwrap().push(error);
    }

    async fn maintain(&self, _now: DateTime<Utc>) {
        *self.maintenance_runs.lock().unwrap() += 1;
    }
}

pub struct Harness {
    pub engine: CaptureEngine,
    pub backend: Arc<MockBackend>,
    pub kv: Arc<MemoryKvStore>,
    pub clock: ManualClock,
    pub handler: Arc<RecordingHandler>,
}

impl Harness {
    pub fn new(targets: &[&str]) -> Self {
        Self::with_config(targets, BuglensConfig::default())
    }

    pub fn with_config(targets: &[&str], config: BuglensConfig) -> Self {
        let backend = MockBackend::with_targets(targets);
        let kv = Arc::new(MemoryKvStore::new());
        let clock = ManualClock::new(t0());
        let handler = Arc::new(RecordingHandler::default());
        let persistent = PersistentLogStore::from_config(&config.persistence).shared();
        let engine = CaptureEngine::new(
            &config,
            backend.clone(),
            persistent,
            kv.clone() as Arc<dyn KvStore>,
            handler.clone(),
            Arc::new(clock.clone()),
        );
        Self {
            engine,
            backend,
            kv,
            clock,
            handler,
        }
    }

    pub async fn event(&mut self, target: &str, method: &str, params: Value) {
        self.engine
            .handle_event(TargetEvent::new(target, method, params))
            .await;
    }

    pub async fn request(&mut self, target: &str, id: &str, url: &str) {
        self.event(
            target,
            methods::REQUEST_WILL_BE_SENT,
            json!({ "requestId": id, "request": { "url": url, "method": "GET" }, "type": "XHR" }),
        )
        .await;
    }

    pub async fn response(&mut self, target: &str, id: &str, url: &str, status: u16, text: &str) {
        self.event(
            target,
            methods::RESPONSE_RECEIVED,
            json!({
                "requestId": id,
                "type": "XHR",
                "response": { "url": url, "status": status, "statusText": text, "mimeType": "application/json" }
            }),
        )
        .await;
    }
}

/// Generation client answering from a script and counting calls per model.
pub struct ScriptedClient {
    answers: Mutex<VecDeque<Result<String, GenerationError>>>,
    default_answer: Result<String, GenerationError>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(answers: Vec<Result<String, GenerationError>>) -> Arc<Self> {
        Self::with_default(answers, Ok(valid_report_json()))
    }

    pub fn with_default(
        answers: Vec<Result<String, GenerationError>>,
        default_answer: Result<String, GenerationError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into()),
            default_answer,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate(
        &self,
        model: &str,
        _request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push(model.to_string());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_answer.clone())
    }
}

pub fn status(code: u16) -> Result<String, GenerationError> {
    Err(GenerationError::Status {
        status: code,
        body: format!("HTTP {}", code),
    })
}

pub fn valid_report_json() -> String {
    r#"```json
{"title": "Cart API fails", "description": "The cart endpoint returns 500", "stepsToReproduce": ["Open cart"], "severity": "high", "suggestedFix": undefined}
```"#
        .to_string()
}

pub fn http_error(url: &str, status: u16) -> HttpErrorSummary {
    HttpErrorSummary {
        session_key: "t1".into(),
        request_id: "r1".into(),
        url: url.into(),
        method: "GET".into(),
        status,
        status_text: "Error".into(),
        response_body: Some("{\"error\":\"boom\"}".into()),
        timestamp: t0(),
    }
}
