//! The capture engine: one task owning the session registry, the event router
//! and the short-window dedup cache.
//!
//! Host events arrive over an mpsc channel and are routed strictly in order.
//! Slow work (response body fetches, triage) runs on spawned tasks whose
//! results come back over channels, so routing never waits on the network in
//! [`CaptureEngine::run`]. Anything checked before an await is re-checked
//! after it, since the target may close at any suspension point.

use crate::backend::{DebuggerBackend, evaluate, fetch_response_body};
use crate::clock::Clock;
use crate::prebuffer::{DRAIN_EXPRESSION, parse_buffered};
use crate::router::{EntrySinks, EventRouter, PendingHttpError, RouterAction};
use crate::session::{Session, SessionRegistry, SessionSnapshot};
use crate::sink::ErrorHandler;
use crate::store::kv::{ATTACHED_SESSIONS_KEY, KvStore, get_typed, set_typed};
use crate::store::persistent::{self, PruneStats, SharedPersistentStore};
use buglens_common::config::{BuglensConfig, CaptureConfig, PersistenceConfig};
use buglens_common::error::CaptureError;
use buglens_common::log::LogEntry;
use buglens_common::protocol::{CdpCommand, ProtocolEvent, TargetEvent};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// `Runtime.enable` replays console calls and exceptions the page made
/// earlier. Those the pre-attach buffer already recorded are dropped so each
/// occurrence is stored once.
fn is_buffered_replay(event: &ProtocolEvent, session: &Session) -> bool {
    if !matches!(
        event,
        ProtocolEvent::ConsoleApiCalled(_) | ProtocolEvent::ExceptionThrown(_)
    ) {
        return false;
    }
    match (event.occurred_at(), session.replayed_before) {
        (Some(at), Some(cutoff)) => at < cutoff,
        _ => false,
    }
}

/// Requests accepted by a running engine.
#[derive(Debug)]
pub enum EngineCommand {
    Attach {
        target: String,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    Detach {
        target: String,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    Snapshot {
        target: String,
        reply: oneshot::Sender<Option<SessionSnapshot>>,
    },
    Shutdown,
}

/// Cloneable front door to an engine started with [`CaptureEngine::run`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

fn engine_stopped() -> CaptureError {
    CaptureError::Protocol("capture engine is not running".to_string())
}

impl EngineHandle {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    pub async fn attach(&self, target: &str) -> Result<(), CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Attach {
                target: target.to_string(),
                reply,
            })
            .await
            .map_err(|_| engine_stopped())?;
        rx.await.map_err(|_| engine_stopped())?
    }

    pub async fn detach(&self, target: &str) -> Result<(), CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Detach {
                target: target.to_string(),
                reply,
            })
            .await
            .map_err(|_| engine_stopped())?;
        rx.await.map_err(|_| engine_stopped())?
    }

    pub async fn snapshot(&self, target: &str) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Snapshot {
                target: target.to_string(),
                reply,
            })
            .await
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(EngineCommand::Shutdown).await;
    }
}

#[derive(Debug)]
struct BodyFetched {
    pending: PendingHttpError,
    body: Result<String, CaptureError>,
}

/// Console history drained from the page during attach.
#[derive(Debug, Default)]
struct PreAttach {
    entries: Vec<LogEntry>,
    /// Runtime replays of console calls and exceptions older than this are
    /// already covered by `entries`.
    covered_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFetch {
    Inline,
    Background,
}

pub struct CaptureEngine {
    backend: Arc<dyn DebuggerBackend>,
    registry: SessionRegistry,
    router: EventRouter,
    persistent: SharedPersistentStore,
    kv: Arc<dyn KvStore>,
    handler: Arc<dyn ErrorHandler>,
    clock: Arc<dyn Clock>,
    capture: CaptureConfig,
    persistence: PersistenceConfig,
    events_tx: mpsc::Sender<TargetEvent>,
    events_rx: mpsc::Receiver<TargetEvent>,
    fetch_tx: mpsc::UnboundedSender<BodyFetched>,
    fetch_rx: mpsc::UnboundedReceiver<BodyFetched>,
    tasks: JoinSet<()>,
}

impl CaptureEngine {
    pub fn new(
        config: &BuglensConfig,
        backend: Arc<dyn DebuggerBackend>,
        persistent: SharedPersistentStore,
        kv: Arc<dyn KvStore>,
        handler: Arc<dyn ErrorHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            registry: SessionRegistry::new(config.capture.buffer_cap),
            router: EventRouter::new(Duration::milliseconds(config.dedup.window_ms)),
            persistent,
            kv,
            handler,
            clock,
            capture: config.capture.clone(),
            persistence: config.persistence.clone(),
            events_tx,
            events_rx,
            fetch_tx,
            fetch_rx,
            tasks: JoinSet::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn session(&self, target: &str) -> Option<&Session> {
        self.registry.session(target)
    }

    pub fn snapshot(&self, target: &str) -> Option<SessionSnapshot> {
        self.registry.session(target).map(Session::snapshot)
    }

    pub fn persistent(&self) -> SharedPersistentStore {
        self.persistent.clone()
    }

    /// Attaches to `target`, enables the protocol domains and merges any
    /// pre-attach console history. Fails closed with a typed error.
    pub async fn attach(&mut self, target: &str) -> Result<(), CaptureError> {
        self.registry.begin_attach(target, self.clock.now())?;

        let pre_attach = match self.connect(target).await {
            Ok(pre_attach) => pre_attach,
            Err(e) => {
                self.registry.abort_attach(target);
                warn!("Attach to {} failed: {}", target, e);
                return Err(e);
            }
        };

        let now = self.clock.now();
        let session = match self.registry.complete_attach(target, now) {
            Ok(session) => session,
            Err(e) => {
                info!("Target {} went away while attaching", target);
                let _ = self.backend.detach(target).await;
                return Err(e);
            }
        };

        session.replayed_before = pre_attach.covered_until;
        let buffered = pre_attach.entries;
        let merged = buffered.len();
        if !buffered.is_empty() {
            let errors: Vec<LogEntry> = buffered.iter().filter(|e| e.is_error()).cloned().collect();
            session.logs.prepend(buffered.clone());
            session.errors.prepend(errors);
            persistent::lock(&self.persistent).prepend_logs(target, buffered, now);
        }

        self.record_attachment(target, now).await;
        info!("Attached to {} ({} buffered entries merged)", target, merged);
        Ok(())
    }

    async fn connect(&self, target: &str) -> Result<PreAttach, CaptureError> {
        if !self.backend.target_exists(target).await {
            return Err(CaptureError::TargetGone(target.to_string()));
        }

        self.backend.attach(target, self.events_tx.clone()).await?;

        if let Err(e) = self.enable_domains(target).await {
            let _ = self.backend.detach(target).await;
            return Err(e);
        }

        if !self.capture.merge_pre_attach {
            return Ok(PreAttach::default());
        }
        let drain_started = self.clock.now();
        match evaluate(self.backend.as_ref(), target, DRAIN_EXPRESSION).await {
            Ok(value @ Value::Array(_)) => {
                let entries = parse_buffered(value, self.clock.now());
                // Everything the buffer recorded happened before the drain ran.
                let covered_until = entries
                    .iter()
                    .map(|e| e.timestamp + Duration::milliseconds(1))
                    .fold(drain_started, std::cmp::max);
                Ok(PreAttach {
                    entries,
                    covered_until: Some(covered_until),
                })
            }
            Ok(_) => {
                debug!("No pre-attach buffer installed on {}", target);
                Ok(PreAttach::default())
            }
            Err(e) if e.is_target_gone() => {
                let _ = self.backend.detach(target).await;
                Err(e)
            }
            Err(e) => {
                debug!("No pre-attach buffer on {}: {}", target, e);
                Ok(PreAttach::default())
            }
        }
    }

    async fn enable_domains(&self, target: &str) -> Result<(), CaptureError> {
        let commands = [
            CdpCommand::RuntimeEnable,
            CdpCommand::ConsoleEnable,
            CdpCommand::NetworkEnable,
            CdpCommand::SetAsyncCallStackDepth {
                max_depth: self.capture.async_stack_depth,
            },
        ];
        for command in commands {
            if !self.backend.target_exists(target).await {
                return Err(CaptureError::TargetGone(target.to_string()));
            }
            self.backend.send_command(target, command).await?;
        }
        Ok(())
    }

    pub async fn detach(&mut self, target: &str) -> Result<(), CaptureError> {
        self.registry.begin_detach(target)?;
        let result = self.backend.detach(target).await;
        self.registry.finish_detach(target);
        self.router.recent_signals().forget_session(target);
        self.remove_attachment(target).await;

        match result {
            Err(e) if e.is_target_gone() => {
                debug!("Target {} already gone at detach", target);
                Ok(())
            }
            Err(e) => {
                warn!("Detach from {} reported: {}", target, e);
                Err(e)
            }
            Ok(()) => {
                info!("Detached from {}", target);
                Ok(())
            }
        }
    }

    /// The host says the target vanished: drop the live session at once. The
    /// persistent record stays and ages out on its own.
    async fn force_detach(&mut self, target: &str, reason: &str) {
        let dropped = self.registry.force_detach(target);
        self.router.recent_signals().forget_session(target);
        self.remove_attachment(target).await;
        info!(
            "Target {} detached ({}); live session {}",
            target,
            reason,
            if dropped.is_some() { "dropped" } else { "absent" }
        );
    }

    async fn record_attachment(&self, target: &str, at: DateTime<Utc>) {
        let result = async {
            let mut attached: HashMap<String, DateTime<Utc>> =
                get_typed(self.kv.as_ref(), ATTACHED_SESSIONS_KEY)
                    .await?
                    .unwrap_or_default();
            attached.insert(target.to_string(), at);
            set_typed(self.kv.as_ref(), ATTACHED_SESSIONS_KEY, &attached).await
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to record attachment of {}: {}", target, e);
        }
    }

    async fn remove_attachment(&self, target: &str) {
        let result = async {
            let mut attached: HashMap<String, DateTime<Utc>> =
                get_typed(self.kv.as_ref(), ATTACHED_SESSIONS_KEY)
                    .await?
                    .unwrap_or_default();
            if attached.remove(target).is_some() {
                set_typed(self.kv.as_ref(), ATTACHED_SESSIONS_KEY, &attached).await?;
            }
            Ok::<(), crate::store::StorageError>(())
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to clear attachment of {}: {}", target, e);
        }
    }

    /// Routes one event and completes any body fetch before returning.
    pub async fn handle_event(&mut self, event: TargetEvent) {
        self.process_event(event, BodyFetch::Inline).await;
    }

    /// Routes everything the backend has queued so far, inline.
    pub async fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.process_event(event, BodyFetch::Inline).await;
            handled += 1;
        }
        handled
    }

    async fn process_event(&mut self, event: TargetEvent, mode: BodyFetch) {
        let TargetEvent {
            target_id,
            method,
            params,
        } = event;

        let decoded = match ProtocolEvent::from_cdp(&method, params) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => return,
            Err(e) => {
                debug!("Dropping malformed {} from {}: {}", method, target_id, e);
                return;
            }
        };

        if let ProtocolEvent::Detached(detached) = &decoded {
            self.force_detach(&target_id, &detached.reason).await;
            return;
        }

        let Some(session) = self.registry.session(&target_id) else {
            debug!("Ignoring {} for unattached target {}", method, target_id);
            return;
        };
        if is_buffered_replay(&decoded, session) {
            debug!("Dropping replayed {} on {}, merged from the buffer", method, target_id);
            return;
        }

        let now = self.clock.now();
        let action = {
            let mut store = persistent::lock(&self.persistent);
            let mut sinks =
                EntrySinks::new(&target_id, self.registry.session_mut(&target_id), &mut store, now);
            self.router.route(decoded, &mut sinks)
        };

        match action {
            Some(RouterAction::FetchBody(pending)) => match mode {
                BodyFetch::Inline => {
                    let body =
                        fetch_response_body(self.backend.as_ref(), &target_id, &pending.request_id)
                            .await;
                    self.complete_body_fetch(pending, body);
                }
                BodyFetch::Background => {
                    let backend = self.backend.clone();
                    let tx = self.fetch_tx.clone();
                    tokio::spawn(async move {
                        let body = fetch_response_body(
                            backend.as_ref(),
                            &pending.session_key,
                            &pending.request_id,
                        )
                        .await;
                        let _ = tx.send(BodyFetched { pending, body });
                    });
                }
            },
            None => {}
        }
    }

    /// Records the HTTP error entry once the body fetch settled and hands
    /// the summary to the error handler.
    fn complete_body_fetch(&mut self, pending: PendingHttpError, body: Result<String, CaptureError>) {
        if let Err(e) = &body {
            if e.is_target_gone() {
                debug!(
                    "Target {} gone before body of {} could be read",
                    pending.session_key, pending.url
                );
            }
        }

        let now = self.clock.now();
        let key = pending.session_key.clone();
        let summary = {
            let mut store = persistent::lock(&self.persistent);
            let mut sinks = EntrySinks::new(&key, self.registry.session_mut(&key), &mut store, now);
            EventRouter::complete_http_error(pending, body, &mut sinks)
        };

        let handler = self.handler.clone();
        self.tasks.spawn(async move { handler.handle_error(summary).await });
    }

    /// One bounded maintenance pass: ages a slice of persistent records and
    /// sweeps both dedup caches.
    pub async fn run_maintenance(&mut self) -> PruneStats {
        let now = self.clock.now();
        let live = self.registry.live_targets();
        let stats =
            persistent::lock(&self.persistent).prune(now, &live, self.persistence.maintenance_slice);
        let emptied = self.router.recent_signals().sweep(now);
        self.handler.maintain(now).await;

        if stats.entries_removed > 0 || stats.sessions_removed > 0 {
            debug!(
                "Maintenance: {} entries and {} records aged out ({} scanned, {} dedup sessions emptied)",
                stats.entries_removed, stats.sessions_removed, stats.sessions_scanned, emptied
            );
        }
        stats
    }

    /// Waits for every in-flight error handler call.
    pub async fn wait_idle(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!("Error handler task failed: {}", e);
            }
        }
    }

    async fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Attach { target, reply } => {
                let _ = reply.send(self.attach(&target).await);
            }
            EngineCommand::Detach { target, reply } => {
                let _ = reply.send(self.detach(&target).await);
            }
            EngineCommand::Snapshot { target, reply } => {
                let _ = reply.send(self.snapshot(&target));
            }
            EngineCommand::Shutdown => return false,
        }
        true
    }

    /// Runs until a `Shutdown` command arrives or every handle is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) {
        let period = std::time::Duration::from_secs(self.persistence.maintenance_interval_secs.max(1));
        let mut maintenance = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        info!("Capture engine running");

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.process_event(event, BodyFetch::Background).await;
                }
                Some(fetched) = self.fetch_rx.recv() => {
                    self.complete_body_fetch(fetched.pending, fetched.body);
                }
                command = commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command).await,
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
                _ = maintenance.tick() => {
                    self.run_maintenance().await;
                }
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if let Err(e) = result {
                        warn!("Error handler task failed: {}", e);
                    }
                }
            }
        }

        for target in self.registry.live_targets() {
            if let Err(e) = self.detach(&target).await {
                debug!("Detach of {} during shutdown: {}", target, e);
            }
        }
        self.wait_idle().await;
        info!("Capture engine stopped");
    }
}
