use crate::cdp::{BrowserHost, HostError, target_id};
use async_trait::async_trait;
use buglens_engine::backend::DebuggerBackend;
use buglens_engine::error::CaptureError;
use buglens_engine::protocol::{CdpCommand, TargetEvent, methods};
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::{inspector, log, network};
use chromiumoxide::cdp::js_protocol::runtime;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Subscribes to one typed page event and forwards it, serialized, as a
/// `TargetEvent` until the page or the receiver goes away.
macro_rules! forward {
    ($page:expr, $target:expr, $events:expr, $tasks:expr, $event:ty, $method:expr) => {{
        let mut stream = $page
            .event_listener::<$event>()
            .await
            .map_err(|e| CaptureError::from_protocol_message($target, &e.to_string()))?;
        let events = $events.clone();
        let target = $target.to_string();
        $tasks.push(tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let params = match serde_json::to_value(&*event) {
                    Ok(params) => params,
                    Err(e) => {
                        debug!("Dropping unserializable {} event: {}", $method, e);
                        continue;
                    }
                };
                if events
                    .send(TargetEvent::new(target.clone(), $method, params))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));
    }};
}

/// Runs a typed command and returns its result as raw JSON.
macro_rules! execute {
    ($page:expr, $target:expr, $params:expr) => {{
        let response = $page
            .execute($params)
            .await
            .map_err(|e| CaptureError::from_protocol_message($target, &e.to_string()))?;
        Ok(serde_json::to_value(&response.result)?)
    }};
}

struct Attachment {
    page: Page,
    forwarders: Vec<JoinHandle<()>>,
}

/// `DebuggerBackend` over a locally launched Chromium. Targets are page
/// target ids.
pub struct ChromeBackend {
    host: Mutex<BrowserHost>,
    attached: Mutex<HashMap<String, Attachment>>,
}

impl ChromeBackend {
    pub fn new(host: BrowserHost) -> Self {
        Self {
            host: Mutex::new(host),
            attached: Mutex::new(HashMap::new()),
        }
    }

    pub async fn open_page(&self, url: &str) -> Result<Page, HostError> {
        self.host.lock().await.open_page(url).await
    }

    /// Stops all forwarders and shuts the browser down.
    pub async fn close(&self) -> Result<(), HostError> {
        for (_, attachment) in self.attached.lock().await.drain() {
            attachment.forwarders.iter().for_each(JoinHandle::abort);
        }
        self.host.lock().await.close().await
    }

    async fn live_page(&self, target: &str) -> Option<Page> {
        let pages = match self.host.lock().await.pages().await {
            Ok(pages) => pages,
            Err(e) => {
                debug!("Could not list pages: {}", e);
                return None;
            }
        };
        pages.into_iter().find(|p| target_id(p) == target)
    }

    async fn page_for(&self, target: &str) -> Result<Page, CaptureError> {
        if let Some(attachment) = self.attached.lock().await.get(target) {
            return Ok(attachment.page.clone());
        }
        self.live_page(target)
            .await
            .ok_or_else(|| CaptureError::TargetGone(target.to_string()))
    }
}

#[async_trait]
impl DebuggerBackend for ChromeBackend {
    async fn attach(
        &self,
        target: &str,
        events: mpsc::Sender<TargetEvent>,
    ) -> Result<(), CaptureError> {
        let page = self
            .live_page(target)
            .await
            .ok_or_else(|| CaptureError::TargetGone(target.to_string()))?;

        let mut forwarders = Vec::new();
        let subscribed: Result<(), CaptureError> = async {
            forward!(page, target, events, forwarders, runtime::EventConsoleApiCalled, methods::CONSOLE_API_CALLED);
            forward!(page, target, events, forwarders, runtime::EventExceptionThrown, methods::EXCEPTION_THROWN);
            forward!(page, target, events, forwarders, log::EventEntryAdded, methods::LOG_ENTRY_ADDED);
            forward!(page, target, events, forwarders, network::EventRequestWillBeSent, methods::REQUEST_WILL_BE_SENT);
            forward!(page, target, events, forwarders, network::EventResponseReceived, methods::RESPONSE_RECEIVED);
            forward!(page, target, events, forwarders, network::EventLoadingFailed, methods::LOADING_FAILED);
            forward!(page, target, events, forwarders, network::EventLoadingFinished, methods::LOADING_FINISHED);
            forward!(page, target, events, forwarders, inspector::EventDetached, methods::DETACHED);
            Ok(())
        }
        .await;
        if let Err(e) = subscribed {
            forwarders.iter().for_each(JoinHandle::abort);
            return Err(e);
        }

        info!("Forwarding {} events for {}", forwarders.len(), target);
        let previous = self
            .attached
            .lock()
            .await
            .insert(target.to_string(), Attachment { page, forwarders });
        if let Some(previous) = previous {
            previous.forwarders.iter().for_each(JoinHandle::abort);
        }
        Ok(())
    }

    async fn detach(&self, target: &str) -> Result<(), CaptureError> {
        match self.attached.lock().await.remove(target) {
            Some(attachment) => {
                attachment.forwarders.iter().for_each(JoinHandle::abort);
                debug!("Stopped forwarding events for {}", target);
                Ok(())
            }
            None => Err(CaptureError::TargetGone(target.to_string())),
        }
    }

    async fn send_command(&self, target: &str, command: CdpCommand) -> Result<Value, CaptureError> {
        let page = self.page_for(target).await?;
        match command {
            CdpCommand::RuntimeEnable => execute!(page, target, runtime::EnableParams::default()),
            // The Console domain is deprecated; Log.entryAdded carries the
            // browser-side messages.
            CdpCommand::ConsoleEnable => execute!(page, target, log::EnableParams::default()),
            CdpCommand::NetworkEnable => execute!(page, target, network::EnableParams::default()),
            CdpCommand::SetAsyncCallStackDepth { max_depth } => execute!(
                page,
                target,
                runtime::SetAsyncCallStackDepthParams::new(max_depth)
            ),
            CdpCommand::GetResponseBody { request_id } => execute!(
                page,
                target,
                network::GetResponseBodyParams::new(network::RequestId::new(request_id))
            ),
            CdpCommand::Evaluate { expression } => {
                let params = runtime::EvaluateParams::builder()
                    .expression(expression)
                    .return_by_value(true)
                    .build()
                    .map_err(CaptureError::Protocol)?;
                execute!(page, target, params)
            }
        }
    }

    async fn target_exists(&self, target: &str) -> bool {
        self.live_page(target).await.is_some()
    }
}
