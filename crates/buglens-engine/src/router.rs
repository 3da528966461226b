//! Normalizes debugger events into `LogEntry` values.
//!
//! Every entry lands in the live session (when there is one) and in the
//! target's persistent record. Network entries are correlated by request id:
//! a response or completion replaces the stored request entry in place.

use crate::dedup::RecentSignalCache;
use crate::session::Session;
use crate::store::PersistentLogStore;
use buglens_common::error::CaptureError;
use buglens_common::log::{EntryDetail, LogEntry, LogLevel, NetworkInfo};
use buglens_common::protocol::{
    ConsoleApiCalled, ExceptionThrown, LoadingFailed, LoadingFinished, MessageAdded,
    ProtocolEvent, RequestWillBeSent, ResponseReceived, cdp_time,
};
use buglens_common::report::HttpErrorSummary;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

pub const BODY_UNAVAILABLE_NOTE: &str = "Response body unavailable";

/// Follow-up work the router cannot do synchronously.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterAction {
    /// A non-duplicate HTTP error whose body should be fetched.
    FetchBody(PendingHttpError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingHttpError {
    pub session_key: String,
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub status: u16,
    pub status_text: String,
    pub timestamp: DateTime<Utc>,
}

impl PendingHttpError {
    pub fn into_summary(self, response_body: Option<String>) -> HttpErrorSummary {
        HttpErrorSummary {
            session_key: self.session_key,
            request_id: self.request_id,
            url: self.url,
            method: self.method,
            status: self.status,
            status_text: self.status_text,
            response_body,
            timestamp: self.timestamp,
        }
    }

    fn headline(&self) -> String {
        format!(
            "{} {} -> {} {}",
            self.method, self.url, self.status, self.status_text
        )
        .trim_end()
        .to_string()
    }
}

/// Destinations for one routed event: the live session, if any, and the
/// persistent record for the same key.
pub struct EntrySinks<'a> {
    key: &'a str,
    session: Option<&'a mut Session>,
    persistent: &'a mut PersistentLogStore,
    now: DateTime<Utc>,
}

impl<'a> EntrySinks<'a> {
    pub fn new(
        key: &'a str,
        session: Option<&'a mut Session>,
        persistent: &'a mut PersistentLogStore,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            session,
            persistent,
            now,
        }
    }

    fn log(&mut self, entry: LogEntry) {
        if let Some(session) = self.session.as_deref_mut() {
            session.logs.append(entry.clone());
        }
        self.persistent.append_log(self.key, entry, self.now);
    }

    fn network(&mut self, entry: LogEntry) {
        if let Some(session) = self.session.as_deref_mut() {
            session.network_requests.append(entry.clone());
        }
        self.persistent.append_network(self.key, entry, self.now);
    }

    fn error(&mut self, entry: LogEntry) {
        if let Some(session) = self.session.as_deref_mut() {
            session.errors.append(entry.clone());
        }
        self.persistent.append_error(self.key, entry, self.now);
    }

    /// Page-reported event time, or the engine clock when there is none.
    fn occurred(&self, timestamp: Option<f64>) -> DateTime<Utc> {
        timestamp.and_then(cdp_time).unwrap_or(self.now)
    }

    fn log_and_error(&mut self, entry: LogEntry) {
        self.log(entry.clone());
        self.error(entry);
    }

    fn find_network(&self, request_id: &str) -> Option<LogEntry> {
        self.session
            .as_deref()
            .and_then(|s| s.network_requests.find_network(request_id).cloned())
            .or_else(|| {
                self.persistent
                    .record(self.key)
                    .and_then(|r| r.network_requests.find_network(request_id).cloned())
            })
    }

    /// Replaces the correlated network entry everywhere it is stored.
    fn replace_network<F>(&mut self, request_id: &str, merge: F) -> bool
    where
        F: Fn(&LogEntry) -> LogEntry,
    {
        let mut replaced = false;
        if let Some(session) = self.session.as_deref_mut() {
            replaced |= session.logs.replace_network(request_id, &merge);
            replaced |= session.network_requests.replace_network(request_id, &merge);
        }
        replaced |= self.persistent.replace_network(self.key, request_id, &merge);
        replaced
    }
}

#[derive(Debug)]
pub struct EventRouter {
    recent: RecentSignalCache,
}

impl EventRouter {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            recent: RecentSignalCache::new(dedup_window),
        }
    }

    pub fn recent_signals(&mut self) -> &mut RecentSignalCache {
        &mut self.recent
    }

    pub fn route(&mut self, event: ProtocolEvent, sinks: &mut EntrySinks<'_>) -> Option<RouterAction> {
        match event {
            ProtocolEvent::ConsoleMessageAdded(ev) => {
                Self::console_message(ev, sinks);
                None
            }
            ProtocolEvent::ConsoleApiCalled(ev) => {
                Self::console_api(ev, sinks);
                None
            }
            ProtocolEvent::ExceptionThrown(ev) => {
                Self::exception(ev, sinks);
                None
            }
            ProtocolEvent::RequestWillBeSent(ev) => {
                Self::request(ev, sinks);
                None
            }
            ProtocolEvent::ResponseReceived(ev) => self.response(ev, sinks),
            ProtocolEvent::LoadingFailed(ev) => {
                Self::loading_failed(ev, sinks);
                None
            }
            ProtocolEvent::LoadingFinished(ev) => {
                Self::loading_finished(ev, sinks);
                None
            }
            ProtocolEvent::Detached(_) => None,
        }
    }

    fn console_message(ev: MessageAdded, sinks: &mut EntrySinks<'_>) {
        let message = ev.message;
        let level = LogLevel::from_console(&message.level);
        let entry = LogEntry::new(
            level,
            message.text,
            sinks.occurred(message.timestamp),
            EntryDetail::Console {
                source: message.source,
                line: message.line,
            },
        )
        .with_optional_url(message.url);

        if level == LogLevel::Error {
            sinks.log_and_error(entry);
        } else {
            sinks.log(entry);
        }
    }

    fn console_api(ev: ConsoleApiCalled, sinks: &mut EntrySinks<'_>) {
        let level = LogLevel::from_console(&ev.api_type);
        let text = ev.text();
        let stack = ev.stack_trace.as_ref().and_then(|s| s.render());
        let url = ev
            .stack_trace
            .as_ref()
            .and_then(|s| s.top_url())
            .map(str::to_string);
        let entry = LogEntry::new(
            level,
            text,
            sinks.occurred(ev.timestamp),
            EntryDetail::ConsoleApi {
                api_type: ev.api_type,
                stack,
            },
        )
        .with_optional_url(url);

        if level == LogLevel::Error {
            sinks.log_and_error(entry);
        } else {
            sinks.log(entry);
        }
    }

    fn exception(ev: ExceptionThrown, sinks: &mut EntrySinks<'_>) {
        let details = ev.exception_details;
        let entry = LogEntry::new(
            LogLevel::Error,
            details.message(),
            sinks.occurred(ev.timestamp),
            EntryDetail::Exception {
                line: details.line_number,
                column: details.column_number,
                stack: details.stack_trace.as_ref().and_then(|s| s.render()),
            },
        )
        .with_optional_url(details.url.clone());
        sinks.log_and_error(entry);
    }

    fn request(ev: RequestWillBeSent, sinks: &mut EntrySinks<'_>) {
        let entry = LogEntry::new(
            LogLevel::Info,
            format!("{} {}", ev.request.method, ev.request.url),
            sinks.now,
            EntryDetail::NetworkRequest(NetworkInfo {
                method: ev.request.method,
                resource_type: ev.resource_type,
                ..Default::default()
            }),
        )
        .with_url(ev.request.url)
        .with_request_id(ev.request_id);

        sinks.network(entry.clone());
        sinks.log(entry);
    }

    fn response(&mut self, ev: ResponseReceived, sinks: &mut EntrySinks<'_>) -> Option<RouterAction> {
        let status = ev.response.status;
        let level = LogLevel::for_status(status);
        let request_id = ev.request_id;
        let url = ev.response.url;
        let status_text = ev.response.status_text;
        let mime_type = ev.response.mime_type;
        let resource_type = ev.resource_type;

        let merge = |old: &LogEntry| {
            let previous = old.detail.network_info().cloned().unwrap_or_default();
            let info = NetworkInfo {
                status: Some(status),
                status_text: Some(status_text.clone()),
                mime_type: mime_type.clone(),
                resource_type: previous.resource_type.clone().or(resource_type.clone()),
                ..previous
            };
            let mut merged = LogEntry::new(
                level,
                format!("{} {} -> {} {}", info.method, url, status, status_text)
                    .trim_end()
                    .to_string(),
                old.timestamp,
                EntryDetail::NetworkResponse(info),
            )
            .with_url(url.clone());
            merged.request_id = old.request_id.clone();
            merged
        };

        let method = match sinks.find_network(&request_id) {
            Some(request) => {
                let method = request
                    .detail
                    .network_info()
                    .map(|i| i.method.clone())
                    .unwrap_or_default();
                sinks.replace_network(&request_id, merge);
                method
            }
            None => {
                debug!("Response for unknown request {} ({})", request_id, url);
                let entry = LogEntry::new(
                    level,
                    format!("{} -> {} {}", url, status, status_text)
                        .trim_end()
                        .to_string(),
                    sinks.now,
                    EntryDetail::NetworkResponse(NetworkInfo {
                        method: String::new(),
                        resource_type: resource_type.clone(),
                        status: Some(status),
                        status_text: Some(status_text.clone()),
                        mime_type: mime_type.clone(),
                        encoded_data_length: None,
                    }),
                )
                .with_url(url.clone())
                .with_request_id(request_id.clone());
                sinks.network(entry.clone());
                sinks.log(entry);
                String::new()
            }
        };

        if status < 400 {
            return None;
        }

        if self.recent.is_duplicate(sinks.key, &url, status, sinks.now) {
            debug!(
                "Suppressing duplicate HTTP {} for {} in {}",
                status, url, sinks.key
            );
            return None;
        }

        Some(RouterAction::FetchBody(PendingHttpError {
            session_key: sinks.key.to_string(),
            request_id,
            url,
            method: if method.is_empty() {
                "GET".to_string()
            } else {
                method
            },
            status,
            status_text,
            timestamp: sinks.now,
        }))
    }

    fn loading_failed(ev: LoadingFailed, sinks: &mut EntrySinks<'_>) {
        let canceled = ev.canceled.unwrap_or(false);
        let request = sinks.find_network(&ev.request_id);
        let url = request.as_ref().and_then(|r| r.url.clone());
        let method = request
            .as_ref()
            .and_then(|r| r.detail.network_info())
            .map(|i| i.method.clone());

        let target = url.as_deref().unwrap_or("<unknown url>");
        let detail = EntryDetail::NetworkFailed {
            method: method.clone(),
            error_text: ev.error_text.clone(),
            canceled,
        };

        let raw = LogEntry::new(
            if canceled {
                LogLevel::Info
            } else {
                LogLevel::Error
            },
            format!("{} {}", target, ev.error_text),
            sinks.now,
            detail.clone(),
        )
        .with_optional_url(url.clone())
        .with_request_id(ev.request_id.clone());
        sinks.network(raw);

        if canceled {
            return;
        }

        let error = LogEntry::new(
            LogLevel::Error,
            format!(
                "Network request failed: {} {} ({})",
                method.as_deref().unwrap_or("GET"),
                target,
                ev.error_text
            ),
            sinks.now,
            detail,
        )
        .with_optional_url(url)
        .with_request_id(ev.request_id);
        sinks.log_and_error(error);
    }

    fn loading_finished(ev: LoadingFinished, sinks: &mut EntrySinks<'_>) {
        let bytes = ev.encoded_data_length;
        let updated = sinks.replace_network(&ev.request_id, |old| {
            let mut merged = old.clone();
            merged.detail = match &old.detail {
                EntryDetail::NetworkRequest(info) => EntryDetail::NetworkFinished(NetworkInfo {
                    encoded_data_length: Some(bytes),
                    ..info.clone()
                }),
                EntryDetail::NetworkResponse(info) => EntryDetail::NetworkResponse(NetworkInfo {
                    encoded_data_length: Some(bytes),
                    ..info.clone()
                }),
                EntryDetail::NetworkFinished(info) => EntryDetail::NetworkFinished(NetworkInfo {
                    encoded_data_length: Some(bytes),
                    ..info.clone()
                }),
                other => other.clone(),
            };
            merged
        });
        if !updated {
            debug!("loadingFinished for unknown request {}", ev.request_id);
        }
    }

    /// Records the outcome of a body fetch for an HTTP error and returns the
    /// summary handed to notification and triage.
    pub fn complete_http_error(
        pending: PendingHttpError,
        body: Result<String, CaptureError>,
        sinks: &mut EntrySinks<'_>,
    ) -> HttpErrorSummary {
        let headline = pending.headline();
        match body {
            Ok(body) => {
                let entry = LogEntry::new(
                    LogLevel::Error,
                    headline,
                    pending.timestamp,
                    EntryDetail::HttpErrorWithBody {
                        method: pending.method.clone(),
                        status: pending.status,
                        status_text: pending.status_text.clone(),
                        response_body: body.clone(),
                    },
                )
                .with_url(pending.url.clone())
                .with_request_id(pending.request_id.clone());
                sinks.log_and_error(entry);
                pending.into_summary(Some(body))
            }
            Err(e) => {
                let note = if e.is_target_gone() {
                    format!("{} (target gone)", BODY_UNAVAILABLE_NOTE)
                } else {
                    format!("{} ({})", BODY_UNAVAILABLE_NOTE, e)
                };
                debug!("Body fetch for {} failed: {}", pending.url, e);
                let entry = LogEntry::new(
                    LogLevel::Error,
                    headline,
                    pending.timestamp,
                    EntryDetail::HttpError {
                        method: pending.method.clone(),
                        status: pending.status,
                        status_text: pending.status_text.clone(),
                        note: Some(note),
                    },
                )
                .with_url(pending.url.clone())
                .with_request_id(pending.request_id.clone());
                sinks.log_and_error(entry);
                pending.into_summary(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buglens_common::protocol::methods;
    use chrono::TimeZone;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn event(method: &str, params: serde_json::Value) -> ProtocolEvent {
        ProtocolEvent::from_cdp(method, params).unwrap().unwrap()
    }

    struct Fixture {
        router: EventRouter,
        session: Session,
        persistent: PersistentLogStore,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                router: EventRouter::new(Duration::seconds(5)),
                session: Session::new("t1", 200, t0()),
                persistent: PersistentLogStore::new(500, Duration::minutes(15), Duration::hours(2)),
            }
        }

        fn route(&mut self, ev: ProtocolEvent, now: DateTime<Utc>) -> Option<RouterAction> {
            let mut sinks = EntrySinks::new("t1", Some(&mut self.session), &mut self.persistent, now);
            self.router.route(ev, &mut sinks)
        }
    }

    fn request_event(id: &str, url: &str) -> ProtocolEvent {
        event(
            methods::REQUEST_WILL_BE_SENT,
            json!({
                "requestId": id,
                "request": { "url": url, "method": "POST", "headers": {} },
                "type": "Fetch"
            }),
        )
    }

    fn response_event(id: &str, url: &str, status: u16) -> ProtocolEvent {
        event(
            methods::RESPONSE_RECEIVED,
            json!({
                "requestId": id,
                "type": "Fetch",
                "response": { "url": url, "status": status, "statusText": "Err", "mimeType": "application/json" }
            }),
        )
    }

    #[test]
    fn console_assert_is_promoted_to_error() {
        let mut fx = Fixture::new();
        let action = fx.route(
            event(
                methods::CONSOLE_API_CALLED,
                json!({ "type": "assert", "args": [{ "type": "string", "value": "Assertion failed" }] }),
            ),
            t0(),
        );
        assert!(action.is_none());
        assert_eq!(fx.session.logs.len(), 1);
        assert_eq!(fx.session.errors.len(), 1);
        assert!(fx.session.errors.iter().all(|e| e.kind() == "console-api" && e.is_error()));
    }

    #[test]
    fn plain_console_log_is_not_an_error() {
        let mut fx = Fixture::new();
        fx.route(
            event(
                methods::CONSOLE_MESSAGE_ADDED,
                json!({ "message": { "source": "console-api", "level": "log", "text": "hello" } }),
            ),
            t0(),
        );
        assert_eq!(fx.session.logs.len(), 1);
        assert!(fx.session.errors.is_empty());
    }

    #[test]
    fn exceptions_go_to_logs_and_errors() {
        let mut fx = Fixture::new();
        fx.route(
            event(
                methods::EXCEPTION_THROWN,
                json!({ "timestamp": 1714564800000.0, "exceptionDetails": {
                    "exceptionId": 1, "text": "Uncaught", "lineNumber": 4, "columnNumber": 2,
                    "url": "https://x/app.js",
                    "exception": { "type": "object", "subtype": "error", "description": "TypeError: boom" }
                }}),
            ),
            t0(),
        );
        let error = fx.session.errors.iter().next().unwrap();
        assert_eq!(error.text, "TypeError: boom");
        assert_eq!(error.kind(), "exception");
        assert_eq!(fx.persistent.recent_errors("t1", 5).len(), 1);
    }

    #[test]
    fn request_lands_in_both_lists_and_response_merges_in_place() {
        let mut fx = Fixture::new();
        fx.route(request_event("r1", "https://x/ok"), t0());
        assert_eq!(fx.session.network_requests.len(), 1);
        assert_eq!(fx.session.logs.len(), 1);

        let action = fx.route(response_event("r1", "https://x/ok", 200), t0() + Duration::seconds(1));
        assert!(action.is_none());
        assert_eq!(fx.session.network_requests.len(), 1);
        assert_eq!(fx.session.logs.len(), 1);

        let merged = fx.session.network_requests.find_network("r1").unwrap();
        assert_eq!(merged.kind(), "network-response");
        assert_eq!(merged.level, LogLevel::Info);
        let info = merged.detail.network_info().unwrap();
        assert_eq!(info.method, "POST");
        assert_eq!(info.status, Some(200));
        assert_eq!(merged.timestamp, t0());
    }

    #[test]
    fn error_response_requests_body_fetch_once_per_window() {
        let mut fx = Fixture::new();
        fx.route(request_event("r1", "https://x/a"), t0());
        let first = fx.route(response_event("r1", "https://x/a", 500), t0());
        match first {
            Some(RouterAction::FetchBody(pending)) => {
                assert_eq!(pending.method, "POST");
                assert_eq!(pending.status, 500);
            }
            other => panic!("expected body fetch, got {:?}", other),
        }
        assert!(fx.session.network_requests.find_network("r1").unwrap().is_error());

        fx.route(request_event("r2", "https://x/a"), t0() + Duration::seconds(3));
        let second = fx.route(response_event("r2", "https://x/a", 500), t0() + Duration::seconds(3));
        assert!(second.is_none());

        fx.route(request_event("r3", "https://x/a"), t0() + Duration::seconds(9));
        let third = fx.route(response_event("r3", "https://x/a", 500), t0() + Duration::seconds(9));
        assert!(matches!(third, Some(RouterAction::FetchBody(_))));
    }

    #[test]
    fn failed_load_adds_error_entry_unless_canceled() {
        let mut fx = Fixture::new();
        fx.route(request_event("r1", "https://x/a"), t0());
        fx.route(
            event(
                methods::LOADING_FAILED,
                json!({ "requestId": "r1", "timestamp": 1.0, "type": "Fetch", "errorText": "net::ERR_FAILED" }),
            ),
            t0(),
        );
        assert_eq!(fx.session.errors.len(), 1);
        assert_eq!(fx.session.network_requests.len(), 2);
        let error = fx.session.errors.iter().next().unwrap();
        assert!(error.text.contains("net::ERR_FAILED"));
        assert_eq!(error.url.as_deref(), Some("https://x/a"));

        fx.route(request_event("r2", "https://x/b"), t0());
        fx.route(
            event(
                methods::LOADING_FAILED,
                json!({ "requestId": "r2", "timestamp": 1.0, "type": "Fetch", "errorText": "net::ERR_ABORTED", "canceled": true }),
            ),
            t0(),
        );
        assert_eq!(fx.session.errors.len(), 1);
        let canceled = fx.session.network_requests.iter().last().unwrap();
        assert_eq!(canceled.kind(), "network-failed");
        assert_eq!(canceled.level, LogLevel::Info);
    }

    #[test]
    fn loading_finished_updates_without_new_entries() {
        let mut fx = Fixture::new();
        fx.route(request_event("r1", "https://x/a"), t0());
        fx.route(response_event("r1", "https://x/a", 200), t0());
        fx.route(
            event(
                methods::LOADING_FINISHED,
                json!({ "requestId": "r1", "timestamp": 2.0, "encodedDataLength": 1234.0 }),
            ),
            t0(),
        );
        assert_eq!(fx.session.logs.len(), 1);
        let entry = fx.session.logs.find_network("r1").unwrap();
        assert_eq!(entry.kind(), "network-response");
        assert_eq!(entry.detail.network_info().unwrap().encoded_data_length, Some(1234.0));
    }

    #[test]
    fn basic_entry_notes_missing_body() {
        let mut fx = Fixture::new();
        let pending = PendingHttpError {
            session_key: "t1".into(),
            request_id: "r1".into(),
            url: "https://x/a".into(),
            method: "GET".into(),
            status: 503,
            status_text: "Service Unavailable".into(),
            timestamp: t0(),
        };
        let mut sinks = EntrySinks::new("t1", Some(&mut fx.session), &mut fx.persistent, t0());
        let summary = EventRouter::complete_http_error(
            pending,
            Err(CaptureError::TargetGone("t1".into())),
            &mut sinks,
        );
        assert!(summary.response_body.is_none());
        let entry = fx.session.errors.iter().next().unwrap();
        match &entry.detail {
            EntryDetail::HttpError { note: Some(note), .. } => {
                assert!(note.starts_with(BODY_UNAVAILABLE_NOTE));
            }
            other => panic!("expected basic http error, got {:?}", other),
        }
        assert_eq!(fx.session.logs.len(), 1);
    }

    #[test]
    fn browser_log_errors_are_captured() {
        let mut fx = Fixture::new();
        let at = t0() - Duration::seconds(2);
        let action = fx.route(
            event(
                methods::LOG_ENTRY_ADDED,
                json!({ "entry": {
                    "source": "security", "level": "error",
                    "text": "Refused to load the script because it violates the Content Security Policy",
                    "timestamp": at.timestamp_millis() as f64,
                    "url": "https://shop.example/cart"
                }}),
            ),
            t0(),
        );
        assert!(action.is_none());
        assert_eq!(fx.session.logs.len(), 1);
        let error = fx.session.errors.iter().next().unwrap();
        assert_eq!(error.kind(), "console");
        assert_eq!(error.url.as_deref(), Some("https://shop.example/cart"));
        assert_eq!(error.timestamp, at);
        assert_eq!(fx.persistent.recent_errors("t1", 5).len(), 1);

        fx.route(
            event(
                methods::LOG_ENTRY_ADDED,
                json!({ "entry": { "source": "intervention", "level": "verbose", "text": "Slow network is detected" } }),
            ),
            t0(),
        );
        assert_eq!(fx.session.logs.len(), 2);
        assert_eq!(fx.session.errors.len(), 1);
    }

    #[test]
    fn console_and_exception_entries_keep_page_time() {
        let mut fx = Fixture::new();
        let thrown = t0() - Duration::milliseconds(1500);
        fx.route(
            event(
                methods::EXCEPTION_THROWN,
                json!({ "timestamp": thrown.timestamp_millis() as f64, "exceptionDetails": {
                    "exceptionId": 1, "text": "Uncaught", "url": "https://x/app.js"
                }}),
            ),
            t0(),
        );
        fx.route(
            event(
                methods::CONSOLE_API_CALLED,
                json!({ "type": "log", "args": [{ "type": "string", "value": "untimed" }] }),
            ),
            t0(),
        );
        let stamps: Vec<_> = fx.session.logs.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![thrown, t0()]);
    }

    #[test]
    fn detach_event_routes_nothing() {
        let mut fx = Fixture::new();
        let action = fx.route(
            event(methods::DETACHED, json!({ "reason": "target_closed" })),
            t0(),
        );
        assert!(action.is_none());
        assert!(fx.session.logs.is_empty());
    }
}
