use crate::backend::{DebuggerBackend, evaluate};
use crate::store::{SharedPersistentStore, persistent};
use async_trait::async_trait;
use buglens_common::error::CaptureError;
use buglens_common::log::LogEntry;
use buglens_common::report::HttpErrorSummary;
use serde::Deserialize;
use std::sync::Arc;

const PAGE_INFO_EXPRESSION: &str =
    "({ title: document.title, url: location.href, userAgent: navigator.userAgent })";

/// What the prompt knows about the page beyond the failing request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriageContext {
    pub page_title: Option<String>,
    pub page_url: Option<String>,
    pub user_agent: Option<String>,
    pub recent_errors: Vec<LogEntry>,
}

#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Gathers context for `error`. `TargetGone` means the originating target
    /// vanished and triage must be abandoned.
    async fn collect(&self, error: &HttpErrorSummary) -> Result<TriageContext, CaptureError>;
}

/// Context source with nothing to add.
pub struct EmptyContext;

#[async_trait]
impl ContextSource for EmptyContext {
    async fn collect(&self, _error: &HttpErrorSummary) -> Result<TriageContext, CaptureError> {
        Ok(TriageContext::default())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    title: Option<String>,
    url: Option<String>,
    user_agent: Option<String>,
}

/// Reads page details from the live target and recent errors from the
/// persistent record.
pub struct PageContextSource {
    backend: Arc<dyn DebuggerBackend>,
    persistent: SharedPersistentStore,
    max_entries: usize,
}

impl PageContextSource {
    pub fn new(
        backend: Arc<dyn DebuggerBackend>,
        persistent: SharedPersistentStore,
        max_entries: usize,
    ) -> Self {
        Self {
            backend,
            persistent,
            max_entries,
        }
    }
}

#[async_trait]
impl ContextSource for PageContextSource {
    async fn collect(&self, error: &HttpErrorSummary) -> Result<TriageContext, CaptureError> {
        let target = error.session_key.as_str();
        if !self.backend.target_exists(target).await {
            return Err(CaptureError::TargetGone(target.to_string()));
        }

        let page = match evaluate(self.backend.as_ref(), target, PAGE_INFO_EXPRESSION).await {
            Ok(value) => serde_json::from_value::<PageInfo>(value).unwrap_or_default(),
            Err(e) if e.is_target_gone() => return Err(e),
            Err(e) => {
                tracing::debug!("Page info unavailable for {}: {}", target, e);
                PageInfo::default()
            }
        };

        // The target may have closed while the evaluation was in flight.
        if !self.backend.target_exists(target).await {
            return Err(CaptureError::TargetGone(target.to_string()));
        }

        let recent_errors = persistent::lock(&self.persistent).recent_errors(target, self.max_entries);
        Ok(TriageContext {
            page_title: page.title.filter(|t| !t.is_empty()),
            page_url: page.url,
            user_agent: page.user_agent,
            recent_errors,
        })
    }
}
