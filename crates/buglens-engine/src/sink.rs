use crate::store::kv::{KvStore, REPORTS_KEY, StorageError, UNREAD_REPORTS_KEY, get_typed, set_typed};
use crate::triage::{TriageOutcome, TriagePipeline};
use async_trait::async_trait;
use buglens_common::report::{BugReport, HttpErrorSummary};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MAX_STORED_REPORTS: usize = 50;

/// Receives captured errors and finished reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Fired for every HTTP error that survived short-window dedup.
    async fn error_captured(&self, error: &HttpErrorSummary);
    async fn report_ready(&self, report: &BugReport);
}

/// Logs only.
pub struct TracingReportSink;

#[async_trait]
impl ReportSink for TracingReportSink {
    async fn error_captured(&self, error: &HttpErrorSummary) {
        info!(
            "HTTP {} {} {} captured in {}",
            error.status, error.method, error.url, error.session_key
        );
    }

    async fn report_ready(&self, report: &BugReport) {
        info!("Report ready: {} ({:?})", report.title, report.source);
    }
}

/// Keeps the most recent reports and an unread counter in the key-value store.
pub struct KvReportSink {
    store: Arc<dyn KvStore>,
    max_reports: usize,
}

impl KvReportSink {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            max_reports: MAX_STORED_REPORTS,
        }
    }

    pub fn with_max_reports(mut self, max_reports: usize) -> Self {
        self.max_reports = max_reports.max(1);
        self
    }

    /// Oldest first.
    pub async fn reports(&self) -> Result<Vec<BugReport>, StorageError> {
        Ok(get_typed(self.store.as_ref(), REPORTS_KEY)
            .await?
            .unwrap_or_default())
    }

    pub async fn unread_count(&self) -> Result<u64, StorageError> {
        Ok(get_typed(self.store.as_ref(), UNREAD_REPORTS_KEY)
            .await?
            .unwrap_or(0))
    }

    pub async fn mark_all_read(&self) -> Result<(), StorageError> {
        set_typed(self.store.as_ref(), UNREAD_REPORTS_KEY, &0u64).await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(REPORTS_KEY).await?;
        self.store.remove(UNREAD_REPORTS_KEY).await
    }

    async fn store_report(&self, report: &BugReport) -> Result<(), StorageError> {
        let mut reports = self.reports().await?;
        reports.push(report.clone());
        if reports.len() > self.max_reports {
            let excess = reports.len() - self.max_reports;
            reports.drain(..excess);
        }
        set_typed(self.store.as_ref(), REPORTS_KEY, &reports).await?;

        let unread = self.unread_count().await?;
        set_typed(self.store.as_ref(), UNREAD_REPORTS_KEY, &(unread + 1)).await
    }
}

#[async_trait]
impl ReportSink for KvReportSink {
    async fn error_captured(&self, error: &HttpErrorSummary) {
        debug!("Captured HTTP {} for {}", error.status, error.url);
    }

    async fn report_ready(&self, report: &BugReport) {
        match self.store_report(report).await {
            Ok(()) => info!("Stored report: {}", report.title),
            Err(e) => warn!("Failed to store report {}: {}", report.title, e),
        }
    }
}

/// What the capture engine calls for every HTTP error it records.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_error(&self, error: HttpErrorSummary);

    /// Periodic housekeeping, driven by the engine's maintenance timer.
    async fn maintain(&self, _now: DateTime<Utc>) {}
}

/// Feeds errors through the triage pipeline and hands results to a sink.
pub struct TriageDispatcher {
    pipeline: Arc<TriagePipeline>,
    sink: Arc<dyn ReportSink>,
}

impl TriageDispatcher {
    pub fn new(pipeline: Arc<TriagePipeline>, sink: Arc<dyn ReportSink>) -> Self {
        Self { pipeline, sink }
    }

    pub async fn dispatch(&self, error: HttpErrorSummary) -> TriageOutcome {
        self.sink.error_captured(&error).await;
        let outcome = self.pipeline.triage(&error).await;
        if let Some(report) = outcome.report() {
            self.sink.report_ready(report).await;
        }
        outcome
    }
}

#[async_trait]
impl ErrorHandler for TriageDispatcher {
    async fn handle_error(&self, error: HttpErrorSummary) {
        let url = error.url.clone();
        match self.dispatch(error).await {
            TriageOutcome::Generated(_) | TriageOutcome::Fallback { .. } => {}
            TriageOutcome::Duplicate { fingerprint } => {
                debug!("No report for {}: duplicate {}", url, fingerprint)
            }
            TriageOutcome::NotEligible { reason } => debug!("No report for {}: {}", url, reason),
            TriageOutcome::Aborted { reason } => debug!("Triage of {} aborted: {}", url, reason),
        }
    }

    async fn maintain(&self, now: DateTime<Utc>) {
        match self.pipeline.sweep_processed(now).await {
            Ok(0) => {}
            Ok(n) => debug!("Swept {} expired fingerprints", n),
            Err(e) => warn!("Fingerprint sweep failed: {}", e),
        }
    }
}
