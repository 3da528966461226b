//! Turns captured HTTP errors into bug reports.
//!
//! Eligibility gates run in a fixed order (enabled, domain, status,
//! fingerprint, pause, rate limit) before any upstream call. Every qualifying
//! error ends in some report: the model's answer when it can be used, a
//! deterministic one built from the error fields otherwise.

pub mod client;
pub mod context;
pub mod limiter;
pub mod parse;
pub mod pipeline;
pub mod prompt;
pub mod report;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use client::{
    GeminiClient, Generated, GenerationClient, GenerationError, GenerationRequest, RetryPolicy,
    RetryingGenerator,
};
pub use context::{ContextSource, PageContextSource, TriageContext};
pub use limiter::{PauseState, RateLimiter};
pub use parse::{MISSING_SENTINEL, ParsedReport, parse_report};
pub use pipeline::{TriageOutcome, TriagePipeline};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TriageError {
    #[error("AI triage is disabled")]
    Disabled,
    #[error("Local rate limit reached")]
    RateLimited,
    #[error("AI triage paused until {0}")]
    Paused(DateTime<Utc>),
    #[error("Upstream unavailable ({}): {message}", status_label(.status))]
    UpstreamTransient { status: Option<u16>, message: String },
    #[error("Upstream rejected the request (HTTP {status}): {message}")]
    UpstreamPermanent { status: u16, message: String },
    #[error("Unusable model response: {0}")]
    ParseFailure(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {}", code),
        None => "transport".to_string(),
    }
}

impl TriageError {
    /// Short machine-readable reason recorded on fallback reports.
    pub fn reason_code(&self) -> &'static str {
        match self {
            TriageError::Disabled => "disabled",
            TriageError::RateLimited => "rate_limited",
            TriageError::Paused(_) => "paused",
            TriageError::UpstreamTransient { .. } => "upstream_transient",
            TriageError::UpstreamPermanent { .. } => "upstream_permanent",
            TriageError::ParseFailure(_) => "parse_failure",
            TriageError::Storage(_) => "storage",
        }
    }
}

impl From<crate::store::StorageError> for TriageError {
    fn from(err: crate::store::StorageError) -> Self {
        TriageError::Storage(err.to_string())
    }
}
