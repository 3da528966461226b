use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// The structured fields of a captured HTTP failure handed to triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpErrorSummary {
    pub session_key: String,
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub status: u16,
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HttpErrorSummary {
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }

    /// First `max_chars` characters of the body, if one was captured.
    pub fn body_snippet(&self, max_chars: usize) -> Option<String> {
        self.response_body
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .map(|b| truncate_chars(b, max_chars))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportSource {
    /// Generated by the upstream model.
    Ai { model: String },
    /// Built deterministically from the error fields.
    Basic { reason: String },
    /// The model answered but the answer could not be used.
    ParseFallback { model: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BugReport {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub steps_to_reproduce: Vec<String>,
    #[serde(default)]
    pub expected_behavior: String,
    #[serde(default)]
    pub actual_behavior: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    pub source: ReportSource,
    pub error: HttpErrorSummary,
    pub created_at: DateTime<Utc>,
}

impl BugReport {
    pub fn is_ai_generated(&self) -> bool {
        matches!(self.source, ReportSource::Ai { .. })
    }
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary(url: &str, body: Option<&str>) -> HttpErrorSummary {
        HttpErrorSummary {
            session_key: "t1".into(),
            request_id: "r1".into(),
            url: url.into(),
            method: "GET".into(),
            status: 500,
            status_text: "Internal Server Error".into(),
            response_body: body.map(str::to_string),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn host_is_lowercased() {
        assert_eq!(
            summary("https://API.Example.com/v1", None).host().as_deref(),
            Some("api.example.com")
        );
        assert_eq!(summary("not a url", None).host(), None);
    }

    #[test]
    fn body_snippet_respects_char_boundaries() {
        let s = summary("https://x/a", Some("héllo wörld"));
        assert_eq!(s.body_snippet(4).as_deref(), Some("héll"));
        assert_eq!(summary("https://x/a", Some("   ")).body_snippet(10), None);
    }
}
