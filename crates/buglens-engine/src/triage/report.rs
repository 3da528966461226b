use super::parse::ParsedReport;
use buglens_common::report::{BugReport, HttpErrorSummary, ReportSource, truncate_chars};
use chrono::{DateTime, Utc};

const SNIPPET_CHARS: usize = 300;
const RAW_RESPONSE_CHARS: usize = 500;

fn severity_for(status: u16) -> &'static str {
    match status {
        500.. => "high",
        401 | 403 => "high",
        _ => "medium",
    }
}

fn path_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Deterministic report built only from the error's own fields.
pub fn basic_report(error: &HttpErrorSummary, reason: &str, now: DateTime<Utc>) -> BugReport {
    let mut description = format!(
        "{} {} failed with HTTP {} {}.",
        error.method, error.url, error.status, error.status_text
    );
    if let Some(snippet) = error.body_snippet(SNIPPET_CHARS) {
        description.push_str(&format!("\n\nResponse snippet:\n{}", snippet));
    }

    BugReport {
        title: format!(
            "HTTP {} on {} {}",
            error.status,
            error.method,
            path_of(&error.url)
        ),
        description,
        steps_to_reproduce: vec![
            "Open the page that issues this request".to_string(),
            format!("Trigger the {} request to {}", error.method, error.url),
            format!("Observe the HTTP {} response", error.status),
        ],
        expected_behavior: "The request completes successfully".to_string(),
        actual_behavior: format!("The server answered {} {}", error.status, error.status_text)
            .trim_end()
            .to_string(),
        severity: severity_for(error.status).to_string(),
        suggested_fix: None,
        source: ReportSource::Basic {
            reason: reason.to_string(),
        },
        error: error.clone(),
        created_at: now,
    }
}

/// Report used when the model answered with something unusable; carries the
/// raw answer, truncated.
pub fn parse_fallback_report(
    error: &HttpErrorSummary,
    model: &str,
    raw: &str,
    now: DateTime<Utc>,
) -> BugReport {
    let mut report = basic_report(error, "parse_failure", now);
    report.description.push_str(&format!(
        "\n\nModel response could not be parsed:\n{}",
        truncate_chars(raw.trim(), RAW_RESPONSE_CHARS)
    ));
    report.source = ReportSource::ParseFallback {
        model: model.to_string(),
    };
    report
}

pub fn ai_report(
    error: &HttpErrorSummary,
    model: &str,
    parsed: ParsedReport,
    now: DateTime<Utc>,
) -> BugReport {
    BugReport {
        title: parsed.title,
        description: parsed.description,
        steps_to_reproduce: parsed.steps_to_reproduce,
        expected_behavior: parsed.expected_behavior,
        actual_behavior: parsed.actual_behavior,
        severity: parsed.severity,
        suggested_fix: parsed.suggested_fix,
        source: ReportSource::Ai {
            model: model.to_string(),
        },
        error: error.clone(),
        created_at: now,
    }
}
