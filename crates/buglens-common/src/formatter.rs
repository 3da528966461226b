use crate::log::{EntryDetail, LogEntry};
use crate::report::{BugReport, ReportSource, truncate_chars};

const MAX_BODY_PREVIEW: usize = 160;

pub fn format_entry(entry: &LogEntry) -> String {
    let mut output = format!(
        "{} [{}] {:<20} {}",
        entry.timestamp.format("%H:%M:%S%.3f"),
        entry.level.as_str(),
        entry.kind(),
        entry.text
    );

    match &entry.detail {
        EntryDetail::HttpError {
            note: Some(note), ..
        } => {
            output.push_str(&format!(" ({})", note));
        }
        EntryDetail::HttpErrorWithBody { response_body, .. } => {
            let preview = truncate_chars(response_body.trim(), MAX_BODY_PREVIEW);
            if !preview.is_empty() {
                output.push_str(&format!("\n    body: {}", preview.replace('\n', " ")));
            }
        }
        EntryDetail::NetworkResponse(info) | EntryDetail::NetworkFinished(info) => {
            if let Some(len) = info.encoded_data_length {
                output.push_str(&format!(" ({:.0} bytes)", len));
            }
        }
        EntryDetail::Exception {
            stack: Some(stack), ..
        } => {
            output.push('\n');
            output.push_str(stack);
        }
        _ => {}
    }

    output
}

pub fn format_report(report: &BugReport) -> String {
    let source = match &report.source {
        ReportSource::Ai { model } => format!("ai:{}", model),
        ReportSource::Basic { reason } => format!("basic ({})", reason),
        ReportSource::ParseFallback { model } => format!("unparsed:{}", model),
    };

    let mut output = format!(
        "== {} [{}] ==\n{} {} -> {} {}\nsource: {}\n\n{}\n",
        report.title,
        if report.severity.is_empty() {
            "unrated"
        } else {
            report.severity.as_str()
        },
        report.error.method,
        report.error.url,
        report.error.status,
        report.error.status_text,
        source,
        report.description
    );

    if !report.steps_to_reproduce.is_empty() {
        output.push_str("\nSteps to reproduce:\n");
        for (i, step) in report.steps_to_reproduce.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, step));
        }
    }
    if !report.expected_behavior.is_empty() {
        output.push_str(&format!("\nExpected: {}\n", report.expected_behavior));
    }
    if !report.actual_behavior.is_empty() {
        output.push_str(&format!("Actual: {}\n", report.actual_behavior));
    }
    if let Some(fix) = &report.suggested_fix {
        output.push_str(&format!("\nSuggested fix: {}\n", fix));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogLevel;
    use crate::report::HttpErrorSummary;
    use chrono::{TimeZone, Utc};

    #[test]
    fn basic_http_error_shows_note() {
        let entry = LogEntry::new(
            LogLevel::Error,
            "GET https://x/a -> 503",
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            EntryDetail::HttpError {
                method: "GET".into(),
                status: 503,
                status_text: "Service Unavailable".into(),
                note: Some("Response body unavailable".into()),
            },
        );
        let line = format_entry(&entry);
        assert!(line.starts_with("12:00:00.000 [error] http-error"));
        assert!(line.ends_with("(Response body unavailable)"));
    }

    #[test]
    fn report_lists_steps() {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let report = BugReport {
            title: "Checkout fails".into(),
            description: "The cart endpoint returns 500".into(),
            steps_to_reproduce: vec!["Open cart".into(), "Press pay".into()],
            expected_behavior: "Payment succeeds".into(),
            actual_behavior: "Error banner".into(),
            severity: "high".into(),
            suggested_fix: None,
            source: ReportSource::Ai {
                model: "m1".into(),
            },
            error: HttpErrorSummary {
                session_key: "t1".into(),
                request_id: "r1".into(),
                url: "https://shop/cart".into(),
                method: "POST".into(),
                status: 500,
                status_text: "Internal Server Error".into(),
                response_body: None,
                timestamp: created_at,
            },
            created_at,
        };
        let text = format_report(&report);
        assert!(text.contains("== Checkout fails [high] =="));
        assert!(text.contains("  2. Press pay"));
        assert!(text.contains("source: ai:m1"));
    }
}
