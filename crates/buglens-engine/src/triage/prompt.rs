use super::context::TriageContext;
use buglens_common::formatter::format_entry;
use buglens_common::report::HttpErrorSummary;

const PROMPT_BODY_CHARS: usize = 2000;

/// Builds the instruction sent upstream. The model is asked for a single JSON
/// object; the parser tolerates deviations.
pub fn build_prompt(error: &HttpErrorSummary, context: &TriageContext) -> String {
    let mut prompt = String::from(
        "You are a QA engineer. Analyze the failed HTTP request below and write a bug report.\n\
         Respond with exactly one JSON object with the keys: title, description, \
         stepsToReproduce (array of strings), expectedBehavior, actualBehavior, \
         severity (critical|high|medium|low), suggestedFix.\n\n",
    );

    prompt.push_str("## Failed request\n");
    prompt.push_str(&format!("Method: {}\n", error.method));
    prompt.push_str(&format!("URL: {}\n", error.url));
    prompt.push_str(&format!("Status: {} {}\n", error.status, error.status_text));
    prompt.push_str(&format!("Time: {}\n", error.timestamp.to_rfc3339()));
    match error.body_snippet(PROMPT_BODY_CHARS) {
        Some(body) => prompt.push_str(&format!("Response body:\n{}\n", body)),
        None => prompt.push_str("Response body: unavailable\n"),
    }

    if context.page_title.is_some() || context.page_url.is_some() || context.user_agent.is_some() {
        prompt.push_str("\n## Page\n");
        if let Some(title) = &context.page_title {
            prompt.push_str(&format!("Title: {}\n", title));
        }
        if let Some(url) = &context.page_url {
            prompt.push_str(&format!("URL: {}\n", url));
        }
        if let Some(agent) = &context.user_agent {
            prompt.push_str(&format!("User agent: {}\n", agent));
        }
    }

    if !context.recent_errors.is_empty() {
        prompt.push_str("\n## Recent errors on the page\n");
        for entry in &context.recent_errors {
            prompt.push_str(&format_entry(entry));
            prompt.push('\n');
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use buglens_common::log::{EntryDetail, LogEntry, LogLevel};
    use chrono::{TimeZone, Utc};

    fn error(body: Option<&str>) -> HttpErrorSummary {
        HttpErrorSummary {
            session_key: "t1".into(),
            request_id: "r1".into(),
            url: "https://shop.example/api/cart".into(),
            method: "POST".into(),
            status: 500,
            status_text: "Internal Server Error".into(),
            response_body: body.map(str::to_string),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn includes_request_and_context() {
        let context = TriageContext {
            page_title: Some("Cart".into()),
            page_url: Some("https://shop.example/cart".into()),
            user_agent: None,
            recent_errors: vec![LogEntry::new(
                LogLevel::Error,
                "TypeError: total is undefined",
                Utc.with_ymd_and_hms(2024, 5, 1, 11, 59, 0).unwrap(),
                EntryDetail::Exception {
                    line: None,
                    column: None,
                    stack: None,
                },
            )],
        };
        let prompt = build_prompt(&error(Some("{\"error\":\"db down\"}")), &context);
        assert!(prompt.contains("POST"));
        assert!(prompt.contains("Status: 500 Internal Server Error"));
        assert!(prompt.contains("db down"));
        assert!(prompt.contains("Title: Cart"));
        assert!(prompt.contains("TypeError: total is undefined"));
        assert!(!prompt.contains("User agent"));
    }

    #[test]
    fn notes_missing_body() {
        let prompt = build_prompt(&error(None), &TriageContext::default());
        assert!(prompt.contains("Response body: unavailable"));
        assert!(!prompt.contains("## Page"));
    }
}
