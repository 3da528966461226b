//! Recovery of a report object from free-form model output.
//!
//! Models wrap JSON in markdown fences, add prose around it, and emit
//! JavaScript-isms like bare `undefined`. Parsing strips all of that before
//! handing the text to `serde_json`, then replaces every remaining
//! null/undefined with a sentinel.

use super::TriageError;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Stand-in for values the model left empty.
pub const MISSING_SENTINEL: &str = "N/A";

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    pub title: String,
    pub description: String,
    pub steps_to_reproduce: Vec<String>,
    pub expected_behavior: String,
    pub actual_behavior: String,
    pub severity: String,
    pub suggested_fix: Option<String>,
}

pub fn parse_report(text: &str) -> Result<ParsedReport, TriageError> {
    let unfenced = strip_code_fences(text);
    let object = extract_json_object(&unfenced)
        .ok_or_else(|| TriageError::ParseFailure("no JSON object in response".to_string()))?;
    let repaired = replace_undefined(object);
    let value: Value = serde_json::from_str(&repaired)
        .map_err(|e| TriageError::ParseFailure(format!("invalid JSON: {}", e)))?;
    let Value::Object(fields) = sanitize(value) else {
        return Err(TriageError::ParseFailure("top-level value is not an object".to_string()));
    };

    let title = required_text(&fields, &["title"])?;
    let description = required_text(&fields, &["description", "summary"])?;

    Ok(ParsedReport {
        title,
        description,
        steps_to_reproduce: steps(&fields),
        expected_behavior: optional_text(&fields, &["expectedBehavior", "expected_behavior", "expected"])
            .unwrap_or_else(|| MISSING_SENTINEL.to_string()),
        actual_behavior: optional_text(&fields, &["actualBehavior", "actual_behavior", "actual"])
            .unwrap_or_else(|| MISSING_SENTINEL.to_string()),
        severity: optional_text(&fields, &["severity", "priority"])
            .map(|s| normalize_severity(&s))
            .unwrap_or_else(|| "medium".to_string()),
        suggested_fix: optional_text(&fields, &["suggestedFix", "suggested_fix", "fix"]),
    })
}

/// Returns the body of the first markdown code fence, or the trimmed text
/// when there is none. An unterminated fence runs to the end of the text.
pub fn strip_code_fences(text: &str) -> String {
    static FENCE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)(?:```|\z)").unwrap());
    let trimmed = text.trim();
    match FENCE_RE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// First balanced `{ ... }` substring. Braces inside string literals do not
/// count.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Rewrites bare `undefined` tokens outside string literals as the quoted
/// sentinel so the text becomes valid JSON.
pub fn replace_undefined(json: &str) -> String {
    const TOKEN: &str = "undefined";
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = json;

    while let Some(ch) = rest.chars().next() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(ch);
            rest = &rest[ch.len_utf8()..];
            continue;
        }

        if ch == '"' {
            in_string = true;
        } else if rest.starts_with(TOKEN) && is_token_boundary(&out, &rest[TOKEN.len()..]) {
            out.push('"');
            out.push_str(MISSING_SENTINEL);
            out.push('"');
            rest = &rest[TOKEN.len()..];
            continue;
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    out
}

fn is_token_boundary(before: &str, after: &str) -> bool {
    let ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    !before.chars().next_back().is_some_and(ident) && !after.chars().next().is_some_and(ident)
}

/// Replaces null (and the strings "undefined"/"null") with the sentinel at
/// every depth. Null array elements are dropped.
pub fn sanitize(value: Value) -> Value {
    match value {
        Value::Null => Value::String(MISSING_SENTINEL.to_string()),
        Value::String(s) if is_missing_literal(&s) => Value::String(MISSING_SENTINEL.to_string()),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(sanitize)
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, sanitize(v)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

fn is_missing_literal(s: &str) -> bool {
    matches!(s.trim(), "undefined" | "null")
}

fn text_of(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    };
    text.filter(|s| !s.is_empty() && s != MISSING_SENTINEL)
}

fn optional_text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| fields.get(*k).and_then(text_of))
}

fn required_text(fields: &Map<String, Value>, keys: &[&str]) -> Result<String, TriageError> {
    optional_text(fields, keys)
        .ok_or_else(|| TriageError::ParseFailure(format!("missing required field `{}`", keys[0])))
}

fn steps(fields: &Map<String, Value>) -> Vec<String> {
    let raw = ["stepsToReproduce", "steps_to_reproduce", "steps"]
        .iter()
        .find_map(|k| fields.get(*k));
    match raw {
        Some(Value::Array(items)) => items.iter().filter_map(text_of).collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(|l| l.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')'))
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != MISSING_SENTINEL)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn normalize_severity(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    match lower.as_str() {
        "critical" | "blocker" | "highest" => "critical".to_string(),
        "high" | "major" => "high".to_string(),
        "low" | "minor" | "trivial" | "lowest" => "low".to_string(),
        _ => "medium".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fenced_object_with_prose() {
        let text = "Here is the report:\n```json\n{\"title\": \"Checkout fails\", \"description\": \"POST /cart returns 500\", \"stepsToReproduce\": [\"Open cart\", \"Click pay\"], \"severity\": \"High\"}\n```\nThanks!";
        let report = parse_report(text).unwrap();
        assert_eq!(report.title, "Checkout fails");
        assert_eq!(report.steps_to_reproduce, vec!["Open cart", "Click pay"]);
        assert_eq!(report.severity, "high");
        assert_eq!(report.expected_behavior, MISSING_SENTINEL);
        assert!(report.suggested_fix.is_none());
    }

    #[test]
    fn fences_are_optional_and_may_be_unterminated() {
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\n{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```JSON {\"a\": 1}```"), "{\"a\": 1}");
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let text = r#"noise {"title": "a } b", "description": "uses \"{\" too"} trailing }"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"title": "a } b", "description": "uses \"{\" too"}"#)
        );
    }

    #[test]
    fn bare_undefined_becomes_sentinel() {
        let repaired = replace_undefined(r#"{"a": undefined, "b": "undefined here", "c": [undefined], "undefinedKey": 1}"#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], "N/A");
        assert_eq!(value["b"], "undefined here");
        assert_eq!(value["c"][0], "N/A");
        assert_eq!(value["undefinedKey"], 1);
    }

    #[test]
    fn sanitize_walks_nested_values() {
        let value = sanitize(json!({
            "a": null,
            "b": { "c": "undefined", "d": [null, "x", { "e": null }] }
        }));
        assert_eq!(
            value,
            json!({ "a": "N/A", "b": { "c": "N/A", "d": ["x", { "e": "N/A" }] } })
        );
    }

    #[test]
    fn missing_description_is_parse_failure() {
        let err = parse_report(r#"{"title": "t", "description": null}"#).unwrap_err();
        assert!(matches!(err, TriageError::ParseFailure(msg) if msg.contains("description")));
    }

    #[test]
    fn text_without_object_is_parse_failure() {
        assert!(parse_report("I could not analyze this error.").is_err());
        assert!(parse_report("{\"title\": \"unterminated\"").is_err());
    }

    #[test]
    fn string_steps_are_split_into_lines() {
        let report = parse_report(
            r#"{"title": "t", "description": "d", "steps": "1. Open page\n2. Click save\n"}"#,
        )
        .unwrap();
        assert_eq!(report.steps_to_reproduce, vec!["Open page", "Click save"]);
    }
}
