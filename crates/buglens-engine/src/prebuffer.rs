//! Console history recorded before the debugger attached.
//!
//! Hosts install [`INIT_SCRIPT`] on every new document. It wraps the console
//! and the global error hooks, keeping up to 200 records in
//! `window.__buglensBuffer`. On attach the engine drains that array with
//! [`DRAIN_EXPRESSION`] and merges the result ahead of live entries.

use buglens_common::log::{EntryDetail, LogEntry, LogLevel};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

pub const INIT_SCRIPT: &str = r#"(() => {
  if (window.__buglensBuffer) return;
  const buffer = [];
  const cap = 200;
  Object.defineProperty(window, '__buglensBuffer', { value: buffer, configurable: true });
  const push = (record) => {
    buffer.push(record);
    if (buffer.length > cap) buffer.splice(0, buffer.length - cap);
  };
  const render = (arg) => {
    if (typeof arg === 'string') return arg;
    if (arg instanceof Error) return arg.stack || String(arg);
    try { return JSON.stringify(arg); } catch (_) { return String(arg); }
  };
  for (const level of ['log', 'info', 'warn', 'error', 'debug', 'assert']) {
    const original = console[level];
    if (typeof original !== 'function') continue;
    console[level] = function (...args) {
      if (level !== 'assert' || !args[0]) {
        const shown = level === 'assert' ? args.slice(1) : args;
        push({ kind: 'console', level, text: shown.map(render).join(' '), timestamp: Date.now(), url: location.href });
      }
      return original.apply(this, args);
    };
  }
  window.addEventListener('error', (event) => {
    push({ kind: 'exception', level: 'error', text: event.message || 'Script error', timestamp: Date.now(), url: event.filename || location.href, line: event.lineno, column: event.colno });
  });
  window.addEventListener('unhandledrejection', (event) => {
    push({ kind: 'exception', level: 'error', text: 'Unhandled rejection: ' + render(event.reason), timestamp: Date.now(), url: location.href });
  });
})();"#;

pub const DRAIN_EXPRESSION: &str = "(() => { const b = window.__buglensBuffer; if (!Array.isArray(b)) return null; return b.splice(0, b.length); })()";

#[derive(Debug, Deserialize)]
struct BufferedRecord {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    level: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    line: Option<i64>,
    #[serde(default)]
    column: Option<i64>,
}

/// Converts the drained array into entries ordered by occurrence. Malformed
/// records are skipped; a missing timestamp falls back to `now`.
pub fn parse_buffered(value: Value, now: DateTime<Utc>) -> Vec<LogEntry> {
    let Value::Array(items) = value else {
        return Vec::new();
    };

    let mut entries: Vec<LogEntry> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<BufferedRecord>(item).ok())
        .map(|record| {
            let timestamp = record
                .timestamp
                .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
                .unwrap_or(now);
            let (level, detail) = match record.kind.as_deref() {
                Some("exception") => (
                    LogLevel::Error,
                    EntryDetail::Exception {
                        line: record.line,
                        column: record.column,
                        stack: None,
                    },
                ),
                _ => (
                    LogLevel::from_console(&record.level),
                    EntryDetail::ConsoleApi {
                        api_type: record.level.clone(),
                        stack: None,
                    },
                ),
            };
            LogEntry::new(level, record.text, timestamp, detail).with_optional_url(record.url)
        })
        .collect();

    entries.sort_by_key(|e| e.timestamp);
    entries
}
