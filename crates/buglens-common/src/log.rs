use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Maps a console level or console API call type onto the three-level model.
    /// `error` and `assert` always promote to `Error`.
    pub fn from_console(level: &str) -> Self {
        match level {
            "error" | "assert" => LogLevel::Error,
            "warning" | "warn" => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }

    pub fn for_status(status: u16) -> Self {
        if status >= 400 {
            LogLevel::Error
        } else {
            LogLevel::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Request/response fields shared by the network entry variants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_data_length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum EntryDetail {
    Console {
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        line: Option<i64>,
    },
    ConsoleApi {
        api_type: String,
        #[serde(default)]
        stack: Option<String>,
    },
    Exception {
        #[serde(default)]
        line: Option<i64>,
        #[serde(default)]
        column: Option<i64>,
        #[serde(default)]
        stack: Option<String>,
    },
    NetworkRequest(NetworkInfo),
    NetworkResponse(NetworkInfo),
    NetworkFailed {
        #[serde(default)]
        method: Option<String>,
        error_text: String,
        canceled: bool,
    },
    NetworkFinished(NetworkInfo),
    HttpError {
        method: String,
        status: u16,
        status_text: String,
        #[serde(default)]
        note: Option<String>,
    },
    HttpErrorWithBody {
        method: String,
        status: u16,
        status_text: String,
        response_body: String,
    },
}

impl EntryDetail {
    pub fn kind(&self) -> &'static str {
        match self {
            EntryDetail::Console { .. } => "console",
            EntryDetail::ConsoleApi { .. } => "console-api",
            EntryDetail::Exception { .. } => "exception",
            EntryDetail::NetworkRequest(_) => "network-request",
            EntryDetail::NetworkResponse(_) => "network-response",
            EntryDetail::NetworkFailed { .. } => "network-failed",
            EntryDetail::NetworkFinished(_) => "network-finished",
            EntryDetail::HttpError { .. } => "http-error",
            EntryDetail::HttpErrorWithBody { .. } => "http-error-with-body",
        }
    }

    pub fn network_info(&self) -> Option<&NetworkInfo> {
        match self {
            EntryDetail::NetworkRequest(info)
            | EntryDetail::NetworkResponse(info)
            | EntryDetail::NetworkFinished(info) => Some(info),
            _ => None,
        }
    }
}

/// One normalized diagnostic record. Entries are never mutated after they are
/// stored, except network entries replaced wholesale when a correlated
/// response or completion arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub detail: EntryDetail,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
        detail: EntryDetail,
    ) -> Self {
        Self {
            level,
            text: text.into(),
            timestamp,
            url: None,
            request_id: None,
            detail,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_optional_url(mut self, url: Option<String>) -> Self {
        self.url = url;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn kind(&self) -> &'static str {
        self.detail.kind()
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }

    pub fn is_network(&self) -> bool {
        self.detail.network_info().is_some()
    }
}
