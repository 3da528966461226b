//! Debugger protocol shapes.
//!
//! Only the fields the capture engine reads are modelled; everything else in
//! the CDP payloads is ignored on deserialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub mod methods {
    pub const CONSOLE_MESSAGE_ADDED: &str = "Console.messageAdded";
    pub const LOG_ENTRY_ADDED: &str = "Log.entryAdded";
    pub const CONSOLE_API_CALLED: &str = "Runtime.consoleAPICalled";
    pub const EXCEPTION_THROWN: &str = "Runtime.exceptionThrown";
    pub const REQUEST_WILL_BE_SENT: &str = "Network.requestWillBeSent";
    pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";
    pub const LOADING_FAILED: &str = "Network.loadingFailed";
    pub const LOADING_FINISHED: &str = "Network.loadingFinished";
    pub const DETACHED: &str = "Inspector.detached";
}

/// Converts a `Runtime.Timestamp` (milliseconds since the epoch).
pub fn cdp_time(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() || ms <= 0.0 {
        return None;
    }
    DateTime::from_timestamp_millis(ms as i64)
}

/// Raw event as delivered by a host, tagged with the target it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEvent {
    pub target_id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl TargetEvent {
    pub fn new(target_id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            target_id: target_id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type", default)]
    pub object_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub unserializable_value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RemoteObject {
    /// Renders the object the way a console would print it.
    pub fn display(&self) -> String {
        match &self.value {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) if self.object_type == "object" => "null".to_string(),
            Some(other) if self.object_type != "object" => other.to_string(),
            Some(other) => self
                .description
                .clone()
                .unwrap_or_else(|| other.to_string()),
            None => self
                .unserializable_value
                .clone()
                .or_else(|| self.description.clone())
                .unwrap_or_else(|| self.object_type.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub function_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
}

impl StackTrace {
    pub fn render(&self) -> Option<String> {
        if self.call_frames.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .call_frames
            .iter()
            .map(|frame| {
                let name = if frame.function_name.is_empty() {
                    "<anonymous>"
                } else {
                    frame.function_name.as_str()
                };
                format!(
                    "    at {} ({}:{}:{})",
                    name,
                    frame.url,
                    frame.line_number + 1,
                    frame.column_number + 1
                )
            })
            .collect();
        Some(lines.join("\n"))
    }

    pub fn top_url(&self) -> Option<&str> {
        self.call_frames
            .first()
            .map(|f| f.url.as_str())
            .filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    #[serde(default)]
    pub source: Option<String>,
    pub level: String,
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "lineNumber")]
    pub line: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAdded {
    pub message: ConsoleMessage,
}

/// `Log.entryAdded` carries browser-side messages (failed loads, CSP
/// violations, interventions) in the same shape as `Console.messageAdded`.
#[derive(Debug, Clone, Deserialize)]
struct LogEntryAdded {
    entry: ConsoleMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleApiCalled {
    #[serde(rename = "type")]
    pub api_type: String,
    #[serde(default)]
    pub args: Vec<RemoteObject>,
    #[serde(default)]
    pub stack_trace: Option<StackTrace>,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

impl ConsoleApiCalled {
    pub fn text(&self) -> String {
        self.args
            .iter()
            .map(RemoteObject::display)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub line_number: Option<i64>,
    #[serde(default)]
    pub column_number: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<StackTrace>,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    /// Prefers the thrown object's description (which carries the message)
    /// over the generic "Uncaught" text.
    pub fn message(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|e| e.description.clone())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.text.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionThrown {
    #[serde(default)]
    pub timestamp: Option<f64>,
    pub exception_details: ExceptionDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    pub method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: String,
    pub request: Request,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    pub response: Response,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: String,
    #[serde(default)]
    pub error_text: String,
    #[serde(default)]
    pub canceled: Option<bool>,
    #[serde(rename = "type", default)]
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: String,
    #[serde(default)]
    pub encoded_data_length: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detached {
    #[serde(default)]
    pub reason: String,
}

/// Events the router understands, decoded from their wire method tag.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    ConsoleMessageAdded(MessageAdded),
    ConsoleApiCalled(ConsoleApiCalled),
    ExceptionThrown(ExceptionThrown),
    RequestWillBeSent(RequestWillBeSent),
    ResponseReceived(ResponseReceived),
    LoadingFailed(LoadingFailed),
    LoadingFinished(LoadingFinished),
    Detached(Detached),
}

impl ProtocolEvent {
    /// Decodes a raw event. Unknown methods yield `Ok(None)`.
    pub fn from_cdp(method: &str, params: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match method {
            methods::CONSOLE_MESSAGE_ADDED => {
                ProtocolEvent::ConsoleMessageAdded(serde_json::from_value(params)?)
            }
            methods::LOG_ENTRY_ADDED => {
                let added: LogEntryAdded = serde_json::from_value(params)?;
                ProtocolEvent::ConsoleMessageAdded(MessageAdded {
                    message: added.entry,
                })
            }
            methods::CONSOLE_API_CALLED => {
                ProtocolEvent::ConsoleApiCalled(serde_json::from_value(params)?)
            }
            methods::EXCEPTION_THROWN => {
                ProtocolEvent::ExceptionThrown(serde_json::from_value(params)?)
            }
            methods::REQUEST_WILL_BE_SENT => {
                ProtocolEvent::RequestWillBeSent(serde_json::from_value(params)?)
            }
            methods::RESPONSE_RECEIVED => {
                ProtocolEvent::ResponseReceived(serde_json::from_value(params)?)
            }
            methods::LOADING_FAILED => ProtocolEvent::LoadingFailed(serde_json::from_value(params)?),
            methods::LOADING_FINISHED => {
                ProtocolEvent::LoadingFinished(serde_json::from_value(params)?)
            }
            methods::DETACHED => ProtocolEvent::Detached(serde_json::from_value(params)?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// When the page says the event happened, if it says so at all.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        let ms = match self {
            ProtocolEvent::ConsoleMessageAdded(ev) => ev.message.timestamp,
            ProtocolEvent::ConsoleApiCalled(ev) => ev.timestamp,
            ProtocolEvent::ExceptionThrown(ev) => ev.timestamp,
            _ => None,
        }?;
        cdp_time(ms)
    }
}

/// Commands the engine issues against an attached target.
#[derive(Debug, Clone, PartialEq)]
pub enum CdpCommand {
    RuntimeEnable,
    ConsoleEnable,
    NetworkEnable,
    SetAsyncCallStackDepth { max_depth: i64 },
    GetResponseBody { request_id: String },
    Evaluate { expression: String },
}

impl CdpCommand {
    pub fn method(&self) -> &'static str {
        match self {
            CdpCommand::RuntimeEnable => "Runtime.enable",
            CdpCommand::ConsoleEnable => "Console.enable",
            CdpCommand::NetworkEnable => "Network.enable",
            CdpCommand::SetAsyncCallStackDepth { .. } => "Runtime.setAsyncCallStackDepth",
            CdpCommand::GetResponseBody { .. } => "Network.getResponseBody",
            CdpCommand::Evaluate { .. } => "Runtime.evaluate",
        }
    }

    pub fn params(&self) -> Value {
        match self {
            CdpCommand::RuntimeEnable | CdpCommand::ConsoleEnable | CdpCommand::NetworkEnable => {
                json!({})
            }
            CdpCommand::SetAsyncCallStackDepth { max_depth } => json!({ "maxDepth": max_depth }),
            CdpCommand::GetResponseBody { request_id } => json!({ "requestId": request_id }),
            CdpCommand::Evaluate { expression } => json!({
                "expression": expression,
                "returnByValue": true,
            }),
        }
    }
}

/// Result of `Network.getResponseBody`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBody {
    pub body: String,
    #[serde(default)]
    pub base64_encoded: bool,
}
