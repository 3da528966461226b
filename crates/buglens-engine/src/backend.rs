use async_trait::async_trait;
use base64::Engine;
use buglens_common::error::CaptureError;
use buglens_common::protocol::{CdpCommand, ResponseBody, TargetEvent};
use serde_json::Value;
use tokio::sync::mpsc;

/// Narrow host interface over a debugger-protocol connection. All three
/// operations are keyed by target id; a vanished target surfaces as
/// `CaptureError::TargetGone`.
#[async_trait]
pub trait DebuggerBackend: Send + Sync {
    /// Attach to `target` and start forwarding its events into `events`.
    async fn attach(
        &self,
        target: &str,
        events: mpsc::Sender<TargetEvent>,
    ) -> Result<(), CaptureError>;

    /// Stop forwarding events for `target`.
    async fn detach(&self, target: &str) -> Result<(), CaptureError>;

    /// Send one protocol command and return its raw result object.
    async fn send_command(&self, target: &str, command: CdpCommand)
    -> Result<Value, CaptureError>;

    /// Whether the host still knows about `target`.
    async fn target_exists(&self, target: &str) -> bool;
}

/// Fetches a response body and decodes it when the host delivered base64.
pub async fn fetch_response_body<B: DebuggerBackend + ?Sized>(
    backend: &B,
    target: &str,
    request_id: &str,
) -> Result<String, CaptureError> {
    let raw = backend
        .send_command(
            target,
            CdpCommand::GetResponseBody {
                request_id: request_id.to_string(),
            },
        )
        .await?;
    let body: ResponseBody = serde_json::from_value(raw)?;
    Ok(decode_body(body))
}

pub fn decode_body(body: ResponseBody) -> String {
    if !body.base64_encoded {
        return body.body;
    }
    match base64::engine::general_purpose::STANDARD.decode(body.body.trim()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::debug!("Response body flagged base64 but failed to decode: {}", e);
            body.body
        }
    }
}

/// Evaluates `expression` in page context and returns its by-value result.
pub async fn evaluate<B: DebuggerBackend + ?Sized>(
    backend: &B,
    target: &str,
    expression: &str,
) -> Result<Value, CaptureError> {
    let raw = backend
        .send_command(
            target,
            CdpCommand::Evaluate {
                expression: expression.to_string(),
            },
        )
        .await?;

    if let Some(details) = raw.get("exceptionDetails") {
        let text = details
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("evaluation threw");
        return Err(CaptureError::Protocol(format!("Evaluation failed: {}", text)));
    }

    Ok(raw
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_bodies() {
        let body = ResponseBody {
            body: "eyJlcnJvciI6ImJvb20ifQ==".into(),
            base64_encoded: true,
        };
        assert_eq!(decode_body(body), r#"{"error":"boom"}"#);
    }

    #[test]
    fn plain_bodies_pass_through() {
        let body = ResponseBody {
            body: "plain text".into(),
            base64_encoded: false,
        };
        assert_eq!(decode_body(body), "plain text");
    }

    #[test]
    fn undecodable_base64_keeps_raw_text() {
        let body = ResponseBody {
            body: "not base64 at all!".into(),
            base64_encoded: true,
        };
        assert_eq!(decode_body(body), "not base64 at all!");
    }
}
