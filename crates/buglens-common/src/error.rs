use thiserror::Error;

/// Messages hosts use when the target under a command has gone away.
const TARGET_GONE_MARKERS: &[&str] = &[
    "No target with given id",
    "No tab with given id",
    "Target closed",
    "target closed",
    "Session with given id not found",
    "Inspected target navigated or closed",
    "Debugger is not attached",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Target {0} is gone")]
    TargetGone(String),

    #[error("Attachment to {target} failed: {reason}")]
    AttachmentFailure { target: String, reason: String },

    #[error("Attachment to {0} is already in progress")]
    AttachInProgress(String),

    #[error("Already attached to {0}")]
    AlreadyAttached(String),

    #[error("No session attached to {0}")]
    NotAttached(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CaptureError {
    fn from(e: serde_json::Error) -> Self {
        CaptureError::Serialization(e.to_string())
    }
}

impl CaptureError {
    /// Classifies a host error message, recognising the "target vanished" family.
    pub fn from_protocol_message(target: &str, message: &str) -> Self {
        if TARGET_GONE_MARKERS.iter().any(|m| message.contains(m)) {
            CaptureError::TargetGone(target.to_string())
        } else {
            CaptureError::Protocol(message.to_string())
        }
    }

    pub fn is_target_gone(&self) -> bool {
        matches!(self, CaptureError::TargetGone(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::TargetGone(_) => "TARGET_GONE",
            CaptureError::AttachmentFailure { .. } => "ATTACHMENT_FAILURE",
            CaptureError::AttachInProgress(_) => "ATTACH_IN_PROGRESS",
            CaptureError::AlreadyAttached(_) => "ALREADY_ATTACHED",
            CaptureError::NotAttached(_) => "NOT_ATTACHED",
            CaptureError::Protocol(_) => "PROTOCOL_ERROR",
            CaptureError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_target_gone_messages() {
        let err = CaptureError::from_protocol_message("t1", "No target with given id: t1");
        assert_eq!(err, CaptureError::TargetGone("t1".into()));
        assert!(err.is_target_gone());
        assert_eq!(err.code(), "TARGET_GONE");
    }

    #[test]
    fn other_messages_stay_protocol_errors() {
        let err = CaptureError::from_protocol_message("t1", "No resource with given identifier");
        assert!(matches!(err, CaptureError::Protocol(_)));
        assert!(!err.is_target_gone());
    }
}
