use crate::store::BoundedLog;
use buglens_common::error::CaptureError;
use buglens_common::log::LogEntry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Live capture context for one attached target.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub logs: BoundedLog,
    pub network_requests: BoundedLog,
    pub errors: BoundedLog,
    pub attached_at: DateTime<Utc>,
    /// Set when pre-attach history was merged; see the engine's replay filter.
    pub replayed_before: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, cap: usize, attached_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            logs: BoundedLog::new(cap),
            network_requests: BoundedLog::new(cap),
            errors: BoundedLog::new(cap),
            attached_at,
            replayed_before: None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            attached_at: self.attached_at,
            logs: self.logs.to_vec(),
            network_requests: self.network_requests.to_vec(),
            errors: self.errors.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub attached_at: DateTime<Utc>,
    pub logs: Vec<LogEntry>,
    pub network_requests: Vec<LogEntry>,
    pub errors: Vec<LogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Detached,
    Attaching,
    Attached,
    Detaching,
}

#[derive(Debug)]
enum Slot {
    Attaching { since: DateTime<Utc> },
    Attached(Session),
    Detaching(Session),
}

/// Lifecycle bookkeeping for every target: `Detached -> Attaching -> Attached
/// -> Detaching -> Detached`. A missing slot is `Detached`.
#[derive(Debug)]
pub struct SessionRegistry {
    cap: usize,
    slots: HashMap<String, Slot>,
}

impl SessionRegistry {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            slots: HashMap::new(),
        }
    }

    pub fn state(&self, target: &str) -> SessionState {
        match self.slots.get(target) {
            None => SessionState::Detached,
            Some(Slot::Attaching { .. }) => SessionState::Attaching,
            Some(Slot::Attached(_)) => SessionState::Attached,
            Some(Slot::Detaching(_)) => SessionState::Detaching,
        }
    }

    pub fn begin_attach(&mut self, target: &str, now: DateTime<Utc>) -> Result<(), CaptureError> {
        match self.slots.get(target) {
            None => {
                self.slots
                    .insert(target.to_string(), Slot::Attaching { since: now });
                Ok(())
            }
            Some(Slot::Attaching { since }) => {
                tracing::debug!("Attach to {} already running since {}", target, since);
                Err(CaptureError::AttachInProgress(target.to_string()))
            }
            Some(Slot::Attached(_)) => Err(CaptureError::AlreadyAttached(target.to_string())),
            Some(Slot::Detaching(_)) => Err(CaptureError::AttachmentFailure {
                target: target.to_string(),
                reason: "detach in progress".to_string(),
            }),
        }
    }

    /// Rolls an in-flight attach back to `Detached`.
    pub fn abort_attach(&mut self, target: &str) {
        if matches!(self.slots.get(target), Some(Slot::Attaching { .. })) {
            self.slots.remove(target);
        }
    }

    /// Promotes `Attaching` to `Attached`. Fails with `TargetGone` when the
    /// attach was cancelled by a forced detach in the meantime.
    pub fn complete_attach(
        &mut self,
        target: &str,
        now: DateTime<Utc>,
    ) -> Result<&mut Session, CaptureError> {
        if !matches!(self.slots.get(target), Some(Slot::Attaching { .. })) {
            return Err(CaptureError::TargetGone(target.to_string()));
        }
        let session = Session::new(target, self.cap, now);
        self.slots.insert(target.to_string(), Slot::Attached(session));
        match self.slots.get_mut(target) {
            Some(Slot::Attached(session)) => Ok(session),
            _ => Err(CaptureError::TargetGone(target.to_string())),
        }
    }

    pub fn begin_detach(&mut self, target: &str) -> Result<(), CaptureError> {
        match self.slots.remove(target) {
            Some(Slot::Attached(session)) => {
                self.slots
                    .insert(target.to_string(), Slot::Detaching(session));
                Ok(())
            }
            Some(other) => {
                self.slots.insert(target.to_string(), other);
                Err(CaptureError::NotAttached(target.to_string()))
            }
            None => Err(CaptureError::NotAttached(target.to_string())),
        }
    }

    pub fn finish_detach(&mut self, target: &str) -> Option<Session> {
        match self.slots.remove(target) {
            Some(Slot::Detaching(session)) => Some(session),
            Some(other) => {
                self.slots.insert(target.to_string(), other);
                None
            }
            None => None,
        }
    }

    /// Drops whatever state the target is in. Used when the host reports the
    /// target vanished.
    pub fn force_detach(&mut self, target: &str) -> Option<Session> {
        match self.slots.remove(target) {
            Some(Slot::Attached(session)) | Some(Slot::Detaching(session)) => Some(session),
            Some(Slot::Attaching { .. }) | None => None,
        }
    }

    /// The live session, including one that is being detached.
    pub fn session(&self, target: &str) -> Option<&Session> {
        match self.slots.get(target) {
            Some(Slot::Attached(session)) | Some(Slot::Detaching(session)) => Some(session),
            _ => None,
        }
    }

    pub fn session_mut(&mut self, target: &str) -> Option<&mut Session> {
        match self.slots.get_mut(target) {
            Some(Slot::Attached(session)) | Some(Slot::Detaching(session)) => Some(session),
            _ => None,
        }
    }

    pub fn live_targets(&self) -> HashSet<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| !matches!(slot, Slot::Attaching { .. }))
            .map(|(target, _)| target.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn full_lifecycle() {
        let mut registry = SessionRegistry::new(200);
        assert_eq!(registry.state("t"), SessionState::Detached);

        registry.begin_attach("t", t0()).unwrap();
        assert_eq!(registry.state("t"), SessionState::Attaching);
        assert!(registry.session("t").is_none());

        let session = registry.complete_attach("t", t0()).unwrap();
        assert_eq!(session.logs.cap(), 200);
        assert_eq!(registry.state("t"), SessionState::Attached);

        registry.begin_detach("t").unwrap();
        assert_eq!(registry.state("t"), SessionState::Detaching);
        assert!(registry.finish_detach("t").is_some());
        assert_eq!(registry.state("t"), SessionState::Detached);
    }

    #[test]
    fn attach_fails_closed_when_busy_or_done() {
        let mut registry = SessionRegistry::new(10);
        registry.begin_attach("t", t0()).unwrap();
        assert_eq!(
            registry.begin_attach("t", t0()),
            Err(CaptureError::AttachInProgress("t".into()))
        );
        registry.complete_attach("t", t0()).unwrap();
        assert_eq!(
            registry.begin_attach("t", t0()),
            Err(CaptureError::AlreadyAttached("t".into()))
        );
    }

    #[test]
    fn forced_detach_cancels_pending_attach() {
        let mut registry = SessionRegistry::new(10);
        registry.begin_attach("t", t0()).unwrap();
        assert!(registry.force_detach("t").is_none());
        assert!(matches!(
            registry.complete_attach("t", t0()),
            Err(CaptureError::TargetGone(_))
        ));
    }

    #[test]
    fn detach_requires_attached_session() {
        let mut registry = SessionRegistry::new(10);
        assert_eq!(
            registry.begin_detach("t"),
            Err(CaptureError::NotAttached("t".into()))
        );
        registry.begin_attach("t", t0()).unwrap();
        assert!(registry.begin_detach("t").is_err());
        assert_eq!(registry.state("t"), SessionState::Attaching);
    }
}
