use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct RecentSignal {
    url: String,
    status: u16,
    timestamp: DateTime<Utc>,
}

/// Short sliding-window suppression of the same `(url, status)` failure
/// surfacing more than once per session.
#[derive(Debug)]
pub struct RecentSignalCache {
    window: Duration,
    signals: HashMap<String, Vec<RecentSignal>>,
}

impl RecentSignalCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            signals: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Prunes the session's stale signals, then reports whether `(url, status)`
    /// was already seen inside the window. A fresh signal is recorded.
    pub fn is_duplicate(
        &mut self,
        session_key: &str,
        url: &str,
        status: u16,
        timestamp: DateTime<Utc>,
    ) -> bool {
        let window = self.window;
        let signals = self.signals.entry(session_key.to_string()).or_default();
        signals.retain(|s| timestamp - s.timestamp < window);

        if signals.iter().any(|s| s.status == status && s.url == url) {
            return true;
        }

        signals.push(RecentSignal {
            url: url.to_string(),
            status,
            timestamp,
        });
        false
    }

    pub fn forget_session(&mut self, session_key: &str) {
        self.signals.remove(session_key);
    }

    /// Drops every signal older than the window; returns sessions emptied.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let window = self.window;
        let before = self.signals.len();
        self.signals.retain(|_, signals| {
            signals.retain(|s| now - s.timestamp < window);
            !signals.is_empty()
        });
        before - self.signals.len()
    }
}
