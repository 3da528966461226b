use buglens_common::log::LogEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Append-only log list with a hard cap and oldest-first eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundedLog {
    cap: usize,
    entries: VecDeque<LogEntry>,
}

impl BoundedLog {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            entries: VecDeque::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends and returns how many entries were evicted from the front.
    pub fn append(&mut self, entry: LogEntry) -> usize {
        self.entries.push_back(entry);
        self.enforce_cap()
    }

    /// Inserts entries that predate everything already stored, keeping their order.
    pub fn prepend(&mut self, entries: Vec<LogEntry>) -> usize {
        for entry in entries.into_iter().rev() {
            self.entries.push_front(entry);
        }
        self.enforce_cap()
    }

    fn enforce_cap(&mut self) -> usize {
        let excess = self.entries.len().saturating_sub(self.cap);
        if excess > 0 {
            self.entries.drain(..excess);
        }
        excess
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Most recent network entry for `request_id`.
    pub fn find_network(&self, request_id: &str) -> Option<&LogEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.is_network() && e.request_id.as_deref() == Some(request_id))
    }

    /// Replaces the most recent network entry for `request_id` with the
    /// result of `merge`. Returns false when no such entry is stored.
    pub fn replace_network<F>(&mut self, request_id: &str, merge: F) -> bool
    where
        F: FnOnce(&LogEntry) -> LogEntry,
    {
        let slot = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.is_network() && e.request_id.as_deref() == Some(request_id));
        match slot {
            Some(entry) => {
                let merged = merge(&*entry);
                *entry = merged;
                true
            }
            None => false,
        }
    }

    /// Drops entries older than `cutoff`; returns the number removed.
    pub fn retain_since(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.timestamp >= cutoff);
        before - self.entries.len()
    }

    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.timestamp).max()
    }
}
