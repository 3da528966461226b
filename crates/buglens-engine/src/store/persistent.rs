use super::buffer::BoundedLog;
use buglens_common::config::PersistenceConfig;
use buglens_common::log::LogEntry;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type SharedPersistentStore = Arc<Mutex<PersistentLogStore>>;

pub fn lock(store: &SharedPersistentStore) -> MutexGuard<'_, PersistentLogStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-target accumulation that outlives a single attachment.
#[derive(Debug, Clone)]
pub struct PersistentRecord {
    pub logs: BoundedLog,
    pub network_requests: BoundedLog,
    pub errors: BoundedLog,
    pub last_activity: DateTime<Utc>,
}

impl PersistentRecord {
    fn new(cap: usize, now: DateTime<Utc>) -> Self {
        Self {
            logs: BoundedLog::new(cap),
            network_requests: BoundedLog::new(cap),
            errors: BoundedLog::new(cap),
            last_activity: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.network_requests.is_empty() && self.errors.is_empty()
    }

    fn retain_since(&mut self, cutoff: DateTime<Utc>) -> usize {
        self.logs.retain_since(cutoff)
            + self.network_requests.retain_since(cutoff)
            + self.errors.retain_since(cutoff)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub sessions_scanned: usize,
    pub entries_removed: usize,
    pub sessions_removed: usize,
}

#[derive(Debug)]
pub struct PersistentLogStore {
    cap: usize,
    max_age: Duration,
    orphan_grace: Duration,
    records: HashMap<String, PersistentRecord>,
    prune_cursor: Option<String>,
}

impl PersistentLogStore {
    pub fn new(cap: usize, max_age: Duration, orphan_grace: Duration) -> Self {
        Self {
            cap,
            max_age,
            orphan_grace,
            records: HashMap::new(),
            prune_cursor: None,
        }
    }

    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(
            config.persistent_cap,
            Duration::minutes(config.max_age_minutes),
            Duration::minutes(config.orphan_grace_minutes),
        )
    }

    pub fn shared(self) -> SharedPersistentStore {
        Arc::new(Mutex::new(self))
    }

    fn record_mut(&mut self, key: &str, now: DateTime<Utc>) -> &mut PersistentRecord {
        let cap = self.cap;
        let record = self
            .records
            .entry(key.to_string())
            .or_insert_with(|| PersistentRecord::new(cap, now));
        record.last_activity = now;
        record
    }

    pub fn append_log(&mut self, key: &str, entry: LogEntry, now: DateTime<Utc>) {
        self.record_mut(key, now).logs.append(entry);
    }

    pub fn append_network(&mut self, key: &str, entry: LogEntry, now: DateTime<Utc>) {
        self.record_mut(key, now).network_requests.append(entry);
    }

    pub fn append_error(&mut self, key: &str, entry: LogEntry, now: DateTime<Utc>) {
        self.record_mut(key, now).errors.append(entry);
    }

    /// Applies `merge` to the stored network entry in both the log and request lists.
    pub fn replace_network<F>(&mut self, key: &str, request_id: &str, merge: F) -> bool
    where
        F: Fn(&LogEntry) -> LogEntry,
    {
        let Some(record) = self.records.get_mut(key) else {
            return false;
        };
        let in_logs = record.logs.replace_network(request_id, &merge);
        let in_requests = record.network_requests.replace_network(request_id, &merge);
        in_logs || in_requests
    }

    pub fn prepend_logs(&mut self, key: &str, entries: Vec<LogEntry>, now: DateTime<Utc>) {
        if entries.is_empty() {
            return;
        }
        let errors: Vec<LogEntry> = entries.iter().filter(|e| e.is_error()).cloned().collect();
        let record = self.record_mut(key, now);
        record.logs.prepend(entries);
        record.errors.prepend(errors);
    }

    pub fn record(&self, key: &str) -> Option<&PersistentRecord> {
        self.records.get(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn recent_errors(&self, key: &str, limit: usize) -> Vec<LogEntry> {
        self.recent(key, limit, |r| &r.errors)
    }

    pub fn recent_logs(&self, key: &str, limit: usize) -> Vec<LogEntry> {
        self.recent(key, limit, |r| &r.logs)
    }

    fn recent<F>(&self, key: &str, limit: usize, list: F) -> Vec<LogEntry>
    where
        F: Fn(&PersistentRecord) -> &BoundedLog,
    {
        let Some(record) = self.records.get(key) else {
            return Vec::new();
        };
        let mut entries: Vec<LogEntry> = list(record).iter().rev().take(limit).cloned().collect();
        entries.reverse();
        entries
    }

    /// Ages out old entries and drops empty records whose target is no longer
    /// live. Visits at most `max_sessions` records per call, resuming where the
    /// previous call stopped.
    pub fn prune(
        &mut self,
        now: DateTime<Utc>,
        live: &HashSet<String>,
        max_sessions: usize,
    ) -> PruneStats {
        let mut keys: Vec<String> = self.records.keys().cloned().collect();
        keys.sort();

        let mut stats = PruneStats::default();
        if keys.is_empty() || max_sessions == 0 {
            return stats;
        }

        let start = match &self.prune_cursor {
            Some(cursor) => keys.iter().position(|k| k > cursor).unwrap_or(0),
            None => 0,
        };
        let batch: Vec<String> = keys
            .iter()
            .cycle()
            .skip(start)
            .take(max_sessions.min(keys.len()))
            .cloned()
            .collect();
        self.prune_cursor = batch.last().cloned();

        let cutoff = now - self.max_age;
        for key in batch {
            stats.sessions_scanned += 1;
            let Some(record) = self.records.get_mut(&key) else {
                continue;
            };
            stats.entries_removed += record.retain_since(cutoff);

            let orphaned = record.is_empty()
                && !live.contains(&key)
                && now - record.last_activity >= self.orphan_grace;
            if orphaned {
                self.records.remove(&key);
                stats.sessions_removed += 1;
            }
        }

        stats
    }
}
