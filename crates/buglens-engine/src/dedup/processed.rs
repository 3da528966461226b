use crate::store::kv::{KvStore, PROCESSED_ERRORS_KEY, StorageError, get_typed, set_typed};
use buglens_common::report::{HttpErrorSummary, truncate_chars};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

const FINGERPRINT_BODY_CHARS: usize = 200;

/// Stable identity of "the same error": url, status, method and the first 200
/// characters of the body. Timestamps never participate.
///
/// 32-bit shift-and-subtract string hash. Collisions only cost a skipped
/// report, so nothing stronger is needed here.
pub fn fingerprint(url: &str, status: u16, method: &str, body: Option<&str>) -> String {
    let body = body.map(|b| truncate_chars(b, FINGERPRINT_BODY_CHARS));
    let key = format!(
        "{}|{}|{}|{}",
        url,
        status,
        method.to_ascii_uppercase(),
        body.as_deref().unwrap_or("")
    );

    let mut hash: i32 = 0;
    for unit in key.encode_utf16() {
        hash = (hash << 5).wrapping_sub(hash).wrapping_add(i32::from(unit));
    }
    format!("{:08x}", hash as u32)
}

pub fn fingerprint_error(error: &HttpErrorSummary) -> String {
    fingerprint(
        &error.url,
        error.status,
        &error.method,
        error.response_body.as_deref(),
    )
}

/// Long-lived record of which error fingerprints already went through
/// triage. Mutations are written through to the key-value store immediately.
pub struct ProcessedErrorCache {
    ttl: Duration,
    entries: HashMap<String, DateTime<Utc>>,
    store: Arc<dyn KvStore>,
}

impl ProcessedErrorCache {
    pub async fn load(store: Arc<dyn KvStore>, ttl: Duration) -> Result<Self, StorageError> {
        let entries: HashMap<String, DateTime<Utc>> =
            get_typed(store.as_ref(), PROCESSED_ERRORS_KEY)
                .await?
                .unwrap_or_default();
        tracing::debug!("Loaded {} processed error fingerprints", entries.len());
        Ok(Self {
            ttl,
            entries,
            store,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while the fingerprint is inside its TTL. A stale entry is evicted
    /// from memory and reported as unprocessed.
    pub fn is_processed(&mut self, hash: &str, now: DateTime<Utc>) -> bool {
        match self.entries.get(hash) {
            Some(first_seen) if now - *first_seen < self.ttl => true,
            Some(_) => {
                self.entries.remove(hash);
                false
            }
            None => false,
        }
    }

    pub async fn mark_processed(
        &mut self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.entries.insert(hash.to_string(), now);
        let ttl = self.ttl;
        self.entries.retain(|_, first_seen| now - *first_seen < ttl);
        self.persist().await
    }

    /// Forgets a fingerprint so the error can be triaged again later.
    pub async fn unmark(&mut self, hash: &str) -> Result<bool, StorageError> {
        if self.entries.remove(hash).is_none() {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    pub async fn sweep_expired(&mut self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, first_seen| now - *first_seen < ttl);
        let removed = before - self.entries.len();
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn persist(&self) -> Result<(), StorageError> {
        set_typed(self.store.as_ref(), PROCESSED_ERRORS_KEY, &self.entries).await
    }
}
