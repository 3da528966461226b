use crate::store::kv::{KvStore, PAUSE_UNTIL_KEY, StorageError, get_typed, set_typed};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Fixed-window request counter. The count only resets at a window boundary.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_per_window: u32,
    window_start: Option<DateTime<Utc>>,
    request_count: u32,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            window,
            max_per_window,
            window_start: None,
            request_count: 0,
        }
    }

    pub fn can_proceed(&mut self, now: DateTime<Utc>) -> bool {
        match self.window_start {
            Some(start) if now <= start + self.window => {}
            _ => {
                self.window_start = Some(now);
                self.request_count = 0;
            }
        }
        self.request_count < self.max_per_window
    }

    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.request_count += 1;
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }
}

/// Persisted "do not call upstream before" timestamp.
#[derive(Clone)]
pub struct PauseState {
    store: Arc<dyn KvStore>,
}

impl PauseState {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn pause_until(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        get_typed(self.store.as_ref(), PAUSE_UNTIL_KEY).await
    }

    /// Returns the pause deadline while it lies in the future.
    pub async fn is_paused(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, StorageError> {
        Ok(self.pause_until().await?.filter(|until| now < *until))
    }

    pub async fn set_pause(
        &self,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StorageError> {
        let until = now + Duration::minutes(minutes);
        set_typed(self.store.as_ref(), PAUSE_UNTIL_KEY, &until).await?;
        tracing::warn!("AI triage paused for {} minutes (until {})", minutes, until);
        Ok(until)
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(PAUSE_UNTIL_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::kv::MemoryKvStore;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn limiter_blocks_after_max_in_window() {
        let mut limiter = RateLimiter::new(2, Duration::seconds(60));
        for i in 0..2 {
            let now = t0() + Duration::seconds(i);
            assert!(limiter.can_proceed(now));
            limiter.record_attempt(now);
        }
        assert!(!limiter.can_proceed(t0() + Duration::seconds(30)));
        assert!(!limiter.can_proceed(t0() + Duration::seconds(60)));
    }

    #[test]
    fn limiter_resets_once_window_elapsed() {
        let mut limiter = RateLimiter::new(1, Duration::seconds(60));
        assert!(limiter.can_proceed(t0()));
        limiter.record_attempt(t0());
        assert!(!limiter.can_proceed(t0() + Duration::seconds(10)));

        assert!(limiter.can_proceed(t0() + Duration::seconds(61)));
        assert_eq!(limiter.request_count(), 0);
    }

    #[tokio::test]
    async fn pause_is_persisted_and_expires() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let pause = PauseState::new(store.clone());
        assert_eq!(pause.is_paused(t0()).await.unwrap(), None);

        let until = pause.set_pause(10, t0()).await.unwrap();
        assert_eq!(until, t0() + Duration::minutes(10));

        let reopened = PauseState::new(store);
        assert_eq!(
            reopened.is_paused(t0() + Duration::minutes(9)).await.unwrap(),
            Some(until)
        );
        assert_eq!(reopened.is_paused(until).await.unwrap(), None);

        reopened.clear().await.unwrap();
        assert_eq!(reopened.pause_until().await.unwrap(), None);
    }
}
