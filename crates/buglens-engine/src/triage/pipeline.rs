use super::client::{GenerationClient, GenerationRequest, RetryPolicy, RetryingGenerator};
use super::context::ContextSource;
use super::limiter::{PauseState, RateLimiter};
use super::parse::parse_report;
use super::prompt::build_prompt;
use super::report::{ai_report, basic_report, parse_fallback_report};
use super::TriageError;
use crate::clock::Clock;
use crate::dedup::{ProcessedErrorCache, fingerprint_error};
use crate::store::{KvStore, StorageError};
use buglens_common::config::BuglensConfig;
use buglens_common::config::TriageConfig;
use buglens_common::error::CaptureError;
use buglens_common::report::{BugReport, HttpErrorSummary};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum TriageOutcome {
    /// The model produced a usable report.
    Generated(BugReport),
    /// A deterministic report stood in for the model.
    Fallback {
        report: BugReport,
        reason: TriageError,
    },
    /// The fingerprint was already triaged inside its TTL. No report.
    Duplicate { fingerprint: String },
    /// Filtered by domain or status before any dedup bookkeeping.
    NotEligible { reason: String },
    /// The originating target vanished while context was collected.
    Aborted { reason: CaptureError },
}

impl TriageOutcome {
    pub fn report(&self) -> Option<&BugReport> {
        match self {
            TriageOutcome::Generated(report) | TriageOutcome::Fallback { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }

    pub fn into_report(self) -> Option<BugReport> {
        match self {
            TriageOutcome::Generated(report) | TriageOutcome::Fallback { report, .. } => {
                Some(report)
            }
            _ => None,
        }
    }
}

pub struct TriagePipeline {
    config: TriageConfig,
    limiter: Mutex<RateLimiter>,
    processed: tokio::sync::Mutex<ProcessedErrorCache>,
    pause: PauseState,
    generator: RetryingGenerator,
    context: Arc<dyn ContextSource>,
    clock: Arc<dyn Clock>,
}

impl TriagePipeline {
    pub fn new(
        config: TriageConfig,
        processed: ProcessedErrorCache,
        kv: Arc<dyn KvStore>,
        client: Arc<dyn GenerationClient>,
        context: Arc<dyn ContextSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(
            config.rate_limit_max,
            Duration::seconds(config.rate_limit_window_secs),
        );
        let generator = RetryingGenerator::new(
            client,
            config.models.clone(),
            RetryPolicy::from_config(&config),
        );
        Self {
            limiter: Mutex::new(limiter),
            processed: tokio::sync::Mutex::new(processed),
            pause: PauseState::new(kv),
            generator,
            context,
            clock,
            config,
        }
    }

    /// Loads the persisted fingerprint map and builds the pipeline.
    pub async fn load(
        config: &BuglensConfig,
        kv: Arc<dyn KvStore>,
        client: Arc<dyn GenerationClient>,
        context: Arc<dyn ContextSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let processed = ProcessedErrorCache::load(
            kv.clone(),
            Duration::hours(config.dedup.processed_ttl_hours),
        )
        .await?;
        Ok(Self::new(
            config.triage.clone(),
            processed,
            kv,
            client,
            context,
            clock,
        ))
    }

    pub fn pause_state(&self) -> &PauseState {
        &self.pause
    }

    /// Drops expired fingerprints. Returns how many were removed.
    pub async fn sweep_processed(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.processed.lock().await.sweep_expired(now).await
    }

    pub fn domain_allowed(&self, error: &HttpErrorSummary) -> bool {
        if self.config.allowed_domains.is_empty() {
            return true;
        }
        let Some(host) = error.host() else {
            return false;
        };
        self.config.allowed_domains.iter().any(|domain| {
            let domain = domain
                .trim()
                .trim_start_matches("*.")
                .trim_start_matches('.')
                .to_ascii_lowercase();
            !domain.is_empty() && (host == domain || host.ends_with(&format!(".{}", domain)))
        })
    }

    pub async fn triage(&self, error: &HttpErrorSummary) -> TriageOutcome {
        let now = self.clock.now();

        if !self.config.enabled {
            return self.fallback(error, TriageError::Disabled, now);
        }
        if !self.domain_allowed(error) {
            debug!("Skipping triage for {}: domain not allowed", error.url);
            return TriageOutcome::NotEligible {
                reason: "domain not allowed".to_string(),
            };
        }
        if error.status < self.config.min_status {
            return TriageOutcome::NotEligible {
                reason: format!("status {} below {}", error.status, self.config.min_status),
            };
        }

        let hash = fingerprint_error(error);
        {
            // Held until the fingerprint is marked so concurrent identical
            // errors cannot both pass the check.
            let mut processed = self.processed.lock().await;
            if processed.is_processed(&hash, now) {
                debug!("Error {} already triaged ({})", error.url, hash);
                return TriageOutcome::Duplicate { fingerprint: hash };
            }

            match self.pause.is_paused(now).await {
                Ok(Some(until)) => {
                    return self.fallback(error, TriageError::Paused(until), now);
                }
                Ok(None) => {}
                Err(e) => warn!("Could not read pause state: {}", e),
            }

            {
                let mut limiter = self.limiter.lock().unwrap_or_else(PoisonError::into_inner);
                if !limiter.can_proceed(now) {
                    drop(limiter);
                    return self.fallback(error, TriageError::RateLimited, now);
                }
                limiter.record_attempt(now);
            }

            if let Err(e) = processed.mark_processed(&hash, now).await {
                warn!("Failed to persist fingerprint {}: {}", hash, e);
            }
        }

        let context = match self.context.collect(error).await {
            Ok(context) => context,
            Err(e) if e.is_target_gone() => {
                info!(
                    "Target {} vanished during triage of {}; will retry later",
                    error.session_key, error.url
                );
                if let Err(err) = self.processed.lock().await.unmark(&hash).await {
                    warn!("Failed to unmark fingerprint {}: {}", hash, err);
                }
                return TriageOutcome::Aborted { reason: e };
            }
            Err(e) => {
                debug!("Triage context incomplete for {}: {}", error.url, e);
                Default::default()
            }
        };

        let request = GenerationRequest {
            prompt: build_prompt(error, &context),
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        };

        match self.generator.generate(&request).await {
            Ok(generated) => {
                let now = self.clock.now();
                match parse_report(&generated.text) {
                    Ok(parsed) => {
                        info!("Generated report for {} with {}", error.url, generated.model);
                        TriageOutcome::Generated(ai_report(error, &generated.model, parsed, now))
                    }
                    Err(reason) => {
                        warn!("Unusable answer from {}: {}", generated.model, reason);
                        TriageOutcome::Fallback {
                            report: parse_fallback_report(
                                error,
                                &generated.model,
                                &generated.text,
                                now,
                            ),
                            reason,
                        }
                    }
                }
            }
            Err(reason) => {
                let now = self.clock.now();
                let pause_minutes = match &reason {
                    TriageError::UpstreamTransient {
                        status: Some(429), ..
                    } => Some(self.config.quota_pause_minutes),
                    TriageError::UpstreamTransient {
                        status: Some(503), ..
                    } => Some(self.config.overload_pause_minutes),
                    _ => None,
                };
                if let Some(minutes) = pause_minutes {
                    if let Err(e) = self.pause.set_pause(minutes, now).await {
                        warn!("Failed to persist pause: {}", e);
                    }
                }
                self.fallback(error, reason, now)
            }
        }
    }

    fn fallback(
        &self,
        error: &HttpErrorSummary,
        reason: TriageError,
        now: DateTime<Utc>,
    ) -> TriageOutcome {
        info!("Using basic report for {}: {}", error.url, reason);
        TriageOutcome::Fallback {
            report: basic_report(error, reason.reason_code(), now),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryKvStore;
    use crate::triage::client::GenerationError;
    use crate::triage::context::EmptyContext;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        calls: AtomicUsize,
        answer: Result<String, GenerationError>,
    }

    #[async_trait]
    impl GenerationClient for CountingClient {
        async fn generate(
            &self,
            _model: &str,
            _request: &GenerationRequest,
        ) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn error(url: &str, status: u16) -> HttpErrorSummary {
        HttpErrorSummary {
            session_key: "t1".into(),
            request_id: "r1".into(),
            url: url.into(),
            method: "GET".into(),
            status,
            status_text: String::new(),
            response_body: None,
            timestamp: t0(),
        }
    }

    async fn pipeline(
        config: TriageConfig,
        answer: Result<String, GenerationError>,
    ) -> (TriagePipeline, Arc<CountingClient>) {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let client = Arc::new(CountingClient {
            calls: AtomicUsize::new(0),
            answer,
        });
        let processed = ProcessedErrorCache::load(kv.clone(), Duration::hours(24))
            .await
            .unwrap();
        let pipeline = TriagePipeline::new(
            config,
            processed,
            kv,
            client.clone(),
            Arc::new(EmptyContext),
            Arc::new(ManualClock::new(t0())),
        );
        (pipeline, client)
    }

    fn ok_answer() -> Result<String, GenerationError> {
        Ok(r#"{"title": "Broken", "description": "It broke"}"#.to_string())
    }

    #[tokio::test]
    async fn disabled_triage_falls_back_without_calling() {
        let config = TriageConfig {
            enabled: false,
            ..Default::default()
        };
        let (pipeline, client) = pipeline(config, ok_answer()).await;
        let outcome = pipeline.triage(&error("https://x/a", 500)).await;
        assert!(matches!(
            outcome,
            TriageOutcome::Fallback {
                reason: TriageError::Disabled,
                ..
            }
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn allow_list_matches_subdomains() {
        let config = TriageConfig {
            allowed_domains: vec!["example.com".into()],
            ..Default::default()
        };
        let (pipeline, _) = pipeline(config, ok_answer()).await;
        assert!(pipeline.domain_allowed(&error("https://api.example.com/x", 500)));
        assert!(pipeline.domain_allowed(&error("https://EXAMPLE.com/x", 500)));
        assert!(!pipeline.domain_allowed(&error("https://notexample.com/x", 500)));

        let outcome = pipeline.triage(&error("https://other.org/x", 500)).await;
        assert!(matches!(outcome, TriageOutcome::NotEligible { .. }));
    }

    #[tokio::test]
    async fn low_status_is_not_eligible() {
        let config = TriageConfig {
            min_status: 500,
            ..Default::default()
        };
        let (pipeline, client) = pipeline(config, ok_answer()).await;
        let outcome = pipeline.triage(&error("https://x/a", 404)).await;
        assert!(matches!(outcome, TriageOutcome::NotEligible { .. }));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_identical_error_is_duplicate_without_report() {
        let (pipeline, client) = pipeline(TriageConfig::default(), ok_answer()).await;
        let first = pipeline.triage(&error("https://x/a", 500)).await;
        assert!(matches!(first, TriageOutcome::Generated(_)));

        let second = pipeline.triage(&error("https://x/a", 500)).await;
        assert!(matches!(second, TriageOutcome::Duplicate { .. }));
        assert!(second.report().is_none());
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unparseable_answer_uses_parse_fallback() {
        let (pipeline, _) = pipeline(TriageConfig::default(), Ok("sorry, no idea".into())).await;
        let outcome = pipeline.triage(&error("https://x/a", 500)).await;
        match outcome {
            TriageOutcome::Fallback {
                report,
                reason: TriageError::ParseFailure(_),
            } => assert!(report.description.contains("sorry, no idea")),
            other => panic!("expected parse fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn active_pause_skips_upstream() {
        let (pipeline, client) = pipeline(TriageConfig::default(), ok_answer()).await;
        pipeline.pause_state().set_pause(10, t0()).await.unwrap();

        let outcome = pipeline.triage(&error("https://x/a", 500)).await;
        assert!(matches!(
            outcome,
            TriageOutcome::Fallback {
                reason: TriageError::Paused(_),
                ..
            }
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);

        pipeline.pause_state().clear().await.unwrap();
        let retried = pipeline.triage(&error("https://x/a", 500)).await;
        assert!(matches!(retried, TriageOutcome::Generated(_)));
    }
}
