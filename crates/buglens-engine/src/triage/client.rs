use super::TriageError;
use async_trait::async_trait;
use buglens_common::config::TriageConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Outcome of a single upstream attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed upstream payload: {0}")]
    Payload(String),
}

#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// One call against `model`. No retries happen at this level.
    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError>;
}

/// `generateContent` client for the Gemini REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Builds a client from config, reading the key from the configured
    /// environment variable. `None` when the variable is unset or empty.
    pub fn from_config(config: &TriageConfig) -> Result<Option<Self>, GenerationError> {
        let key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => return Ok(None),
        };
        Self::new(
            config.endpoint.clone(),
            key,
            Duration::from_secs(config.request_timeout_secs),
        )
        .map(Some)
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<String, GenerationError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_output_tokens,
                "responseMimeType": "application/json",
            }
        });

        let response = self
            .http
            .post(self.url(model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Payload(e.to_string()))?;

        parsed
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.text)
            .ok_or_else(|| GenerationError::Payload("response carried no text part".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per model, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &TriageConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// `min(base * 2^attempt, max)` for 0-indexed `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.scaled_delay(attempt, 1)
    }

    /// Overload (503) backs off twice as hard as quota (429) and transport
    /// failures.
    pub fn delay_for_status(&self, attempt: u32, status: Option<u16>) -> Duration {
        match status {
            Some(503) => self.scaled_delay(attempt, 2),
            _ => self.scaled_delay(attempt, 1),
        }
    }

    fn scaled_delay(&self, attempt: u32, multiplier: u64) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let delay = base_ms.saturating_mul(factor).saturating_mul(multiplier);
        Duration::from_millis(delay.min(max_ms))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub model: String,
    pub text: String,
}

/// Drives a `GenerationClient` through the retry and model-fallback rules:
/// 429, 503 and transport errors back off and retry; 404 moves on to the next
/// model; any other status fails immediately.
pub struct RetryingGenerator {
    client: Arc<dyn GenerationClient>,
    models: Vec<String>,
    policy: RetryPolicy,
}

impl RetryingGenerator {
    pub fn new(client: Arc<dyn GenerationClient>, models: Vec<String>, policy: RetryPolicy) -> Self {
        Self {
            client,
            models,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<Generated, TriageError> {
        let mut last_error = TriageError::UpstreamPermanent {
            status: 404,
            message: "no generation model configured".to_string(),
        };

        for model in &self.models {
            let mut attempt = 0u32;
            loop {
                let transient_status = match self.client.generate(model, request).await {
                    Ok(text) => {
                        debug!("Model {} answered after {} retries", model, attempt);
                        return Ok(Generated {
                            model: model.clone(),
                            text,
                        });
                    }
                    Err(GenerationError::Status { status: 404, body }) => {
                        info!("Model {} unavailable (404), trying next model", model);
                        last_error = TriageError::UpstreamPermanent {
                            status: 404,
                            message: body,
                        };
                        break;
                    }
                    Err(GenerationError::Status { status, body })
                        if status == 429 || status == 503 =>
                    {
                        last_error = TriageError::UpstreamTransient {
                            status: Some(status),
                            message: body,
                        };
                        Some(status)
                    }
                    Err(GenerationError::Transport(message)) => {
                        last_error = TriageError::UpstreamTransient {
                            status: None,
                            message,
                        };
                        None
                    }
                    Err(GenerationError::Status { status, body }) => {
                        warn!("Model {} rejected request with HTTP {}", model, status);
                        return Err(TriageError::UpstreamPermanent {
                            status,
                            message: body,
                        });
                    }
                    Err(GenerationError::Payload(message)) => {
                        return Err(TriageError::ParseFailure(message));
                    }
                };

                attempt += 1;
                if attempt >= self.policy.max_attempts {
                    warn!(
                        "Giving up on {} after {} attempts: {}",
                        model, attempt, last_error
                    );
                    return Err(last_error);
                }

                let delay = self.policy.delay_for_status(attempt - 1, transient_status);
                debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    model,
                    delay,
                    attempt + 1,
                    self.policy.max_attempts
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(last_error)
    }
}
