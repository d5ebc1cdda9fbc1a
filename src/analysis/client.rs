//! Retrying query client: transport abstraction, the Perplexity HTTP transport,
//! and the backoff policy wrapped around it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{parse_fact_check, parse_info, prompts, AnalysisResult, QueryError, QueryMode};

pub const DEFAULT_ENDPOINT: &str = "https://api.perplexity.ai/chat/completions";
pub const DEFAULT_MODEL: &str = "llama-3.1-sonar-small-128k-online";

/// Used when a 429 arrives without a usable `retry-after` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub citations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: String,
}

impl CompletionResponse {
    /// Convenience for fakes and tests: a single-choice response.
    pub fn with_content(content: impl Into<String>, citations: Vec<String>) -> Self {
        Self {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: content.into(),
                },
            }],
            citations,
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// One raw round-trip to the analysis provider. No retries at this layer.
#[async_trait::async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(&self, request: &CompletionRequest)
        -> Result<CompletionResponse, QueryError>;
}

/// Chat-completions over HTTPS with bearer auth.
pub struct PerplexityTransport {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl PerplexityTransport {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("factcheck-bot/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .context("building analysis http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl CompletionTransport for PerplexityTransport {
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, QueryError> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(QueryError::RateLimit {
                retry_after: Duration::from_secs(secs),
            });
        }
        if !status.is_success() {
            return Err(QueryError::Api {
                status: status.as_u16(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| QueryError::Network(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| QueryError::Parsing(e.to_string()))
    }
}

/// Exponential backoff with additive jitter; 429s use the server's delay instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(32_000),
            jitter_max: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    /// `min(max_delay, base_delay * 2^(attempt-1))`, jitter excluded.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay to wait after `attempt` failed with `err`.
    pub fn delay_after(&self, err: &QueryError, attempt: u32) -> Duration {
        match err {
            QueryError::RateLimit { retry_after } => *retry_after,
            _ => self.backoff_for(attempt) + self.jitter(),
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter_max.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..max_ms))
    }
}

#[derive(Clone)]
pub struct QueryClient {
    transport: Arc<dyn CompletionTransport>,
    model: String,
    policy: RetryPolicy,
}

impl QueryClient {
    pub fn new(transport: Arc<dyn CompletionTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Never fails: exhausted retries yield [`AnalysisResult::fallback`].
    pub async fn query(&self, text: &str, mode: QueryMode) -> AnalysisResult {
        match self.try_query(text, mode).await {
            Ok(result) => result,
            Err(e) => {
                counter!("analysis_fallbacks_total").increment(1);
                tracing::error!(
                    target: "analysis",
                    mode = mode.as_str(),
                    kind = e.kind(),
                    error = %e,
                    "analysis retries exhausted, using fallback"
                );
                AnalysisResult::fallback(mode)
            }
        }
    }

    /// Retry loop; returns the last error once `max_retries` attempts have failed.
    pub async fn try_query(&self, text: &str, mode: QueryMode) -> Result<AnalysisResult, QueryError> {
        let request = prompts::build_request(&self.model, mode, text);
        let max_attempts = self.policy.max_retries.max(1);
        let mut attempt: u32 = 1;
        loop {
            counter!("analysis_attempts_total").increment(1);
            tracing::debug!(target: "analysis", attempt, max_attempts, mode = mode.as_str(), "querying");

            let err = match self.attempt_once(&request, mode).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };
            if attempt >= max_attempts {
                return Err(err);
            }

            let delay = self.policy.delay_after(&err, attempt);
            tracing::warn!(
                target: "analysis",
                attempt,
                kind = err.kind(),
                error = %err,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "analysis attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt_once(
        &self,
        request: &CompletionRequest,
        mode: QueryMode,
    ) -> Result<AnalysisResult, QueryError> {
        let resp = self.transport.complete(request).await?;
        let content = resp
            .content()
            .ok_or_else(|| QueryError::Parsing("response has no choices".into()))?;
        match mode {
            QueryMode::FactCheck => {
                parse_fact_check(content, resp.citations.clone()).map(AnalysisResult::FactCheck)
            }
            QueryMode::MoreInfo => {
                parse_info(content, resp.citations.clone()).map(AnalysisResult::Info)
            }
        }
    }
}
