//! Web-research collaborator: the [`WebResearch`] contract and a
//! Perplexity chat-completions client.
//!
//! Research never fails with an `Err`. Every outcome, including exhausted
//! retries, is a [`SearchResult`] the caller can inspect.

use std::collections::HashMap;
use std::sync::LazyLock;

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use briefwise_shared::{BriefwiseError, ResearchConfig, Result, resolve_api_key};

use crate::retry::RetryPolicy;

/// System prompt used when a query does not bring its own.
pub const DEFAULT_RESEARCH_PROMPT: &str = "You are a helpful research assistant.";

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Result of one research query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    #[serde(default)]
    pub citations: Vec<String>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl SearchResult {
    pub fn ok(content: impl Into<String>, citations: Vec<String>) -> Self {
        Self {
            content: content.into(),
            citations,
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            citations: Vec::new(),
            success: false,
            error: Some(error.into()),
        }
    }

    /// Content of a successful, non-empty result.
    pub fn usable(&self) -> Option<&str> {
        (self.success && !self.content.trim().is_empty()).then_some(self.content.as_str())
    }
}

/// One keyed query in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub key: String,
    pub query: String,
    pub system_prompt: Option<String>,
}

impl SearchQuery {
    pub fn new(key: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            query: query.into(),
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

#[async_trait]
pub trait WebResearch: Send + Sync {
    async fn search(&self, query: &str, system_prompt: &str) -> SearchResult;

    /// Run all queries concurrently, keyed by [`SearchQuery::key`].
    async fn batch_search(&self, queries: &[SearchQuery]) -> HashMap<String, SearchResult> {
        let searches = queries.iter().map(|q| async move {
            let prompt = q.system_prompt.as_deref().unwrap_or(DEFAULT_RESEARCH_PROMPT);
            (q.key.clone(), self.search(&q.query, prompt).await)
        });
        join_all(searches).await.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// Perplexity client
// ---------------------------------------------------------------------------

pub struct PerplexityClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for PerplexityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerplexityClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct ResearchResponse {
    #[serde(default)]
    choices: Vec<ResearchChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct ResearchChoice {
    #[serde(default)]
    message: Option<ResearchMessage>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct ResearchMessage {
    #[serde(default)]
    content: String,
}

impl PerplexityClient {
    pub fn new(config: &ResearchConfig, api_key: impl Into<String>) -> Result<Self> {
        let retry = RetryPolicy::from(config);
        let http = Client::builder()
            .timeout(retry.timeout)
            .build()
            .map_err(|e| BriefwiseError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            retry,
        })
    }

    pub fn from_config(config: &ResearchConfig) -> Result<Self> {
        let key = resolve_api_key(&config.api_key_env)?;
        Self::new(config, key)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl WebResearch for PerplexityClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn search(&self, query: &str, system_prompt: &str) -> SearchResult {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": query },
            ],
        });

        let attempts = self.retry.attempts();
        for attempt in 0..attempts {
            let last = self.retry.is_last(attempt);
            let sent = self
                .http
                .post(&url)
                .timeout(self.retry.timeout)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let error = match sent {
                Ok(response) if response.status() == StatusCode::OK => {
                    match response.json::<ResearchResponse>().await {
                        Ok(parsed) => {
                            debug!(attempt, "research query succeeded");
                            return into_result(parsed);
                        }
                        Err(e) => format!("invalid response body: {e}"),
                    }
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let wait = self.retry.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        attempts,
                        wait_ms = wait.as_millis() as u64,
                        "research rate limited, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    format!("API returned status {}: {text}", status.as_u16())
                }
                Err(e) if e.is_timeout() => "Request timeout".to_string(),
                Err(e) => e.to_string(),
            };

            if last {
                warn!(attempts, %error, "research query failed");
                return SearchResult::failed(error);
            }
            warn!(attempt = attempt + 1, attempts, %error, "research attempt failed, retrying");
            tokio::time::sleep(self.retry.retry_delay).await;
        }

        SearchResult::failed(format!("Failed after {attempts} attempts"))
    }
}

fn into_result(response: ResearchResponse) -> SearchResult {
    let Some(choice) = response.choices.into_iter().next() else {
        return SearchResult::ok(String::new(), response.citations);
    };
    let content = choice.message.map(|m| m.content).unwrap_or_default();
    let citations = if choice.citations.is_empty() {
        response.citations
    } else {
        choice.citations
    };
    SearchResult::ok(strip_reasoning(&content), citations)
}

/// Remove `<think>…</think>` reasoning traces some research models emit.
pub fn strip_reasoning(content: &str) -> String {
    static THINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));
    THINK_RE.replace_all(content, "").trim().to_string()
}
