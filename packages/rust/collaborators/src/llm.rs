//! LLM collaborator: the [`LanguageModel`] contract and an OpenAI-compatible
//! chat-completions client that asks for JSON objects.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use briefwise_shared::{BriefwiseError, LlmConfig, Result, resolve_api_key};

use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// One prompt: a system message, a user message, and an optional
/// temperature override.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A model that answers a prompt with a JSON value.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, request: &LlmRequest) -> Result<Value>;
}

/// Typed access on top of [`LanguageModel::invoke`].
#[async_trait]
pub trait LanguageModelExt: LanguageModel {
    /// Invoke and deserialize. A shape mismatch is a [`BriefwiseError::Parse`].
    async fn invoke_structured<T>(&self, request: &LlmRequest) -> Result<T>
    where
        T: DeserializeOwned + Send,
    {
        let value = self.invoke(request).await?;
        serde_json::from_value(value)
            .map_err(|e| BriefwiseError::parse(format!("unexpected LLM output shape: {e}")))
    }
}

impl<M: LanguageModel + ?Sized> LanguageModelExt for M {}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

/// Chat-completions client in JSON-object mode.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Why one attempt failed, and whether another may help.
enum AttemptError {
    Retryable(BriefwiseError),
    Permanent(BriefwiseError),
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Build a client with an explicit key.
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
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
            temperature: config.temperature,
            retry,
        })
    }

    /// Build a client reading the key from the configured env var.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let key = resolve_api_key(&config.api_key_env)?;
        Self::new(config, key)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn attempt(&self, body: &Value) -> std::result::Result<Value, AttemptError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(self.retry.timeout)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(BriefwiseError::Network(format!("{url}: {e}"))))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(AttemptError::Retryable(BriefwiseError::Network(format!(
                "{url}: HTTP {status}"
            ))));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AttemptError::Permanent(BriefwiseError::Llm(format!(
                "HTTP {status}: {}",
                truncate(&text, 200)
            ))));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            AttemptError::Retryable(BriefwiseError::Network(format!(
                "{url}: failed to read body: {e}"
            )))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AttemptError::Permanent(BriefwiseError::parse("LLM returned no content")))?;

        parse_json_content(&content).map_err(AttemptError::Permanent)
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn invoke(&self, request: &LlmRequest) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "temperature": request.temperature.unwrap_or(self.temperature),
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });

        let attempts = self.retry.attempts();
        for attempt in 0..attempts {
            match self.attempt(&body).await {
                Ok(value) => {
                    debug!(attempt, "llm call succeeded");
                    return Ok(value);
                }
                Err(AttemptError::Permanent(e)) => return Err(e),
                Err(AttemptError::Retryable(e)) if self.retry.is_last(attempt) => {
                    return Err(BriefwiseError::Llm(format!(
                        "failed after {attempts} attempts: {e}"
                    )));
                }
                Err(AttemptError::Retryable(e)) => {
                    let wait = self.retry.backoff(attempt);
                    warn!(attempt, wait_ms = wait.as_millis() as u64, error = %e, "llm call failed, retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
        Err(BriefwiseError::Llm(format!("failed after {attempts} attempts")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse model output as JSON, tolerating a surrounding markdown code fence.
pub fn parse_json_content(content: &str) -> Result<Value> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("valid regex")
    });

    let body = FENCE_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map_or(content.trim(), |m| m.as_str());

    serde_json::from_str(body).map_err(|e| {
        BriefwiseError::parse(format!(
            "LLM output is not valid JSON ({e}): {}",
            truncate(body, 120)
        ))
    })
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, attempts: u32) -> OpenAiClient {
        let config = LlmConfig {
            base_url: server.uri(),
            ..LlmConfig::default()
        };
        OpenAiClient::new(&config, "test-key").unwrap().with_retry(RetryPolicy {
            max_attempts: attempts,
            timeout: Duration::from_millis(500),
            backoff_base: Duration::from_millis(5),
            retry_delay: Duration::from_millis(5),
        })
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] })
    }

    #[test]
    fn fenced_json_is_accepted() {
        let value = parse_json_content("```json\n{\"score\": 7}\n```").unwrap();
        assert_eq!(value["score"], 7);

        let value = parse_json_content("  {\"score\": 3}  ").unwrap();
        assert_eq!(value["score"], 3);
    }

    #[test]
    fn prose_is_a_parse_error() {
        let err = parse_json_content("Sure! Here is your analysis.").unwrap_err();
        assert!(matches!(err, BriefwiseError::Parse { .. }));
    }

    #[tokio::test]
    async fn invoke_sends_json_mode_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"ok\": true}")))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let value = client
            .invoke(&LlmRequest::new("system", "user").temperature(0.0))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"n\": 2}")))
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let value = client.invoke(&LlmRequest::new("s", "u")).await.unwrap();
        assert_eq!(value["n"], 2);
    }

    #[tokio::test]
    async fn client_errors_fail_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let err = client.invoke(&LlmRequest::new("s", "u")).await.unwrap_err();
        assert!(matches!(err, BriefwiseError::Llm(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let err = client.invoke(&LlmRequest::new("s", "u")).await.unwrap_err();
        assert!(err.to_string().contains("failed after 2 attempts"));
    }

    #[tokio::test]
    async fn timeouts_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("{}"))
                    .set_delay(Duration::from_secs(2)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, 2);
        let err = client.invoke(&LlmRequest::new("s", "u")).await.unwrap_err();
        assert!(matches!(err, BriefwiseError::Llm(_)));
    }

    #[tokio::test]
    async fn structured_invoke_reports_shape_mismatch() {
        #[derive(Debug, Deserialize)]
        struct Score {
            #[allow(dead_code)]
            score: u8,
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion("{\"score\": \"high\"}")),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, 1);
        let err = client
            .invoke_structured::<Score>(&LlmRequest::new("s", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, BriefwiseError::Parse { .. }));
    }
}
