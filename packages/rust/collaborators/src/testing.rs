//! Scripted collaborators for tests of code built on [`LanguageModel`] and
//! [`WebResearch`]. Enabled with the `testing` feature.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use briefwise_shared::{BriefwiseError, Result};

use crate::llm::{LanguageModel, LlmRequest};
use crate::research::{SearchResult, WebResearch};

enum Reply {
    Json(Value),
    Fail(String),
}

/// A [`LanguageModel`] that answers by matching a key against the prompt.
///
/// Rules are checked in insertion order; the first whose key appears in the
/// system or user message wins.
#[derive(Default)]
pub struct ScriptedModel {
    rules: Vec<(String, Reply)>,
    fallback: Option<Reply>,
    latency: Duration,
    calls: AtomicUsize,
    prompts: Mutex<Vec<LlmRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer prompts containing `key` with `value`.
    pub fn respond(mut self, key: impl Into<String>, value: Value) -> Self {
        self.rules.push((key.into(), Reply::Json(value)));
        self
    }

    /// Fail prompts containing `key` with an LLM error.
    pub fn fail(mut self, key: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((key.into(), Reply::Fail(message.into())));
        self
    }

    /// Answer for prompts no rule matches.
    pub fn otherwise(mut self, value: Value) -> Self {
        self.fallback = Some(Reply::Json(value));
        self
    }

    /// Fail every prompt no rule matches.
    pub fn otherwise_fail(mut self, message: impl Into<String>) -> Self {
        self.fallback = Some(Reply::Fail(message.into()));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received so far.
    pub fn prompts(&self) -> Vec<LlmRequest> {
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn invoke(&self, request: &LlmRequest) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = self
            .rules
            .iter()
            .find(|(key, _)| request.system.contains(key) || request.user.contains(key))
            .map(|(_, reply)| reply)
            .or(self.fallback.as_ref());

        match reply {
            Some(Reply::Json(value)) => Ok(value.clone()),
            Some(Reply::Fail(message)) => Err(BriefwiseError::Llm(message.clone())),
            None => Err(BriefwiseError::Llm("no scripted response".into())),
        }
    }
}

/// A [`WebResearch`] that returns canned results.
pub struct StaticResearch {
    rules: Vec<(String, SearchResult)>,
    default: SearchResult,
    latency: Duration,
    calls: AtomicUsize,
}

impl StaticResearch {
    /// Every query succeeds with `content`.
    pub fn answering(content: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default: SearchResult::ok(content, vec!["https://example.com/source".into()]),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every query fails with `error`.
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default: SearchResult::failed(error),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queries containing `needle` get `result` instead of the default.
    pub fn on(mut self, needle: impl Into<String>, result: SearchResult) -> Self {
        self.rules.push((needle.into(), result));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebResearch for StaticResearch {
    async fn search(&self, query: &str, _system_prompt: &str) -> SearchResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.rules
            .iter()
            .find(|(needle, _)| query.contains(needle.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| self.default.clone())
    }
}
