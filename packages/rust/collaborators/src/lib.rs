//! External collaborators of the briefing pipeline.
//!
//! Each collaborator is a trait ([`LanguageModel`], [`WebResearch`]) with one
//! HTTP implementation. Both clients carry explicit timeouts and bounded
//! retries configured through [`RetryPolicy`].

pub mod llm;
pub mod research;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use llm::{LanguageModel, LanguageModelExt, LlmRequest, OpenAiClient, parse_json_content};
pub use research::{
    DEFAULT_RESEARCH_PROMPT, PerplexityClient, SearchQuery, SearchResult, WebResearch,
    strip_reasoning,
};
pub use retry::RetryPolicy;
