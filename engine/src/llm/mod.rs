//! LLM completion abstraction
//!
//! Reasoning and reflection only ever need "prompt in, text out". The
//! [`LlmClient`] trait captures exactly that, plus a [`CompletionOptions`]
//! record carrying the purpose of the call, the sampling temperature and an
//! optional seed. Given the same prompt and seed a client is expected to be
//! deterministic, which lets tests inject scripted fakes.
//!
//! The helpers at the bottom of this module pull JSON out of model output that
//! wraps it in code fences or surrounding prose.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use weave_sdk::errors::DependencyError;

pub mod ollama;

pub use ollama::OllamaClient;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur during LLM operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<LlmError> for DependencyError {
    fn from(e: LlmError) -> Self {
        let message = e.to_string();
        match e {
            LlmError::Unavailable(_) => DependencyError::Unavailable(message),
            LlmError::Authentication(_) => DependencyError::Unauthorized(message),
            LlmError::RateLimited => DependencyError::rate_limited(message),
            LlmError::InvalidRequest(_) => DependencyError::Invalid(message),
            LlmError::Network(_) => DependencyError::Network(message),
            LlmError::Timeout => DependencyError::Timeout(message),
            LlmError::Parse(_) => DependencyError::Invalid(message),
            LlmError::Unknown(_) => DependencyError::Other(message),
        }
    }
}

/// Why a completion is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    PlanGeneration,
    PlanRefinement,
    Vote,
    Comparison,
    Reflection,
    StepExecution,
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Purpose::PlanGeneration => "plan_generation",
            Purpose::PlanRefinement => "plan_refinement",
            Purpose::Vote => "vote",
            Purpose::Comparison => "comparison",
            Purpose::Reflection => "reflection",
            Purpose::StepExecution => "step_execution",
        };
        f.write_str(s)
    }
}

/// Per-call completion options
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub purpose: Purpose,
    pub temperature: f64,
    /// Fixed sampling seed; `None` lets the provider choose
    pub seed: Option<u64>,
    pub max_tokens: Option<u32>,
}

impl CompletionOptions {
    pub fn new(purpose: Purpose) -> Self {
        Self {
            purpose,
            temperature: 0.7,
            seed: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Text completion client
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Short provider name for logs
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
}

/// An [`LlmClient`] backed by a closure
///
/// Useful for deterministic fakes and for wrapping other completion APIs.
pub struct FnClient<F> {
    name: String,
    f: F,
}

impl<F> FnClient<F>
where
    F: Fn(&str, &CompletionOptions) -> Result<String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> LlmClient for FnClient<F>
where
    F: Fn(&str, &CompletionOptions) -> Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        (self.f)(prompt, options)
    }
}

/// Find the first JSON value in model output.
///
/// Handles, in order:
/// 1. The whole text being JSON
/// 2. JSON inside a markdown code fence, with or without trailing prose
/// 3. The first balanced `{...}` or `[...]` embedded in prose
pub fn extract_json(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str(inner.trim()) {
            return Some(value);
        }
    }

    for (pos, ch) in trimmed.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        if let Some(candidate) = extract_balanced_json(&trimmed[pos..]) {
            if let Ok(value) = serde_json::from_str(candidate) {
                return Some(value);
            }
        }
    }

    None
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
pub fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object or array starting at position 0 of `s`.
///
/// Counts bracket depth, respecting string literals, to find the matching
/// closing bracket.
pub fn extract_balanced_json(s: &str) -> Option<&str> {
    let (open, close) = match s.chars().next()? {
        '{' => ('{', '}'),
        '[' => ('[', ']'),
        _ => return None,
    };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
