//! Ollama completion client
//!
//! Implements [`LlmClient`] against a local Ollama server, typically at
//! http://localhost:11434, using the non-streaming `/api/generate` endpoint.
//! Temperature, seed and token limits are passed through Ollama's `options`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{CompletionOptions, LlmClient, LlmError, Result};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    /// Base URL for Ollama API (typically http://localhost:11434)
    base_url: String,

    /// Model name to use (e.g., "llama3.1:8b")
    model: String,

    client: Client,
}

impl OllamaClient {
    /// Create a new Ollama client
    ///
    /// # Arguments
    /// * `base_url` - Base URL for Ollama API (e.g., "http://localhost:11434")
    /// * `model` - Model name to use (e.g., "llama3.1:8b")
    /// * `timeout` - Limit for a whole request, including generation
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Unknown(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request<'a>(&'a self, prompt: &'a str, options: &CompletionOptions) -> GenerateRequest<'a> {
        GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: options.temperature,
                seed: options.seed,
                num_predict: options.max_tokens,
            },
        }
    }

    fn map_status(&self, status: StatusCode, body: String) -> LlmError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Authentication(body),
            StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited,
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
                LlmError::InvalidRequest(format!("Ollama API error ({}): {}", status, body))
            }
            _ => LlmError::Unavailable(format!("Ollama API error ({}): {}", status, body)),
        }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String> {
        let request = self.build_request(prompt, options);

        tracing::debug!(
            "Ollama request: model={}, purpose={}, prompt_chars={}",
            self.model,
            options.purpose,
            prompt.len()
        );

        let url = format!("{}/api/generate", self.base_url);
        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else if e.is_connect() {
                    LlmError::Unavailable(format!(
                        "Cannot connect to Ollama at {}. Is Ollama running?",
                        self.base_url
                    ))
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        tracing::debug!(
            "Ollama response received in {:.1}s",
            start.elapsed().as_secs_f64()
        );

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(self.map_status(status, error_text));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(body.response)
    }
}

/// Ollama `/api/generate` request body
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// Ollama `/api/generate` response body
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Purpose;

    fn client() -> OllamaClient {
        OllamaClient::new("http://localhost:11434/", "llama3.1:8b", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(client().base_url, "http://localhost:11434");
        assert_eq!(client().model(), "llama3.1:8b");
    }

    #[test]
    fn test_request_body_shape() {
        let client = client();
        let options = CompletionOptions::new(Purpose::PlanGeneration)
            .with_temperature(0.2)
            .with_seed(Some(42));
        let body = serde_json::to_value(client.build_request("hello", &options)).unwrap();

        assert_eq!(body["model"], "llama3.1:8b");
        assert_eq!(body["prompt"], "hello");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["seed"], 42);
        assert!(body["options"].get("num_predict").is_none());
    }

    #[test]
    fn test_status_mapping() {
        let client = client();
        assert_eq!(
            client.map_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            LlmError::RateLimited
        );
        assert!(matches!(
            client.map_status(StatusCode::UNAUTHORIZED, String::new()),
            LlmError::Authentication(_)
        ));
        assert!(matches!(
            client.map_status(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            LlmError::Unavailable(_)
        ));
    }
}
