//! Remote model calls: one prompt in, free-form text out.
//!
//! [`InferenceService`] is the boundary the retry client talks to. Two
//! implementations ship with the crate:
//!
//! * [`GeminiService`] — Gemini `generateContent` over HTTPS. Takes its
//!   [`Credential`] at construction; HTTP 429 and `RESOURCE_EXHAUSTED`
//!   bodies become [`InferenceError::RateLimited`].
//! * [`ProviderService`] — any `edgequake-llm` provider (OpenAI, Anthropic,
//!   Ollama, …). Errors are classified from their message text.
//!
//! Neither retries: that is [`crate::pipeline::retry::RetryingClient`]'s job.

use crate::config::{Credential, PipelineConfig};
use crate::error::InferenceError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// A text-in, text-out generative model.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Short provider name for logs and errors.
    fn name(&self) -> &str;

    /// Send `prompt` and return the model's raw text answer.
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError>;
}

// ── Gemini ───────────────────────────────────────────────────────────────

/// Gemini `generateContent` client.
pub struct GeminiService {
    http: reqwest::Client,
    credential: Credential,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl GeminiService {
    pub fn new(credential: Credential, config: &PipelineConfig) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| InferenceError::Service {
                provider: "gemini".into(),
                detail: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            credential,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn service_err(&self, detail: impl Into<String>) -> InferenceError {
        InferenceError::Service {
            provider: self.name().to_string(),
            detail: detail.into(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [RequestContent<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Concatenate the text parts of the first candidate.
fn response_text(body: &str) -> Option<String> {
    let response: GenerateResponse = serde_json::from_str(body).ok()?;
    let content = response.candidates.into_iter().next()?.content?;
    let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl InferenceService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        let request = GenerateRequest {
            contents: [RequestContent {
                role: "user",
                parts: [RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| self.service_err(format!("cannot encode request: {e}")))?;

        let url = format!("{GEMINI_ENDPOINT}/{}:generateContent", self.model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.credential.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.service_err(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.service_err(format!("cannot read response body: {e}")))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || text.contains("RESOURCE_EXHAUSTED") {
            return Err(InferenceError::RateLimited {
                provider: self.name().to_string(),
                detail: format!("{status}: {}", truncate(&text, 300)),
            });
        }
        if !status.is_success() {
            return Err(self.service_err(format!("{status}: {}", truncate(&text, 300))));
        }

        let answer = response_text(&text)
            .ok_or_else(|| self.service_err("response contained no text candidate"))?;
        debug!("gemini answered with {} chars", answer.len());
        Ok(answer)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Adapter over an `edgequake-llm` provider.
pub struct ProviderService {
    provider: Arc<dyn LLMProvider>,
    name: String,
    options: CompletionOptions,
}

impl ProviderService {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            name: name.into(),
            options: CompletionOptions {
                temperature: Some(config.temperature),
                max_tokens: Some(config.max_tokens),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl InferenceService for ProviderService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        let messages = vec![ChatMessage::user(prompt)];
        match self.provider.chat(&messages, Some(&self.options)).await {
            Ok(response) => {
                debug!(
                    "{}: {} input tokens, {} output tokens",
                    self.name, response.prompt_tokens, response.completion_tokens
                );
                Ok(response.content)
            }
            Err(e) => Err(InferenceError::classify(&self.name, e.to_string())),
        }
    }
}
