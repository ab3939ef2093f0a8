/// LLM Client — the single point of entry for every hosted model call in Ava.
///
/// ARCHITECTURAL RULE: No other module may talk to a completion, classification or
/// grammar endpoint directly. All model interactions go through the `TextCompletion`
/// seam defined here (or `inference::InferenceClient` for self-hosted models).
///
/// There is deliberately no retry loop in this module: the generation orchestrator owns
/// the attempt ceiling, and rate limiting is surfaced to the caller untouched.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod inference;
pub mod prompts;

/// Base URL of the hosted completions API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    #[error("Model returned no choices")]
    EmptyContent,
}

/// Parameters of a single completion call. Serialized as-is for the hosted API.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Number of top log-probabilities to return per token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    #[serde(other)]
    Other,
}

/// The first choice of a completion, flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub finish_reason: FinishReason,
    /// Top log-probabilities of the first generated token, when requested.
    pub top_logprobs: Option<HashMap<String, f64>>,
}

impl CompletionResponse {
    /// True when the provider cut the output at the token budget or returned nothing.
    pub fn is_exhausted(&self) -> bool {
        self.finish_reason == FinishReason::Length || self.text.trim().is_empty()
    }
}

/// A model that turns a prompt into text. Implemented by the hosted client, the
/// self-hosted inference client, and by mocks in tests.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

#[derive(Debug, Deserialize)]
struct CompletionsBody {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    text: String,
    finish_reason: Option<FinishReason>,
    logprobs: Option<Logprobs>,
}

#[derive(Debug, Deserialize)]
struct Logprobs {
    #[serde(default)]
    top_logprobs: Vec<Option<HashMap<String, f64>>>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Client for the hosted `/completions` API, used for base and fine-tuned models alike
/// as well as for content classification.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    organization: String,
}

impl LlmClient {
    pub fn new(base_url: &str, api_key: String, organization: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            organization,
        })
    }
}

#[async_trait]
impl TextCompletion for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let response = self
            .client
            .post(format!("{}/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Organization", &self.organization)
            .json(request)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            warn!("Completions API rate limited model {}: {}", request.model, body);
            return Err(LlmError::RateLimited {
                message: error_message(body),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_message(body),
            });
        }

        let body: CompletionsBody = response.json().await?;
        let response = first_choice(body)?;

        debug!(
            "Completion succeeded: model={}, finish_reason={:?}, chars={}",
            request.model,
            response.finish_reason,
            response.text.len()
        );

        Ok(response)
    }
}

fn first_choice(body: CompletionsBody) -> Result<CompletionResponse, LlmError> {
    let choice = body.choices.into_iter().next().ok_or(LlmError::EmptyContent)?;
    let top_logprobs = choice
        .logprobs
        .and_then(|l| l.top_logprobs.into_iter().next())
        .flatten();

    Ok(CompletionResponse {
        text: choice.text,
        finish_reason: choice.finish_reason.unwrap_or(FinishReason::Stop),
        top_logprobs,
    })
}

/// Pulls `error.message` out of an API error body, falling back to the raw body.
fn error_message(body: String) -> String {
    serde_json::from_str::<ApiError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}
