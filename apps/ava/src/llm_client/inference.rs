//! Client for self-hosted inference endpoints (local completion model, grammar corrector).
//!
//! Both speak the same minimal contract: `POST {"inputs": ..., "parameters": {...}}`
//! answered by `{"output": "..."}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, FinishReason, LlmError, TextCompletion, REQUEST_TIMEOUT};

#[derive(Debug, Serialize)]
struct InferencePayload<'a> {
    inputs: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InferenceOutput {
    #[serde(default)]
    output: String,
}

#[derive(Clone)]
pub struct InferenceClient {
    client: Client,
    url: String,
}

impl InferenceClient {
    pub fn new(url: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            url,
        })
    }

    /// Sends `inputs` to the endpoint and returns its `output` field verbatim.
    pub async fn query(&self, inputs: &str, parameters: Option<Value>) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.url)
            .json(&InferencePayload { inputs, parameters })
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited {
                message: response.text().await.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: InferenceOutput = response.json().await?;
        debug!("Inference endpoint {} returned {} chars", self.url, body.output.len());
        Ok(body.output)
    }
}

/// Local completion: the hosted sampling parameters travel in `parameters`. The endpoint
/// reports no finish reason, so an empty output is the only exhaustion signal.
#[async_trait]
impl TextCompletion for InferenceClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let parameters = serde_json::json!({
            "temperature": request.temperature,
            "max_new_tokens": request.max_tokens,
            "top_p": request.top_p,
            "repetition_penalty": 1.0 + request.frequency_penalty,
            "stop": request.stop,
        });
        let text = self.query(&request.prompt, Some(parameters)).await?;

        Ok(CompletionResponse {
            text,
            finish_reason: FinishReason::Stop,
            top_logprobs: None,
        })
    }
}
