//! Completion Engine — requests raw completions from one backend, parses them into
//! candidates and scores them with the profanity classifier.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::generation::error::GenerationError;
use crate::generation::generator::GenerationRequest;
use crate::generation::profanity::{ProfanityClassifier, ProfanityThreshold};
use crate::generation::prompt_builder::{BuiltPrompt, PromptMode};
use crate::generation::prompts::TOPIC_DELIMITER;
use crate::llm_client::prompts::LINE_STOP;
use crate::llm_client::{CompletionRequest, TextCompletion};

const TEMPERATURE: f32 = 1.0;
const MAX_TOKENS: u32 = 200;
const TOP_P: f32 = 1.0;
const FREQUENCY_PENALTY: f32 = 0.7;
const PRESENCE_PENALTY: f32 = 0.0;

// ────────────────────────────────────────────────────────────────────────────
// Backends
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    HostedBase,
    HostedFineTuned,
    Local,
}

impl BackendKind {
    /// Few-shot rows each backend is prompted with. Fine-tuned models already know
    /// the format and run (almost) zero-shot.
    pub fn prompt_rows(self) -> usize {
        match self {
            BackendKind::HostedBase => 60,
            BackendKind::HostedFineTuned => 1,
            BackendKind::Local => 5,
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hosted_base" | "base" | "openai" => Ok(BackendKind::HostedBase),
            "hosted_fine_tuned" | "fine_tuned" | "openai_fine_tuned" => {
                Ok(BackendKind::HostedFineTuned)
            }
            "local" | "custom" => Ok(BackendKind::Local),
            other => Err(format!("unknown completion type '{other}'")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::HostedBase => "hosted_base",
            BackendKind::HostedFineTuned => "hosted_fine_tuned",
            BackendKind::Local => "local",
        };
        f.write_str(name)
    }
}

/// One concrete backend for one request: which kind, which model, and the client
/// that serves it. Callers only ever use `call`.
#[derive(Clone)]
pub struct CompletionBackend {
    pub kind: BackendKind,
    pub model_id: String,
    client: Arc<dyn TextCompletion>,
}

impl CompletionBackend {
    pub fn new(kind: BackendKind, model_id: String, client: Arc<dyn TextCompletion>) -> Self {
        Self {
            kind,
            model_id,
            client,
        }
    }

    fn request(&self, prompt: &str) -> CompletionRequest {
        CompletionRequest {
            model: self.model_id.clone(),
            prompt: prompt.to_string(),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            top_p: TOP_P,
            frequency_penalty: FREQUENCY_PENALTY,
            presence_penalty: PRESENCE_PENALTY,
            stop: vec![LINE_STOP.to_string()],
            logprobs: None,
        }
    }

    /// Returns the raw completion text, or `LengthExhausted` when the provider
    /// truncated the output or returned nothing.
    pub async fn call(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self.client.complete(&self.request(prompt)).await?;
        if response.is_exhausted() {
            return Err(GenerationError::LengthExhausted);
        }
        Ok(response.text)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Candidates
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub conversation_starter: String,
    pub topics: Vec<String>,
    /// Text sent to the classifier (the full completion, topics included).
    #[serde(skip)]
    pub raw: String,
    #[serde(rename = "classification")]
    pub classification_score: Option<u8>,
    pub profane: bool,
    /// Pre-correction text, set when the grammar fixer replaced the starter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_grammar: Option<String>,
}

impl Candidate {
    pub fn new(conversation_starter: String, topics: Vec<String>, raw: String) -> Self {
        Self {
            conversation_starter,
            topics,
            raw,
            classification_score: None,
            profane: false,
            broken_grammar: None,
        }
    }

    /// Records the classifier's verdict, keeping `profane` in step with the threshold.
    pub fn score(&mut self, score: u8, threshold: ProfanityThreshold) {
        self.classification_score = Some(score);
        self.profane = threshold.is_profane(score);
    }
}

/// Parses one raw completion.
///
/// Grounded prompts make the model answer `topicA,topicB ### content`; cold prompts end
/// with an open `topics ###` line so the completion is the content itself.
pub fn parse_candidate(
    text: &str,
    mode: PromptMode,
    requested_topics: &[String],
) -> Result<Candidate, GenerationError> {
    match mode {
        PromptMode::Grounded => {
            let (topics_part, content) = text.split_once(TOPIC_DELIMITER).ok_or_else(|| {
                GenerationError::ParseFailure(format!("missing '{TOPIC_DELIMITER}' in {text:?}"))
            })?;
            let content = content.trim();
            if content.is_empty() {
                return Err(GenerationError::ParseFailure(format!(
                    "empty content in {text:?}"
                )));
            }
            let mut topics: Vec<String> = topics_part
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            if topics.is_empty() {
                topics = requested_topics.to_vec();
            }
            Ok(Candidate::new(content.to_string(), topics, text.to_string()))
        }
        PromptMode::Cold => {
            let content = text.trim();
            if content.is_empty() {
                return Err(GenerationError::LengthExhausted);
            }
            Ok(Candidate::new(
                content.to_string(),
                requested_topics.to_vec(),
                text.to_string(),
            ))
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Engine
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct CompletionEngine {
    classifier: ProfanityClassifier,
}

impl CompletionEngine {
    pub fn new(classifier: ProfanityClassifier) -> Self {
        Self { classifier }
    }

    /// Issues `parallel_completions` independent calls concurrently. Any failure fails
    /// the batch; a rate limit wins over other errors since it is not retried.
    pub async fn complete(
        &self,
        backend: &CompletionBackend,
        prompt: &BuiltPrompt,
        request: &GenerationRequest,
    ) -> Result<Vec<String>, GenerationError> {
        // Grounded prompts end on an example; open a fresh line for the model to fill.
        let text = match prompt.mode {
            PromptMode::Grounded => format!("{}{LINE_STOP}", prompt.text),
            PromptMode::Cold => prompt.text.clone(),
        };

        let calls = (0..request.parallel_completions.max(1)).map(|_| backend.call(&text));
        let results = join_all(calls).await;

        let mut outputs = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(output) => outputs.push(output),
                Err(err @ GenerationError::RateLimited(_)) => return Err(err),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(outputs),
        }
    }

    /// Completes, parses and (when required) classifies every candidate.
    pub async fn candidates(
        &self,
        backend: &CompletionBackend,
        prompt: &BuiltPrompt,
        request: &GenerationRequest,
    ) -> Result<Vec<Candidate>, GenerationError> {
        let outputs = self.complete(backend, prompt, request).await?;

        let mut candidates = outputs
            .iter()
            .map(|text| parse_candidate(text, prompt.mode, &request.topics))
            .collect::<Result<Vec<_>, _>>()?;

        let classify = request.parallel_completions > 1
            || request.profanity_threshold != ProfanityThreshold::Open;
        if !classify {
            return Ok(candidates);
        }

        let scores = join_all(candidates.iter().map(|c| {
            self.classifier
                .classify(&c.raw, &request.classification_model_id)
        }))
        .await;

        for (candidate, score) in candidates.iter_mut().zip(scores) {
            match score {
                Ok(score) => candidate.score(score, request.profanity_threshold),
                Err(err) => {
                    warn!("Classification failed: {err}");
                    return Err(err.into());
                }
            }
        }

        debug!(
            "Scored {} candidates: {:?}",
            candidates.len(),
            candidates
                .iter()
                .map(|c| c.classification_score)
                .collect::<Vec<_>>()
        );

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{CompletionResponse, FinishReason, LlmError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn topics(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    /// Returns the completion text for regular prompts and `label` for classifier prompts.
    struct Scripted {
        text: String,
        finish_reason: FinishReason,
        label: String,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(text: &str, label: &str) -> Arc<Self> {
            Arc::new(Self {
                text: text.to_string(),
                finish_reason: FinishReason::Stop,
                label: label.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextCompletion for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            if request.logprobs.is_some() {
                return Ok(CompletionResponse {
                    text: self.label.clone(),
                    finish_reason: FinishReason::Length,
                    top_logprobs: None,
                });
            }
            Ok(CompletionResponse {
                text: self.text.clone(),
                finish_reason: self.finish_reason,
                top_logprobs: None,
            })
        }
    }

    fn engine(llm: Arc<Scripted>) -> (CompletionEngine, CompletionBackend) {
        let engine = CompletionEngine::new(ProfanityClassifier::new(llm.clone()));
        let backend = CompletionBackend::new(BackendKind::HostedBase, "davinci-codex".into(), llm);
        (engine, backend)
    }

    fn grounded(text: &str) -> BuiltPrompt {
        BuiltPrompt {
            text: text.to_string(),
            mode: PromptMode::Grounded,
        }
    }

    #[test]
    fn test_parse_grounded_completion() {
        let candidate = parse_candidate(
            "topicA,topicB ### Hello world",
            PromptMode::Grounded,
            &topics(&["x"]),
        )
        .unwrap();
        assert_eq!(candidate.topics, topics(&["topicA", "topicB"]));
        assert_eq!(candidate.conversation_starter, "Hello world");
    }

    #[test]
    fn test_parse_grounded_without_delimiter_fails() {
        let err = parse_candidate("Hello world", PromptMode::Grounded, &topics(&["x"])).unwrap_err();
        assert!(matches!(err, GenerationError::ParseFailure(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_grounded_empty_topics_falls_back_to_request() {
        let candidate =
            parse_candidate(" ### Why?", PromptMode::Grounded, &topics(&["life"])).unwrap();
        assert_eq!(candidate.topics, topics(&["life"]));
    }

    #[test]
    fn test_parse_cold_uses_text_verbatim() {
        let candidate = parse_candidate(
            "  What would you do with a free day? ",
            PromptMode::Cold,
            &topics(&["leisure"]),
        )
        .unwrap();
        assert_eq!(candidate.conversation_starter, "What would you do with a free day?");
        assert_eq!(candidate.topics, topics(&["leisure"]));
    }

    #[test]
    fn test_backend_row_budgets() {
        assert_eq!(BackendKind::HostedBase.prompt_rows(), 60);
        assert_eq!(BackendKind::HostedFineTuned.prompt_rows(), 1);
        assert_eq!(BackendKind::Local.prompt_rows(), 5);
        assert_eq!("custom".parse::<BackendKind>(), Ok(BackendKind::Local));
    }

    #[test]
    fn test_candidate_serializes_camel_case() {
        let mut candidate = Candidate::new("Hi?".into(), topics(&["a"]), "a ### Hi?".into());
        candidate.score(1, ProfanityThreshold::Strict);
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(value["conversationStarter"], "Hi?");
        assert_eq!(value["classification"], 1);
        assert_eq!(value["profane"], true);
        assert!(value.get("raw").is_none());
        assert!(value.get("brokenGrammar").is_none());
    }

    #[tokio::test]
    async fn test_length_finish_reason_is_exhaustion() {
        let llm = Arc::new(Scripted {
            text: "cut off".to_string(),
            finish_reason: FinishReason::Length,
            label: "0".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let (_, backend) = engine(llm);
        let err = backend.call("prompt").await.unwrap_err();
        assert!(matches!(err, GenerationError::LengthExhausted));
    }

    #[tokio::test]
    async fn test_grounded_prompt_opens_a_new_line() {
        let llm = Scripted::new("a ### b", "0");
        let (engine, backend) = engine(llm.clone());
        let request = GenerationRequest::new(topics(&["a"]), "m".into(), "c".into())
            .unwrap()
            .with_profanity_threshold(ProfanityThreshold::Open);

        engine
            .complete(&backend, &grounded("a ### example"), &request)
            .await
            .unwrap();

        assert_eq!(llm.prompts.lock().unwrap()[0], "a ### example\n");
    }

    #[tokio::test]
    async fn test_single_open_candidate_is_not_classified() {
        let llm = Scripted::new("a ### Hello there", "2");
        let (engine, backend) = engine(llm.clone());
        let request = GenerationRequest::new(topics(&["a"]), "m".into(), "c".into())
            .unwrap()
            .with_profanity_threshold(ProfanityThreshold::Open);

        let candidates = engine
            .candidates(&backend, &grounded("a ### x"), &request)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].classification_score, None);
        assert_eq!(llm.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_parallel_candidates_are_all_classified() {
        let llm = Scripted::new("a ### Hello there", "1");
        let (engine, backend) = engine(llm.clone());
        let request = GenerationRequest::new(topics(&["a"]), "m".into(), "c".into())
            .unwrap()
            .with_profanity_threshold(ProfanityThreshold::Open)
            .with_parallel_completions(3);

        let candidates = engine
            .candidates(&backend, &grounded("a ### x"), &request)
            .await
            .unwrap();

        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.classification_score == Some(1) && !c.profane));
        assert_eq!(llm.prompts.lock().unwrap().len(), 6);
    }
}
