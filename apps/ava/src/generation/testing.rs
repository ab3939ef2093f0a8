//! Scripted backends shared by the pipeline and adapter tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::corpus::ExampleCorpus;
use crate::generation::generator::Generator;
use crate::llm_client::{CompletionRequest, CompletionResponse, FinishReason, LlmError, TextCompletion};
use crate::models::example::ExampleRecord;

/// Serves queued responses first, then repeats the fallback forever. Classifier calls
/// (those asking for logprobs) are answered from a separate label queue.
pub struct MockLlm {
    completions: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
    fallback: CompletionResponse,
    labels: Mutex<VecDeque<String>>,
    fallback_label: String,
    pub completion_calls: AtomicUsize,
    pub classification_calls: AtomicUsize,
}

impl MockLlm {
    pub fn answering(text: &str) -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            fallback: stop(text),
            labels: Mutex::new(VecDeque::new()),
            fallback_label: "0".to_string(),
            completion_calls: AtomicUsize::new(0),
            classification_calls: AtomicUsize::new(0),
        }
    }

    pub fn truncating() -> Self {
        let mut mock = Self::answering("cut");
        mock.fallback.finish_reason = FinishReason::Length;
        mock
    }

    pub fn then(self, response: Result<CompletionResponse, LlmError>) -> Self {
        self.completions.lock().unwrap().push_back(response);
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.fallback_label = label.to_string();
        self
    }

    pub fn with_labels(self, labels: &[&str]) -> Self {
        self.labels
            .lock()
            .unwrap()
            .extend(labels.iter().map(|l| l.to_string()));
        self
    }

    pub fn completions(&self) -> usize {
        self.completion_calls.load(Ordering::SeqCst)
    }

    pub fn classifications(&self) -> usize {
        self.classification_calls.load(Ordering::SeqCst)
    }
}

pub fn stop(text: &str) -> CompletionResponse {
    CompletionResponse {
        text: text.to_string(),
        finish_reason: FinishReason::Stop,
        top_logprobs: None,
    }
}

#[async_trait]
impl TextCompletion for MockLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if request.logprobs.is_some() {
            self.classification_calls.fetch_add(1, Ordering::SeqCst);
            let label = self
                .labels
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback_label.clone());
            return Ok(CompletionResponse {
                text: label,
                finish_reason: FinishReason::Length,
                top_logprobs: None,
            });
        }

        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

pub fn philosophy_corpus() -> Arc<ExampleCorpus> {
    Arc::new(ExampleCorpus::new(vec![
        ExampleRecord::new("1", &["philosophy"], "What is truth?"),
        ExampleRecord::new("2", &["travel"], "Where would you go tomorrow?"),
    ]))
}

pub fn generator(llm: Arc<MockLlm>) -> Generator {
    Generator::new(philosophy_corpus(), llm).with_seed(11)
}
