//! Conversation Starter Generation — orchestrates the full pipeline.
//!
//! Each attempt runs: build prompt → request completions → parse candidates →
//! classify → filter profane → fix grammar → select best. An attempt ends as
//! `Done`, `Retry` (completion noise) or `Fatal` (reported to the caller), and the
//! loop gives up with `NotFound` after `MAX_ATTEMPTS`.

use std::sync::Arc;

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{info, warn};

use crate::corpus::ExampleCorpus;
use crate::generation::completion::{BackendKind, Candidate, CompletionBackend, CompletionEngine};
use crate::generation::error::GenerationError;
use crate::generation::grammar::{FixOutcome, GrammarFixer};
use crate::generation::profanity::{ProfanityClassifier, ProfanityThreshold};
use crate::generation::prompt_builder::build_prompt;
use crate::llm_client::TextCompletion;

/// Attempt ceiling. There is no backoff: the ceiling alone bounds latency.
pub const MAX_ATTEMPTS: u32 = 5;

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

/// One generation invocation. Built once by an adapter and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub topics: Vec<String>,
    pub prompt_rows: usize,
    pub profanity_threshold: ProfanityThreshold,
    pub fix_grammar: bool,
    pub parallel_completions: usize,
    pub completion_backend: BackendKind,
    pub completion_model_id: String,
    pub classification_model_id: String,
}

impl GenerationRequest {
    /// Trims and deduplicates `topics`; rejects the request if none remain.
    pub fn new(
        topics: Vec<String>,
        completion_model_id: String,
        classification_model_id: String,
    ) -> Result<Self, GenerationError> {
        let mut normalized: Vec<String> = Vec::with_capacity(topics.len());
        for topic in topics {
            let topic = topic.trim();
            if !topic.is_empty() && !normalized.iter().any(|t| t == topic) {
                normalized.push(topic.to_string());
            }
        }
        if normalized.is_empty() {
            return Err(GenerationError::InvalidArgument(
                "No topics in request".to_string(),
            ));
        }

        let backend = BackendKind::default();
        Ok(Self {
            topics: normalized,
            prompt_rows: backend.prompt_rows(),
            profanity_threshold: ProfanityThreshold::default(),
            fix_grammar: false,
            parallel_completions: 1,
            completion_backend: backend,
            completion_model_id,
            classification_model_id,
        })
    }

    /// Switches backend and resets the prompt rows to that backend's budget.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.completion_backend = backend;
        self.prompt_rows = backend.prompt_rows();
        self
    }

    pub fn with_profanity_threshold(mut self, threshold: ProfanityThreshold) -> Self {
        self.profanity_threshold = threshold;
        self
    }

    pub fn with_fix_grammar(mut self, fix_grammar: bool) -> Self {
        self.fix_grammar = fix_grammar;
        self
    }

    pub fn with_parallel_completions(mut self, n: usize) -> Self {
        self.parallel_completions = n.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub selected: Candidate,
    pub all_candidates: Vec<Candidate>,
}

/// How a single attempt ended.
#[derive(Debug)]
pub enum AttemptOutcome {
    Done(GenerationResult),
    Retry(GenerationError),
    Fatal(GenerationError),
}

// ────────────────────────────────────────────────────────────────────────────
// Generator
// ────────────────────────────────────────────────────────────────────────────

/// Shared, immutable pipeline: corpus plus the model clients. Cheap to clone.
#[derive(Clone)]
pub struct Generator {
    corpus: Arc<ExampleCorpus>,
    engine: CompletionEngine,
    hosted: Arc<dyn TextCompletion>,
    local: Option<Arc<dyn TextCompletion>>,
    grammar: Option<GrammarFixer>,
    seed: Option<u64>,
}

impl Generator {
    /// `hosted` serves base and fine-tuned completions as well as classification.
    pub fn new(corpus: Arc<ExampleCorpus>, hosted: Arc<dyn TextCompletion>) -> Self {
        Self {
            corpus,
            engine: CompletionEngine::new(ProfanityClassifier::new(hosted.clone())),
            hosted,
            local: None,
            grammar: None,
            seed: None,
        }
    }

    pub fn with_local(mut self, local: Arc<dyn TextCompletion>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_grammar(mut self, fixer: GrammarFixer) -> Self {
        self.grammar = Some(fixer);
        self
    }

    /// Makes prompt sampling and tie-breaking reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn backend_for(&self, request: &GenerationRequest) -> Result<CompletionBackend, GenerationError> {
        let client = match request.completion_backend {
            BackendKind::HostedBase | BackendKind::HostedFineTuned => self.hosted.clone(),
            BackendKind::Local => self.local.clone().ok_or_else(|| {
                GenerationError::InvalidArgument("Local completion backend is not configured".to_string())
            })?,
        };
        Ok(CompletionBackend::new(
            request.completion_backend,
            request.completion_model_id.clone(),
            client,
        ))
    }

    /// Runs attempts until one succeeds, one fails fatally, or the ceiling is hit.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
        let backend = self.backend_for(request)?;
        if request.fix_grammar && self.grammar.is_none() {
            return Err(GenerationError::InvalidArgument(
                "Grammar fixing is not configured".to_string(),
            ));
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&backend, request, &mut rng).await {
                AttemptOutcome::Done(result) => {
                    info!(
                        "Generated starter for {:?} with {} on attempt {}/{} ({} candidates, threshold {})",
                        request.topics,
                        backend.kind,
                        attempt,
                        MAX_ATTEMPTS,
                        result.all_candidates.len(),
                        request.profanity_threshold
                    );
                    return Ok(result);
                }
                AttemptOutcome::Retry(reason) => {
                    warn!(
                        "Generation attempt {}/{} for {:?} failed: {}; retrying",
                        attempt, MAX_ATTEMPTS, request.topics, reason
                    );
                }
                AttemptOutcome::Fatal(err) => return Err(err),
            }
        }

        Err(GenerationError::NotFound {
            attempts: MAX_ATTEMPTS,
        })
    }

    /// One pass through the pipeline.
    pub async fn attempt<R: Rng + Send>(
        &self,
        backend: &CompletionBackend,
        request: &GenerationRequest,
        rng: &mut R,
    ) -> AttemptOutcome {
        let prompt = build_prompt(&self.corpus, &request.topics, request.prompt_rows, rng);

        let mut candidates = match self.engine.candidates(backend, &prompt, request).await {
            Ok(candidates) => candidates,
            Err(err) if err.is_transient() => return AttemptOutcome::Retry(err),
            Err(err) => return AttemptOutcome::Fatal(err),
        };

        if candidates.iter().all(|c| c.profane) {
            return AttemptOutcome::Fatal(GenerationError::AllProfane);
        }

        if request.fix_grammar {
            if let Some(fixer) = &self.grammar {
                fix_survivors(fixer, &mut candidates).await;
            }
        }

        let survivors: Vec<&Candidate> = candidates.iter().filter(|c| !c.profane).collect();
        match select_best(&survivors, rng) {
            Some(selected) => {
                let selected = selected.clone();
                AttemptOutcome::Done(GenerationResult {
                    selected,
                    all_candidates: candidates,
                })
            }
            None => AttemptOutcome::Fatal(GenerationError::AllProfane),
        }
    }
}

/// Corrects every non-profane candidate concurrently; rejected corrections leave the
/// candidate untouched.
async fn fix_survivors(fixer: &GrammarFixer, candidates: &mut [Candidate]) {
    let outcomes = join_all(
        candidates
            .iter()
            .filter(|c| !c.profane)
            .map(|c| fixer.fix(&c.conversation_starter)),
    )
    .await;

    for (candidate, outcome) in candidates.iter_mut().filter(|c| !c.profane).zip(outcomes) {
        if let FixOutcome::Corrected(text) = outcome {
            let original = std::mem::replace(&mut candidate.conversation_starter, text);
            candidate.broken_grammar = Some(original);
        }
    }
}

/// Highest classification score wins (absent counts as 0); ties are broken uniformly
/// at random.
pub fn select_best<'a, R: Rng + ?Sized>(
    survivors: &[&'a Candidate],
    rng: &mut R,
) -> Option<&'a Candidate> {
    let best = survivors
        .iter()
        .map(|c| c.classification_score.unwrap_or(0))
        .max()?;
    let top: Vec<&'a Candidate> = survivors
        .iter()
        .copied()
        .filter(|c| c.classification_score.unwrap_or(0) == best)
        .collect();
    top.choose(rng).copied()
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
