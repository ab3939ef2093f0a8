//! Grammar Fixer — optional correction pass over a chosen starter.
//!
//! The corrector occasionally degenerates the text instead of fixing it; such
//! corrections are rejected and the original text is kept.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::generation::prompts::grammar_fix_input;
use crate::llm_client::inference::InferenceClient;
use crate::llm_client::LlmError;

/// Corrections shorter than this are discarded.
pub const MIN_CORRECTED_CHARS: usize = 20;
/// Corrections less similar than this to the original are discarded.
pub const MIN_SIMILARITY: f64 = 0.5;

/// A sentence-correction model.
#[async_trait]
pub trait GrammarModel: Send + Sync {
    async fn correct(&self, input: &str) -> Result<String, LlmError>;
}

#[async_trait]
impl GrammarModel for InferenceClient {
    async fn correct(&self, input: &str) -> Result<String, LlmError> {
        self.query(input, None).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixOutcome {
    Corrected(String),
    Rejected,
}

#[derive(Clone)]
pub struct GrammarFixer {
    model: Arc<dyn GrammarModel>,
}

impl GrammarFixer {
    pub fn new(model: Arc<dyn GrammarModel>) -> Self {
        Self { model }
    }

    /// Never fails: a transport error counts as a rejection.
    pub async fn fix(&self, text: &str) -> FixOutcome {
        let corrected = match self.model.correct(&grammar_fix_input(text)).await {
            Ok(corrected) => corrected.trim().to_string(),
            Err(e) => {
                warn!("Grammar correction failed, keeping original: {e}");
                return FixOutcome::Rejected;
            }
        };
        judge_correction(text, corrected)
    }
}

/// Accepts `corrected` unless it is too short or drifted too far from `original`.
pub fn judge_correction(original: &str, corrected: String) -> FixOutcome {
    let chars = corrected.chars().count();
    if chars < MIN_CORRECTED_CHARS {
        debug!("Rejected correction {corrected:?}: {chars} chars");
        return FixOutcome::Rejected;
    }
    let similarity = string_similarity(original, &corrected);
    if similarity < MIN_SIMILARITY {
        debug!("Rejected correction {corrected:?}: similarity {similarity:.2}");
        return FixOutcome::Rejected;
    }
    FixOutcome::Corrected(corrected)
}

/// Levenshtein ratio: 1.0 for identical strings, 0.0 for entirely different ones.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
