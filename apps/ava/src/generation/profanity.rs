//! Profanity Classifier — one content-filter call per text, resolved to a 0/1/2 label.
//!
//! 0 = safe, 1 = sensitive, 2 = unsafe. The filter over-predicts "2" at low confidence,
//! so a low-confidence "2" falls back to the more likely of "0" and "1".

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::generation::prompts::classification_prompt;
use crate::llm_client::{CompletionRequest, LlmError, TextCompletion};

/// Log-probability below which a "2" label is not trusted.
pub const TOXIC_THRESHOLD: f64 = -0.355;

/// Label used whenever the classifier answer cannot be trusted or parsed.
pub const UNSAFE: u8 = 2;

/// How much sensitive content a caller tolerates. A candidate is profane when its
/// classification score is strictly greater than `cutoff()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfanityThreshold {
    Open,
    #[default]
    Tolerant,
    Strict,
}

impl ProfanityThreshold {
    fn ordinal(self) -> u8 {
        match self {
            ProfanityThreshold::Open => 1,
            ProfanityThreshold::Tolerant => 2,
            ProfanityThreshold::Strict => 3,
        }
    }

    /// open → 2, tolerant → 1, strict → 0
    pub fn cutoff(self) -> u8 {
        3 - self.ordinal()
    }

    pub fn is_profane(self, score: u8) -> bool {
        score > self.cutoff()
    }
}

impl FromStr for ProfanityThreshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(ProfanityThreshold::Open),
            "tolerant" => Ok(ProfanityThreshold::Tolerant),
            "strict" => Ok(ProfanityThreshold::Strict),
            other => Err(format!("unknown profanity threshold '{other}'")),
        }
    }
}

impl fmt::Display for ProfanityThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProfanityThreshold::Open => "open",
            ProfanityThreshold::Tolerant => "tolerant",
            ProfanityThreshold::Strict => "strict",
        };
        f.write_str(name)
    }
}

/// Resolves the classifier's raw answer into a label.
///
/// A "2" whose log-probability is below `toxic_threshold` is replaced by the more
/// probable of "0"/"1" (whichever is present). Anything outside {"0","1","2"} is 2.
pub fn resolve_label(
    output_label: &str,
    top_logprobs: Option<&HashMap<String, f64>>,
    toxic_threshold: f64,
) -> u8 {
    let mut label = output_label;

    if label == "2" {
        if let Some(logprobs) = top_logprobs {
            let confident = logprobs
                .get("2")
                .map(|lp| *lp >= toxic_threshold)
                .unwrap_or(false);

            if !confident {
                label = match (logprobs.get("0"), logprobs.get("1")) {
                    (Some(lp0), Some(lp1)) if lp0 >= lp1 => "0",
                    (Some(_), Some(_)) => "1",
                    (Some(_), None) => "0",
                    (None, Some(_)) => "1",
                    (None, None) => "2",
                };
            }
        }
    }

    match label {
        "0" => 0,
        "1" => 1,
        _ => UNSAFE,
    }
}

/// Wraps the content-filter model behind the shared completion seam.
#[derive(Clone)]
pub struct ProfanityClassifier {
    llm: Arc<dyn TextCompletion>,
}

impl ProfanityClassifier {
    pub fn new(llm: Arc<dyn TextCompletion>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, text: &str, model: &str) -> Result<u8, LlmError> {
        let request = CompletionRequest {
            model: model.to_string(),
            prompt: classification_prompt(text),
            temperature: 0.0,
            max_tokens: 1,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: Vec::new(),
            logprobs: Some(10),
        };

        let response = self.llm.complete(&request).await?;
        let score = resolve_label(
            &response.text,
            response.top_logprobs.as_ref(),
            TOXIC_THRESHOLD,
        );
        debug!("Classified {:?} as {} (raw label {:?})", text, score, response.text);
        Ok(score)
    }
}
