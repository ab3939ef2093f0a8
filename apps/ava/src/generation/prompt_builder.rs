//! Prompt Builder — turns the example corpus into a few-shot prompt for a set of topics.
//!
//! The corpus is sparse relative to the topics people ask for, so we oversample it
//! (with replacement) and keep whatever intersects the requested topics.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::corpus::ExampleCorpus;
use crate::generation::prompts::{example_line, topic_suffix};
use crate::models::example::ExampleRecord;

/// Number of records drawn from the corpus per prompt.
pub const SAMPLE_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Examples share a topic with the request; completions come back as `topics ### content`.
    Grounded,
    /// No example matched; the prompt ends with an open `topics ###` line and the
    /// completion is the content alone.
    Cold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub text: String,
    pub mode: PromptMode,
}

pub fn build_prompt<R: Rng + ?Sized>(
    corpus: &ExampleCorpus,
    topics: &[String],
    rows: usize,
    rng: &mut R,
) -> BuiltPrompt {
    let sample: Vec<&ExampleRecord> = (0..SAMPLE_SIZE)
        .filter_map(|_| corpus.records().choose(rng))
        .collect();

    let grounded: Vec<String> = sample
        .iter()
        .filter(|e| e.topics.iter().any(|t| topics.contains(t)))
        .take(rows)
        .map(|e| example_line(&e.topics, &e.content))
        .collect();

    if !grounded.is_empty() {
        return BuiltPrompt {
            text: grounded.join("\n"),
            mode: PromptMode::Grounded,
        };
    }

    let mut lines: Vec<String> = sample
        .iter()
        .take(rows)
        .map(|e| example_line(&e.topics, &e.content))
        .collect();
    lines.push(topic_suffix(topics));

    BuiltPrompt {
        text: lines.join("\n"),
        mode: PromptMode::Cold,
    }
}
