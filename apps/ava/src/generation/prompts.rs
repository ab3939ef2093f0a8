// Prompt constants for the conversation starter pipeline.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::llm_client::prompts::{CLASSIFIER_SENTINEL, CLASSIFIER_SUFFIX};

/// Separates the topics of an example from its content: `"<topics> ### <content>"`.
pub const TOPIC_DELIMITER: &str = "###";

/// Grammar corrector instruction template. Replace `{sentence}` before sending.
pub const GRAMMAR_FIX_TEMPLATE: &str = "fix: { {sentence} } </s>";

/// Formats one few-shot line.
pub fn example_line(topics: &[String], content: &str) -> String {
    format!("{} {TOPIC_DELIMITER} {}", topics.join(","), content)
}

/// The open line the model continues in cold mode.
pub fn topic_suffix(topics: &[String]) -> String {
    format!("{} {TOPIC_DELIMITER}", topics.join(","))
}

pub fn classification_prompt(text: &str) -> String {
    format!("{CLASSIFIER_SENTINEL}{text}{CLASSIFIER_SUFFIX}")
}

pub fn grammar_fix_input(sentence: &str) -> String {
    GRAMMAR_FIX_TEMPLATE.replace("{sentence}", sentence)
}
