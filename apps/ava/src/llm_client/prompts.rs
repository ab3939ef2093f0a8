// Prompt fragments shared by every caller of the hosted API.
// Each pipeline stage that needs its own wording defines it in generation/prompts.rs.

/// Sentinel the content classifier expects in front of the text to classify.
pub const CLASSIFIER_SENTINEL: &str = "<|endoftext|>";

/// Suffix after which the content classifier emits its single-token label.
pub const CLASSIFIER_SUFFIX: &str = "\n--\nLabel:";

/// Stop sequence for single-line completions.
pub const LINE_STOP: &str = "\n";
