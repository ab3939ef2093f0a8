// Conversation starter generation pipeline.
// Implements: prompt building, completion, profanity classification, grammar fixing,
// and the retrying orchestrator. All model calls go through llm_client.

pub mod completion;
pub mod error;
pub mod generator;
pub mod grammar;
pub mod handlers;
pub mod profanity;
pub mod prompt_builder;
pub mod prompts;

#[cfg(test)]
pub mod testing;
