use crate::config::Config;
use crate::generation::error::GenerationError;
use crate::generation::generator::{GenerationRequest, Generator};

/// Runtime context built once at startup and cloned into every handler and worker.
/// Holds no mutable state: the corpus and model clients live inside `Generator`.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub generator: Generator,
}

impl AppState {
    /// A request for `topics` carrying the service-wide defaults.
    pub fn default_request(&self, topics: Vec<String>) -> Result<GenerationRequest, GenerationError> {
        Ok(GenerationRequest::new(
            topics,
            self.config.completion_model.clone(),
            self.config.classification_model.clone(),
        )?
        .with_profanity_threshold(self.config.profanity_threshold)
        .with_fix_grammar(self.config.fix_grammar))
    }
}
