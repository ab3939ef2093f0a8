use thiserror::Error;

use crate::llm_client::LlmError;

/// Everything that can go wrong while generating a conversation starter.
///
/// `LengthExhausted`, `ParseFailure` and `Backend` are noise: the orchestrator absorbs
/// them in its attempt loop. The rest surface to the adapters.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Completion was truncated or empty")]
    LengthExhausted,

    #[error("Malformed completion: {0}")]
    ParseFailure(String),

    #[error("Every candidate was filtered as profane")]
    AllProfane,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("No suitable response found after {attempts} attempts")]
    NotFound { attempts: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl GenerationError {
    /// True for failures the attempt loop retries.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationError::LengthExhausted
                | GenerationError::ParseFailure(_)
                | GenerationError::Backend(_)
        )
    }
}

impl From<LlmError> for GenerationError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::RateLimited { message } => GenerationError::RateLimited(message),
            other => GenerationError::Backend(other.to_string()),
        }
    }
}
