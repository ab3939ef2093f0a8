use anyhow::{anyhow, Context, Result};

use crate::generation::profanity::ProfanityThreshold;
use crate::llm_client::DEFAULT_BASE_URL;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub openai_key: String,
    pub openai_org: String,
    pub openai_base_url: String,
    /// Self-hosted completion model; the `local` backend is unavailable without it.
    pub local_completion_url: Option<String>,
    /// Grammar corrector endpoint; grammar fixing is unavailable without it.
    pub grammar_model_url: Option<String>,
    pub completion_model: String,
    pub fine_tuned_model: Option<String>,
    pub classification_model: String,
    /// Defaults applied to RPC requests, which only carry topics.
    pub profanity_threshold: ProfanityThreshold,
    pub fix_grammar: bool,
    pub corpus_confirmed_only: bool,
    pub watch_documents: bool,
    pub worker_concurrency: usize,
    /// Ceiling on a document's `parallel_completions`.
    pub max_parallel_completions: usize,
    pub generation_seed: Option<u64>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            openai_key: require_env("OPENAI_KEY")?,
            openai_org: require_env("OPENAI_ORG")?,
            openai_base_url: optional_env("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            local_completion_url: optional_env("LOCAL_COMPLETION_URL"),
            grammar_model_url: optional_env("GRAMMAR_MODEL_URL"),
            completion_model: optional_env("COMPLETION_MODEL")
                .unwrap_or_else(|| "davinci-codex".to_string()),
            fine_tuned_model: optional_env("FINE_TUNED_MODEL"),
            classification_model: optional_env("CLASSIFICATION_MODEL")
                .unwrap_or_else(|| "content-filter-alpha".to_string()),
            profanity_threshold: match optional_env("PROFANITY_THRESHOLD") {
                Some(v) => v
                    .parse()
                    .map_err(|e: String| anyhow!(e))
                    .context("PROFANITY_THRESHOLD must be open, tolerant or strict")?,
                None => ProfanityThreshold::default(),
            },
            fix_grammar: parse_env("FIX_GRAMMAR", false)?,
            corpus_confirmed_only: parse_env("CORPUS_CONFIRMED_ONLY", false)?,
            watch_documents: parse_env("WATCH_DOCUMENTS", true)?,
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 4usize)?.max(1),
            max_parallel_completions: parse_env("MAX_PARALLEL_COMPLETIONS", 8usize)?.max(1),
            generation_seed: optional_env("GENERATION_SEED")
                .map(|v| v.parse::<u64>())
                .transpose()
                .context("GENERATION_SEED must be an unsigned integer")?,
            port: parse_env("PORT", 8080u16)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{v}'")),
        None => Ok(default),
    }
}
