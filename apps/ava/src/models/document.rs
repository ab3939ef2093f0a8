use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// A row of `conversation_starter_requests` as written by clients.
/// Every field other than `topics` is optional and falls back to service defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct StarterDocumentRow {
    pub id: Uuid,
    pub topics: Vec<String>,
    pub fix_grammar: Option<bool>,
    pub parallel_completions: Option<i32>,
    pub completion_type: Option<String>,
    pub profanity_threshold: Option<String>,
    pub api_completion_model: Option<String>,
    pub api_classification_model: Option<String>,
    pub personas: Option<Vec<String>>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Lifecycle of a request document. `None` in the table means "not yet claimed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Processing,
    Processed,
    Error,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Processing => "processing",
            DocumentState::Processed => "processed",
            DocumentState::Error => "error",
        }
    }
}

/// Output fields written back onto a request document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentUpdate {
    pub id: Uuid,
    pub state: DocumentState,
    pub content: Option<String>,
    pub conversation_starters: Option<Value>,
    pub error: Option<String>,
    pub developer_message: Option<String>,
}
