//! Axum route handlers for the Conversation Starter API.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConversationStarterRequest {
    #[serde(default)]
    pub topics: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStarterResponse {
    pub conversation_starter: String,
    pub topics: Vec<String>,
}

/// POST /v1/conversation/starter
///
/// GetConversationStarter: generates one starter for the given topics using the
/// service defaults (hosted base model, configured threshold and grammar setting).
pub async fn handle_get_conversation_starter(
    State(state): State<AppState>,
    Json(request): Json<ConversationStarterRequest>,
) -> Result<Json<ConversationStarterResponse>, AppError> {
    let request = state.default_request(request.topics)?;
    info!("GetConversationStarter for topics {:?}", request.topics);

    let result = state.generator.generate(&request).await?;

    Ok(Json(ConversationStarterResponse {
        conversation_starter: result.selected.conversation_starter,
        topics: result.selected.topics,
    }))
}
