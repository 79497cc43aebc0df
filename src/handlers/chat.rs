use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{BusinessDetails, ConversationTurn};
use crate::services::auth::UserIdentity;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ChatMessage {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub is_audio_input: bool,
    /// Identity of the signed-in user for this message; omitted means signed out.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub session_id: String,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub state: &'static str,
    pub turns: Vec<ConversationTurn>,
}

// POST /api/chat/message
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatMessage>,
) -> Result<Response, AppError> {
    let session_id = payload.session_id.trim();
    let message = payload.message.trim();

    let session = state.session(session_id);
    let mut engine = session
        .engine
        .try_lock()
        .map_err(|_| AppError::RateLimited(format!("session {session_id} already has a turn in progress")))?;

    match payload.user_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        Some(user_id) => session.auth.sign_in(UserIdentity {
            user_id: user_id.to_string(),
            email: payload.user_email.clone().filter(|e| !e.is_empty()),
        }),
        None => session.auth.sign_out(),
    }

    let response = match engine.generate_response(message, payload.is_audio_input).await {
        Ok(reply) => ChatResponse {
            reply,
            success: true,
            error: None,
        },
        Err(e) => {
            tracing::error!(session_id, error = %e, "conversation turn failed");
            ChatResponse {
                reply: String::new(),
                success: false,
                error: Some(e.to_string()),
            }
        }
    };

    Ok(Json(response).into_response())
}

// POST /api/chat/reset
pub async fn reset_chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let session = state
        .existing_session(&payload.session_id)
        .ok_or_else(|| AppError::NotFound(format!("session {}", payload.session_id)))?;

    let mut engine = session
        .engine
        .try_lock()
        .map_err(|_| AppError::RateLimited(format!("session {} already has a turn in progress", payload.session_id)))?;
    engine.reset_chat();

    Ok(Json(serde_json::json!({ "success": true })))
}

// GET /api/chat/history/:session_id
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let session = state
        .existing_session(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;

    let engine = session
        .engine
        .try_lock()
        .map_err(|_| AppError::RateLimited(format!("session {session_id} already has a turn in progress")))?;

    Ok(Json(HistoryResponse {
        state: engine.state().as_str(),
        turns: engine.history().to_vec(),
        session_id,
    }))
}

// GET /api/directory
pub async fn get_directory(State(state): State<Arc<AppState>>) -> Result<Json<Vec<BusinessDetails>>, AppError> {
    let businesses = state.directory().list_businesses_with_details().await?;
    Ok(Json(businesses))
}
