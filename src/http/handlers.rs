use super::state::AppState;
use crate::chat::SelectionSnapshot;
use crate::error::SessionError;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenConversationRequest {
    /// `None` starts a blank conversation
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,

    /// Undelivered message text, for resubmission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            draft: None,
        }
    }
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(error))).into_response()
}

fn session_error_response(err: SessionError) -> Response {
    match err {
        SessionError::Dependency { reason, draft } => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse {
                error: format!("Failed to create new chat: {}", reason),
                draft: Some(draft),
            }),
        )
            .into_response(),
        SessionError::Connectivity(_) => error_response(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        SessionError::Permission(_) | SessionError::Decode(_) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /chat
/// Current chat snapshot
pub async fn get_chat(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.chat.snapshot()))
}

/// POST /chat/messages
/// Send a message (with the pending quote, if any)
pub async fn send_message(State(state): State<AppState>, Json(req): Json<SendMessageRequest>) -> Response {
    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Message text is empty");
    }

    info!("Sending message ({} chars)", req.text.chars().count());

    match state.chat.send(req.text).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(state.chat.snapshot())).into_response(),
        Err(e) => {
            warn!("Send failed: {}", e);
            session_error_response(e)
        }
    }
}

/// POST /chat/selection
/// Report the current text selection
pub async fn update_selection(State(state): State<AppState>, Json(selection): Json<SelectionSnapshot>) -> Response {
    match state.chat.select(selection).await {
        Ok(highlight) => (StatusCode::OK, Json(highlight)).into_response(),
        Err(e) => session_error_response(e),
    }
}

/// POST /chat/quote
/// Quote the current selection into the next message
pub async fn confirm_quote(State(state): State<AppState>) -> Response {
    match state.chat.confirm_quote().await {
        Ok(Some(quote)) => (StatusCode::OK, Json(quote)).into_response(),
        Ok(None) => error_response(StatusCode::CONFLICT, "No quotable text is selected"),
        Err(e) => session_error_response(e),
    }
}

/// DELETE /chat/quote
/// Drop the pending quote
pub async fn dismiss_quote(State(state): State<AppState>) -> Response {
    match state.chat.dismiss_quote().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => session_error_response(e),
    }
}

/// POST /chat/conversation
/// Switch to another conversation (full session reset)
pub async fn open_conversation(
    State(state): State<AppState>,
    Json(req): Json<OpenConversationRequest>,
) -> Response {
    info!("Switching to conversation {:?}", req.id);

    match state.chat.open_conversation(req.id).await {
        Ok(()) => (StatusCode::OK, Json(state.chat.snapshot())).into_response(),
        Err(e) => session_error_response(e),
    }
}

/// GET /conversations
/// Conversations of the signed-in user
pub async fn list_conversations(State(state): State<AppState>) -> Response {
    match state.api.list_conversations().await {
        Ok(conversations) => (StatusCode::OK, Json(conversations)).into_response(),
        Err(e) => {
            error!("Failed to list conversations: {:#}", e);
            error_response(StatusCode::BAD_GATEWAY, format!("Failed to list conversations: {}", e))
        }
    }
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
