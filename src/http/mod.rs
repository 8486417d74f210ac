//! Local HTTP control surface for an external UI
//!
//! This module provides a REST API for driving a chat session:
//! - GET /chat - Current snapshot (messages, status, quote, connection)
//! - POST /chat/messages - Send a message
//! - POST /chat/selection - Report a text selection
//! - POST /chat/quote, DELETE /chat/quote - Confirm or drop the quote
//! - POST /chat/conversation - Switch conversation
//! - GET /conversations - List conversations
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, OpenConversationRequest, SendMessageRequest};
pub use routes::create_router;
pub use state::AppState;
