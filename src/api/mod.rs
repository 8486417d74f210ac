//! REST collaborator: auth and conversation persistence
//!
//! The session layer only depends on the `ConversationApi` trait; `ApiClient`
//! is the reqwest implementation that attaches the bearer token to every call.

mod client;
mod types;

pub use client::{ApiClient, ConversationApi};
pub use types::{AuthResponse, Conversation, ConversationDetail, StoredMessage, User};
