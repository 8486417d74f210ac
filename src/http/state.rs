use crate::api::ConversationApi;
use crate::chat::ChatSessionHandle;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The chat session this surface drives
    pub chat: ChatSessionHandle,

    /// REST collaborator, for conversation listing
    pub api: Arc<dyn ConversationApi>,
}

impl AppState {
    pub fn new(chat: ChatSessionHandle, api: Arc<dyn ConversationApi>) -> Self {
        Self { chat, api }
    }
}
