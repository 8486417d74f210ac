use serde::Serialize;
use std::collections::BTreeMap;

use super::message::Message;
use super::quote::{Quote, SelectionHighlight};
use super::state::PlanSection;
use crate::transport::TransportStatus;

/// Everything a renderer needs, published after every state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatSnapshot {
    /// Session instance (changes on every conversation switch)
    pub session_id: uuid::Uuid,

    pub conversation_id: Option<String>,

    pub messages: Vec<Message>,

    /// Transient progress text, empty when none
    pub status: String,

    /// "Thinking..." indicator
    pub composing: bool,

    pub connection: TransportStatus,

    /// Quotable selection, if any
    pub highlight: Option<SelectionHighlight>,

    /// Quote that will ride along with the next message
    pub quote: Option<Quote>,

    pub loading_history: bool,

    /// Most recent user-visible error
    pub last_error: Option<String>,

    pub plan: BTreeMap<String, PlanSection>,
}

impl ChatSnapshot {
    pub fn empty() -> Self {
        Self {
            session_id: uuid::Uuid::nil(),
            conversation_id: None,
            messages: Vec::new(),
            status: String::new(),
            composing: false,
            connection: TransportStatus::Idle,
            highlight: None,
            quote: None,
            loading_history: false,
            last_error: None,
            plan: BTreeMap::new(),
        }
    }

    /// Last assistant message that is still receiving chunks
    pub fn streaming(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_assistant())
    }
}
