use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::message::{Message, Role};
use crate::protocol::{ChatServerFrame, PlanContent};

/// What an inbound frame did to the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Chunk appended to the open assistant message
    Appended,
    /// Chunk opened a new assistant message
    Started,
    /// Content replaced by id
    Replaced,
    /// `message_update` for an id we do not hold
    UnknownMessage,
    Status,
    Plan,
    Error,
    /// Unparsable or unknown frame
    Dropped,
}

/// Latest content of one research plan section
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSection {
    pub plan_id: String,
    pub content: PlanContent,
}

/// Message list plus streaming assembly.
///
/// Single writer: only local sends and inbound frames mutate it. At most one
/// assistant message is open, namely the last message when it is an
/// assistant message.
#[derive(Debug, Clone, Default)]
pub struct ChatSessionState {
    messages: Vec<Message>,
    status: String,
    composing: bool,
    last_error: Option<String>,
    plan: BTreeMap<String, PlanSection>,
}

impl ChatSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_history(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Transient progress text from `status_update`
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Waiting for the first sign of a reply
    pub fn is_composing(&self) -> bool {
        self.composing
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn plan(&self) -> &BTreeMap<String, PlanSection> {
        &self.plan
    }

    /// The message currently receiving chunks, if any
    pub fn open_assistant(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_assistant())
    }

    /// Optimistic append of the user's message, before any confirmation
    pub fn push_user(&mut self, text: impl Into<String>) -> &Message {
        self.messages.push(Message::user(text));
        self.composing = true;
        self.last_error = None;
        &self.messages[self.messages.len() - 1]
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.composing = false;
        self.last_error = Some(error.into());
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn replace_history(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages = messages.into_iter().collect();
    }

    /// Decode and apply one text frame. Malformed frames change nothing.
    pub fn apply_raw(&mut self, raw: &str) -> Applied {
        match ChatServerFrame::decode(raw) {
            Ok(frame) => self.apply(frame),
            Err(e) => {
                warn!("Dropping inbound chat frame: {}", e);
                Applied::Dropped
            }
        }
    }

    pub fn apply(&mut self, frame: ChatServerFrame) -> Applied {
        match frame {
            ChatServerFrame::StatusUpdate(update) => {
                debug!("status: {}", update.message);
                self.status = update.message;
                self.composing = false;
                Applied::Status
            }
            ChatServerFrame::AssistantChunk(chunk) => {
                self.status.clear();
                self.composing = false;
                self.append_chunk(chunk.message_id, &chunk.chunk)
            }
            ChatServerFrame::MessageUpdate(update) => {
                self.composing = false;
                self.replace_content(&update.message_id, update.content)
            }
            ChatServerFrame::PlanUpdate(update) => {
                self.plan.insert(
                    update.section,
                    PlanSection {
                        plan_id: update.plan_id,
                        content: update.content,
                    },
                );
                Applied::Plan
            }
            ChatServerFrame::Error(err) => {
                warn!("AI service reported {}: {}", err.code, err.message);
                self.status.clear();
                self.set_error(err.message);
                Applied::Error
            }
        }
    }

    fn append_chunk(&mut self, message_id: String, chunk: &str) -> Applied {
        if let Some(open) = self.messages.last_mut().filter(|m| m.role == Role::Assistant) {
            open.content.push_str(chunk);
            if open.id.is_none() {
                open.id = Some(message_id);
            }
            return Applied::Appended;
        }

        // Seeded with the chunk itself, never an empty placeholder
        self.messages.push(Message::assistant(message_id, chunk));
        Applied::Started
    }

    /// Full replace by id, anywhere in the list
    fn replace_content(&mut self, message_id: &str, content: String) -> Applied {
        match self
            .messages
            .iter_mut()
            .find(|m| m.id.as_deref() == Some(message_id))
        {
            Some(message) => {
                message.content = content;
                Applied::Replaced
            }
            None => {
                debug!("message_update for unknown message {}", message_id);
                Applied::UnknownMessage
            }
        }
    }
}
