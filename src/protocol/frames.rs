use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// One message on the duplex channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Outbound chat frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChatClientFrame {
    UserMessage(UserMessagePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessagePayload {
    /// Conversation the message belongs to, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub text: String,
    /// Quoted context, `null` when nothing is quoted
    pub selected_text: Option<String>,
    /// Only set together with `selected_text`
    pub source_message_id: Option<String>,
}

impl ChatClientFrame {
    pub fn user_message(
        session_id: Option<String>,
        text: impl Into<String>,
        quote: Option<(String, Option<String>)>,
    ) -> Self {
        let (selected_text, source_message_id) = match quote {
            Some((text, source)) if !text.is_empty() => (Some(text), source),
            _ => (None, None),
        };

        Self::UserMessage(UserMessagePayload {
            session_id,
            text: text.into(),
            selected_text,
            source_message_id,
        })
    }

    pub fn to_wire(&self) -> SessionResult<WireMessage> {
        serde_json::to_string(self)
            .map(WireMessage::Text)
            .map_err(SessionError::decode)
    }
}

/// Inbound chat frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChatServerFrame {
    StatusUpdate(StatusUpdate),
    AssistantChunk(AssistantChunk),
    MessageUpdate(MessageUpdate),
    PlanUpdate(PlanUpdate),
    Error(ErrorPayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub stage: Option<String>,
    pub message: String,
    #[serde(default)]
    pub progress: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantChunk {
    pub message_id: String,
    pub chunk: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanUpdate {
    pub plan_id: String,
    pub section: String,
    pub content: PlanContent,
}

/// Plan sections arrive either as prose or as a bullet list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanContent {
    Text(String),
    Items(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ChatServerFrame {
    /// Parse a text frame. Unknown `type` values are decode errors.
    pub fn decode(raw: &str) -> SessionResult<Self> {
        serde_json::from_str(raw).map_err(SessionError::decode)
    }
}

/// Outbound voice control frame (audio itself goes out as binary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceClientFrame {
    Interrupt,
}

impl VoiceClientFrame {
    pub fn to_wire(&self) -> SessionResult<WireMessage> {
        serde_json::to_string(self)
            .map(WireMessage::Text)
            .map_err(SessionError::decode)
    }
}

/// Inbound voice control frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceServerFrame {
    Transcription { text: String },
    AiResponse { text: String },
    StatusUpdate { text: String },
}

impl VoiceServerFrame {
    pub fn decode(raw: &str) -> SessionResult<Self> {
        serde_json::from_str(raw).map_err(SessionError::decode)
    }
}
