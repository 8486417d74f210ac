//! Wire frames exchanged with the AI service
//!
//! Chat channel: JSON `{type, payload}` envelopes in both directions.
//! Voice channel: JSON `{type, text}` control frames plus opaque binary audio.

pub mod frames;

pub use frames::{
    AssistantChunk, ChatClientFrame, ChatServerFrame, ErrorPayload, MessageUpdate, PlanContent,
    PlanUpdate, StatusUpdate, UserMessagePayload, VoiceClientFrame, VoiceServerFrame, WireMessage,
};
