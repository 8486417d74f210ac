use serde::Serialize;

use super::state::{VoicePhase, VoiceSessionState};
use crate::transport::TransportStatus;

/// Overlay view, published whenever something visible changes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSnapshot {
    pub phase: VoicePhase,
    pub status: String,
    pub transcription: String,
    pub ai_response: String,
    pub capturing: bool,
    /// Live input level, 0-255
    pub level: f32,
    pub playing: bool,
    pub connection: TransportStatus,
    /// Interrupt frames sent on this session instance
    pub interrupts_sent: u64,
    /// Audio segments sent on this session instance
    pub segments_sent: u64,
}

impl VoiceSnapshot {
    pub fn new(state: &VoiceSessionState, connection: TransportStatus) -> Self {
        Self {
            phase: state.phase(),
            status: state.status().to_string(),
            transcription: state.transcription().to_string(),
            ai_response: state.ai_response().to_string(),
            capturing: state.is_capturing(),
            level: state.level(),
            playing: false,
            connection,
            interrupts_sent: 0,
            segments_sent: 0,
        }
    }
}
