use serde::Serialize;
use tracing::{debug, warn};

use crate::protocol::VoiceServerFrame;

/// Voice overlay phase.
///
/// `Connecting -> Listening <-> Processing <-> Speaking`; `Error` and
/// `Disconnected` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoicePhase {
    Connecting,
    Listening,
    Processing,
    Speaking,
    Error,
    Disconnected,
}

impl VoicePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, VoicePhase::Error | VoicePhase::Disconnected)
    }

    pub fn is_live(self) -> bool {
        matches!(self, VoicePhase::Listening | VoicePhase::Processing | VoicePhase::Speaking)
    }

    fn can_become(self, next: VoicePhase) -> bool {
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, VoicePhase::Connecting) => false,
            (VoicePhase::Connecting, next) => !matches!(next, VoicePhase::Processing | VoicePhase::Speaking),
            _ => true,
        }
    }

    /// Default status line shown for the phase
    pub fn label(self) -> &'static str {
        match self {
            VoicePhase::Connecting => "Connecting...",
            VoicePhase::Listening => "Listening...",
            VoicePhase::Processing => "Processing...",
            VoicePhase::Speaking => "Speaking...",
            VoicePhase::Error => "Error",
            VoicePhase::Disconnected => "Disconnected",
        }
    }
}

/// Text state of the voice overlay
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSessionState {
    phase: VoicePhase,
    status: String,
    transcription: String,
    ai_response: String,
    capturing: bool,
    level: f32,
}

impl Default for VoiceSessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceSessionState {
    pub fn new() -> Self {
        Self {
            phase: VoicePhase::Connecting,
            status: VoicePhase::Connecting.label().to_string(),
            transcription: String::new(),
            ai_response: String::new(),
            capturing: false,
            level: 0.0,
        }
    }

    pub fn phase(&self) -> VoicePhase {
        self.phase
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn transcription(&self) -> &str {
        &self.transcription
    }

    pub fn ai_response(&self) -> &str {
        &self.ai_response
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Live input level (0-255) for a visualizer
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Move to `next` with its default label. Returns false if the move is
    /// not allowed from the current phase.
    fn transition(&mut self, next: VoicePhase) -> bool {
        self.transition_with(next, next.label())
    }

    fn transition_with(&mut self, next: VoicePhase, status: impl Into<String>) -> bool {
        if !self.phase.can_become(next) {
            debug!("Ignoring voice transition {:?} -> {:?}", self.phase, next);
            return false;
        }
        self.phase = next;
        self.status = status.into();
        true
    }

    pub fn on_open(&mut self) -> bool {
        self.transition(VoicePhase::Listening)
    }

    /// Synthesized audio started playing
    pub fn playback_started(&mut self) -> bool {
        self.transition(VoicePhase::Speaking)
    }

    /// Playback finished or was cut off
    pub fn playback_stopped(&mut self) -> bool {
        self.transition(VoicePhase::Listening)
    }

    pub fn fail(&mut self, status: impl Into<String>) -> bool {
        let moved = self.transition_with(VoicePhase::Error, status);
        if moved {
            self.capturing = false;
            self.level = 0.0;
        }
        moved
    }

    pub fn disconnect(&mut self, status: impl Into<String>) -> bool {
        let moved = self.transition_with(VoicePhase::Disconnected, status);
        if moved {
            self.capturing = false;
            self.level = 0.0;
        }
        moved
    }

    pub fn set_capturing(&mut self, capturing: bool) {
        self.capturing = capturing && !self.phase.is_terminal();
        if !self.capturing {
            self.level = 0.0;
        }
    }

    pub fn set_level(&mut self, level: f32) {
        if self.capturing {
            self.level = level;
        }
    }

    /// Decode and apply one text frame. Malformed frames change nothing.
    pub fn apply_raw(&mut self, raw: &str) -> bool {
        match VoiceServerFrame::decode(raw) {
            Ok(frame) => self.apply(frame),
            Err(e) => {
                warn!("Dropping inbound voice frame: {}", e);
                false
            }
        }
    }

    pub fn apply(&mut self, frame: VoiceServerFrame) -> bool {
        if self.phase.is_terminal() {
            return false;
        }

        match frame {
            VoiceServerFrame::Transcription { text } => {
                self.transcription = text;
                self.transition(VoicePhase::Processing);
            }
            VoiceServerFrame::AiResponse { text } => {
                self.ai_response = text;
                self.transition(VoicePhase::Speaking);
            }
            // Free-form progress text, phase unchanged
            VoiceServerFrame::StatusUpdate { text } => self.status = text,
        }
        true
    }
}
