//! Voice overlay
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - Streaming captured audio segments to the AI service
//! - Sequential playback of synthesized speech
//! - Barge-in: cutting playback off when the user starts talking
//! - The overlay phase and text shown to the user

mod activity;
mod config;
mod playback;
mod session;
mod snapshot;
mod state;

pub use activity::VoiceActivityMonitor;
pub use config::VoiceSessionConfig;
#[cfg(feature = "devices")]
pub use playback::SpeakerDevice;
pub use playback::{decode_fragment, DecodedAudio, PlaybackController, PlaybackDevice, PlaybackProgress, SilentDevice};
pub use session::{VoiceSession, VoiceSessionHandle};
pub use snapshot::VoiceSnapshot;
pub use state::{VoicePhase, VoiceSessionState};
