use std::time::Duration;

use crate::audio::SegmentEncoding;
use crate::config::Config;
use crate::transport::TransportConfig;

/// Configuration for a voice session
#[derive(Debug, Clone)]
pub struct VoiceSessionConfig {
    /// AI service channel settings
    pub transport: TransportConfig,

    /// Barge-in threshold on the 0-255 level scale
    pub activity_threshold: f32,

    /// Playback completion polling cadence
    pub tick: Duration,

    pub segment_ms: u64,
    pub segment_encoding: SegmentEncoding,
}

impl Default for VoiceSessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            activity_threshold: 10.0,
            tick: Duration::from_millis(16),
            segment_ms: 250,
            segment_encoding: SegmentEncoding::Pcm16,
        }
    }
}

impl From<&Config> for VoiceSessionConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            transport: TransportConfig {
                base_url: cfg.transport.base_url.clone(),
                connect_timeout: cfg.transport.connect_timeout(),
            },
            activity_threshold: cfg.voice.activity_threshold,
            tick: Duration::from_millis(cfg.voice.tick_ms.max(1)),
            segment_ms: cfg.audio.segment_ms,
            segment_encoding: cfg.audio.segment_encoding,
        }
    }
}
