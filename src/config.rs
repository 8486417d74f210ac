use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::audio::SegmentEncoding;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub transport: TransportSettings,
    #[serde(default)]
    pub auth: AuthConfig,
    pub audio: AudioConfig,
    pub voice: VoiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

/// REST collaborator (auth + conversations)
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

/// AI service duplex channel
#[derive(Debug, Clone, Deserialize)]
pub struct TransportSettings {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub ready_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_ms: u64,
    pub segment_ms: u64,
    pub segment_encoding: SegmentEncoding,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub activity_threshold: f32,
    pub tick_ms: u64,
}

impl Config {
    /// Load `path` (TOML, optional) layered over defaults, then `VERITAS__*`
    /// environment overrides (e.g. `VERITAS__AUTH__TOKEN`).
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "veritas")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 7070)?
            .set_default("api.base_url", "http://localhost:3000")?
            .set_default("api.timeout_ms", 15_000)?
            .set_default("transport.base_url", "ws://localhost:8000")?
            .set_default("transport.connect_timeout_ms", 10_000)?
            .set_default("transport.ready_timeout_ms", 5_000)?
            .set_default("audio.sample_rate", 16_000)?
            .set_default("audio.channels", 1)?
            .set_default("audio.frame_ms", 20)?
            .set_default("audio.segment_ms", 250)?
            .set_default("audio.segment_encoding", "pcm16")?
            .set_default("voice.activity_threshold", 10.0)?
            .set_default("voice.tick_ms", 16)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("VERITAS")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl TransportSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}
