use std::time::Duration;

use crate::config::Config;
use crate::transport::TransportConfig;

/// Configuration for a chat session
#[derive(Debug, Clone)]
pub struct ChatSessionConfig {
    /// AI service channel settings
    pub transport: TransportConfig,

    /// How long the first send waits for the channel to report ready
    pub ready_timeout: Duration,

    /// Lazily created conversations are titled with this many leading
    /// characters of the first message
    pub title_max_chars: usize,
}

impl Default for ChatSessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            ready_timeout: Duration::from_secs(5),
            title_max_chars: 30,
        }
    }
}

impl From<&Config> for ChatSessionConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            transport: TransportConfig {
                base_url: cfg.transport.base_url.clone(),
                connect_timeout: cfg.transport.connect_timeout(),
            },
            ready_timeout: cfg.transport.ready_timeout(),
            ..Self::default()
        }
    }
}
