use anyhow::Result;
use tokio::sync::mpsc;

/// Captured audio (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Interleaved PCM16
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by this frame
    pub fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / per_second
    }
}

/// Format every backend converts its input to before emitting frames
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Capture rate sent to the AI service
    pub target_sample_rate: u32,
    /// Mono unless configured otherwise
    pub target_channels: u16,
    /// Frame duration in milliseconds (also the level sampling cadence)
    pub buffer_duration_ms: u64,
}

impl AudioBackendConfig {
    /// Interleaved samples per frame
    pub fn samples_per_frame(&self) -> usize {
        let per_ms = self.target_sample_rate as u64 * self.target_channels.max(1) as u64;
        ((per_ms * self.buffer_duration_ms) / 1000).max(1) as usize
    }
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000,
            target_channels: 1,
            buffer_duration_ms: 20,
        }
    }
}

impl From<&crate::config::AudioConfig> for AudioBackendConfig {
    fn from(cfg: &crate::config::AudioConfig) -> Self {
        Self {
            target_sample_rate: cfg.sample_rate,
            target_channels: cfg.channels,
            buffer_duration_ms: cfg.frame_ms,
        }
    }
}

/// Input source for the capture loop
///
/// Implementations:
/// - Microphone: cpal default input device (feature `devices`)
/// - File: WAV file paced in real time (headless use, tests)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire the input and start capturing.
    ///
    /// Returns a channel receiver that will receive audio frames. The channel
    /// closes when capture ends.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing and release the input device
    async fn stop(&mut self) -> Result<()>;

    fn is_capturing(&self) -> bool;

    /// Short label for logs
    fn name(&self) -> &str;
}

/// Picks the backend for an `AudioSource`
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "devices")]
                {
                    let backend = super::microphone::MicrophoneBackend::new(config);
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "devices"))]
                {
                    let _ = config;
                    anyhow::bail!("Microphone capture requires building with the `devices` feature")
                }
            }

            AudioSource::File(path) => Ok(Box::new(super::file::FileBackend::new(path, config))),
        }
    }
}

/// Where capture reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// WAV file input
    File(String),
}
