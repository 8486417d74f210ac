use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert::{conform, f32_to_i16};

/// Default input device via cpal.
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread that
/// holds it until `stop()`; dropping it there releases the device.
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    capturing: Arc<AtomicBool>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            thread: None,
        }
    }

    pub fn list_input_devices() -> Vec<String> {
        let Ok(devices) = cpal::default_host().input_devices() else {
            return Vec::new();
        };
        devices.filter_map(|d| d.name().ok()).collect()
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.thread.is_some() {
            self.stop().await?;
        }

        let (frames_tx, frames_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let config = self.config.clone();
        let capturing = Arc::clone(&self.capturing);

        let thread = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(&config, frames_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                capturing.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));

                // Returns on stop() or when the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
                capturing.store(false, Ordering::SeqCst);
                info!("Microphone released");
            })
            .context("Failed to spawn capture thread")?;

        self.thread = Some(thread);
        self.stop_tx = Some(stop_tx);

        ready_rx.await.map_err(|_| anyhow!("Capture thread exited during startup"))??;

        Ok(frames_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .context("Failed to join capture thread")?
                .map_err(|_| anyhow!("Capture thread panicked"))?;
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

/// Accumulates device callbacks into fixed-size frames in the target format
struct FrameAssembler {
    config: AudioBackendConfig,
    device_rate: u32,
    device_channels: u16,
    pending: Vec<i16>,
    timestamp_ms: u64,
    frames_tx: mpsc::Sender<AudioFrame>,
}

impl FrameAssembler {
    fn push(&mut self, data: impl Iterator<Item = i16>) {
        let raw: Vec<i16> = data.collect();
        self.pending.extend(conform(
            &raw,
            self.device_rate,
            self.device_channels,
            self.config.target_sample_rate,
            self.config.target_channels,
        ));

        let frame_len = self.config.samples_per_frame();
        while self.pending.len() >= frame_len {
            let samples: Vec<i16> = self.pending.drain(..frame_len).collect();
            let frame = AudioFrame {
                samples,
                sample_rate: self.config.target_sample_rate,
                channels: self.config.target_channels,
                timestamp_ms: self.timestamp_ms,
            };
            self.timestamp_ms += frame.duration_ms();

            // Never block the device callback
            if self.frames_tx.try_send(frame).is_err() {
                warn!("Capture consumer is behind, dropping a frame");
            }
        }
    }
}

fn open_stream(config: &AudioBackendConfig, frames_tx: mpsc::Sender<AudioFrame>) -> Result<Stream> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let supported = device
        .default_input_config()
        .with_context(|| format!("Microphone access denied or unavailable ({})", name))?;

    let sample_format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();

    info!(
        "Using input device {} ({}Hz, {} channels, {:?})",
        name, stream_config.sample_rate.0, stream_config.channels, sample_format
    );

    let mut assembler = FrameAssembler {
        config: config.clone(),
        device_rate: stream_config.sample_rate.0,
        device_channels: stream_config.channels,
        pending: Vec::new(),
        timestamp_ms: 0,
        frames_tx,
    };

    let on_error = |err: cpal::StreamError| error!("Audio stream error: {}", err);

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                assembler.push(data.iter().map(|&s| f32_to_i16(s)))
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| assembler.push(data.iter().copied()),
            on_error,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                assembler.push(data.iter().map(|&s| (s as i32 - 32768) as i16))
            },
            on_error,
            None,
        ),
        other => return Err(anyhow!("Unsupported sample format: {:?}", other)),
    }
    .context("Failed to build input stream")?;

    stream.play().context("Failed to start input stream")?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_works_without_hardware() {
        // Headless hosts report no devices rather than failing
        let names = MicrophoneBackend::list_input_devices();
        assert!(names.iter().all(|name| !name.is_empty()));
    }
}
