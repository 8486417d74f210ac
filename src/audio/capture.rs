use anyhow::Result;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioFrame};
use super::convert::{encode_wav, pcm16_bytes};
use crate::error::{SessionError, SessionResult};

/// How segments are packed into binary frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentEncoding {
    /// Raw little-endian PCM16
    Pcm16,
    /// Self-contained WAV file per segment
    Wav,
}

/// One time-boxed slice of captured audio, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSegment {
    /// Segment number (0-indexed) within one capture run
    pub index: usize,
    /// Start time in milliseconds since capture started
    pub start_ms: u64,
    pub duration_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SegmentEncoding,
    pub data: Vec<u8>,
}

/// Average absolute amplitude on a 0-255 scale
pub fn signal_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64).abs()).sum();
    let mean = sum / samples.len() as f64;
    (mean / 32768.0 * 255.0).min(255.0) as f32
}

/// Cuts a frame stream into fixed-duration segments
pub struct AudioSegmenter {
    segment_ms: u64,
    encoding: SegmentEncoding,
    index: usize,
    current: Option<SegmentBuffer>,
}

struct SegmentBuffer {
    start_ms: u64,
    sample_rate: u32,
    channels: u16,
    samples: Vec<i16>,
}

impl SegmentBuffer {
    fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / per_second
    }
}

impl AudioSegmenter {
    pub fn new(segment_ms: u64, encoding: SegmentEncoding) -> Self {
        Self {
            segment_ms: segment_ms.max(1),
            encoding,
            index: 0,
            current: None,
        }
    }

    /// Add a frame; returns a segment once `segment_ms` worth is buffered
    pub fn push(&mut self, frame: &AudioFrame) -> Result<Option<AudioSegment>> {
        // A format change closes the running segment early
        let format_changed = self
            .current
            .as_ref()
            .is_some_and(|c| c.sample_rate != frame.sample_rate || c.channels != frame.channels);
        let flushed = if format_changed { self.flush()? } else { None };

        let current = self.current.get_or_insert_with(|| SegmentBuffer {
            start_ms: frame.timestamp_ms,
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            samples: Vec::new(),
        });
        current.samples.extend_from_slice(&frame.samples);

        if flushed.is_some() {
            return Ok(flushed);
        }

        if current.duration_ms() >= self.segment_ms {
            return self.flush();
        }

        Ok(None)
    }

    /// Emit whatever is buffered, if anything
    pub fn flush(&mut self) -> Result<Option<AudioSegment>> {
        let Some(buffer) = self.current.take() else {
            return Ok(None);
        };
        if buffer.samples.is_empty() {
            return Ok(None);
        }

        let data = match self.encoding {
            SegmentEncoding::Pcm16 => pcm16_bytes(&buffer.samples),
            SegmentEncoding::Wav => encode_wav(&buffer.samples, buffer.sample_rate, buffer.channels)?,
        };

        let segment = AudioSegment {
            index: self.index,
            start_ms: buffer.start_ms,
            duration_ms: buffer.duration_ms(),
            sample_rate: buffer.sample_rate,
            channels: buffer.channels,
            encoding: self.encoding,
            data,
        };
        self.index += 1;

        Ok(Some(segment))
    }
}

/// What the capture loop reports to its sink
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Input level of one captured frame
    Level { level: f32, timestamp_ms: u64 },
    Segment(AudioSegment),
    /// The input ended on its own (e.g. end of file, device unplugged)
    Ended,
}

/// Capture lifecycle: owns the backend exclusively while running and hands
/// it back on stop, so repeated start/stop cycles reuse one device handle.
pub struct AudioCaptureLoop {
    backend: Option<Box<dyn AudioBackend>>,
    segment_ms: u64,
    encoding: SegmentEncoding,
    active: Arc<AtomicBool>,
    running: Option<Running>,
}

struct Running {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Box<dyn AudioBackend>>,
}

impl AudioCaptureLoop {
    pub fn new(backend: Box<dyn AudioBackend>, segment_ms: u64, encoding: SegmentEncoding) -> Self {
        Self {
            backend: Some(backend),
            segment_ms,
            encoding,
            active: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    /// True while frames are flowing
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Acquire the input and start forwarding to `sink`.
    ///
    /// A failure to acquire the input is a `Permission` error and leaves
    /// capture inactive. Calling this while running does nothing.
    pub async fn start(&mut self, sink: mpsc::Sender<CaptureEvent>) -> SessionResult<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let mut backend = self
            .backend
            .take()
            .ok_or_else(|| SessionError::permission("capture device was lost"))?;

        let frames = match backend.start().await {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to start {} capture: {:#}", backend.name(), e);
                self.backend = Some(backend);
                return Err(SessionError::permission(format!("{:#}", e)));
            }
        };

        info!("Capture started on {} ({}ms segments)", backend.name(), self.segment_ms);

        self.active.store(true, Ordering::SeqCst);
        let (stop_tx, stop_rx) = oneshot::channel();
        let segmenter = AudioSegmenter::new(self.segment_ms, self.encoding);
        let task = tokio::spawn(run_capture(
            backend,
            frames,
            segmenter,
            sink,
            stop_rx,
            Arc::clone(&self.active),
        ));

        self.running = Some(Running { stop_tx, task });
        Ok(())
    }

    /// Stop capture and release the device. Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.stop_tx.send(());
        match running.task.await {
            Ok(mut backend) => {
                if let Err(e) = backend.stop().await {
                    warn!("Failed to stop {} cleanly: {:#}", backend.name(), e);
                } else if backend.is_capturing() {
                    warn!("{} still reports capturing after stop", backend.name());
                }
                self.backend = Some(backend);
            }
            Err(e) => error!("Capture task failed: {}", e),
        }

        self.active.store(false, Ordering::SeqCst);
        info!("Capture stopped");
    }
}

/// Result of handing one event to the sink
enum Delivery {
    Sent,
    Stopped,
    Closed,
}

/// Send to the sink unless stop arrives first. A full sink must not hold
/// off a stop request.
async fn deliver(
    sink: &mpsc::Sender<CaptureEvent>,
    event: CaptureEvent,
    stop_rx: &mut oneshot::Receiver<()>,
) -> Delivery {
    tokio::select! {
        biased;
        _ = stop_rx => Delivery::Stopped,
        sent = sink.send(event) => match sent {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Closed,
        },
    }
}

async fn run_capture(
    backend: Box<dyn AudioBackend>,
    mut frames: mpsc::Receiver<AudioFrame>,
    mut segmenter: AudioSegmenter,
    sink: mpsc::Sender<CaptureEvent>,
    mut stop_rx: oneshot::Receiver<()>,
    active: Arc<AtomicBool>,
) -> Box<dyn AudioBackend> {
    // stop_rx must not be polled again once it has fired
    let input_ended = loop {
        tokio::select! {
            _ = &mut stop_rx => {
                debug!("Capture stop requested");
                break false;
            }

            frame = frames.recv() => {
                let Some(frame) = frame else {
                    break true;
                };

                // Levels are advisory; drop them rather than wait on a busy consumer
                let level = signal_level(&frame.samples);
                match sink.try_send(CaptureEvent::Level { level, timestamp_ms: frame.timestamp_ms }) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => break false,
                }

                match segmenter.push(&frame) {
                    Ok(Some(segment)) => match deliver(&sink, CaptureEvent::Segment(segment), &mut stop_rx).await {
                        Delivery::Sent => {}
                        Delivery::Stopped => {
                            debug!("Capture stop requested while the sink was full");
                            break false;
                        }
                        Delivery::Closed => break false,
                    },
                    Ok(None) => {}
                    Err(e) => warn!("Dropping audio segment: {:#}", e),
                }
            }
        }
    };

    if input_ended {
        info!("{} input ended", backend.name());
        let mut stopped = false;
        if let Some(segment) = final_segment(&mut segmenter) {
            stopped = !matches!(
                deliver(&sink, CaptureEvent::Segment(segment), &mut stop_rx).await,
                Delivery::Sent
            );
        }
        active.store(false, Ordering::SeqCst);
        if !stopped {
            let _ = deliver(&sink, CaptureEvent::Ended, &mut stop_rx).await;
        }
        return backend;
    }

    if let Some(segment) = final_segment(&mut segmenter) {
        if sink.try_send(CaptureEvent::Segment(segment)).is_err() {
            debug!("Final audio segment dropped, sink unavailable");
        }
    }
    active.store(false, Ordering::SeqCst);
    backend
}

fn final_segment(segmenter: &mut AudioSegmenter) -> Option<AudioSegment> {
    match segmenter.flush() {
        Ok(segment) => segment,
        Err(e) => {
            warn!("Dropping final audio segment: {:#}", e);
            None
        }
    }
}
