use anyhow::{anyhow, bail, Context, Result};
use std::collections::VecDeque;
use std::io::Cursor;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One decoded fragment (f32, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.samples.len() as u64 * 1_000_000 / per_second)
    }
}

/// Decode a synthesized-speech fragment (any container symphonia probes)
pub fn decode_fragment(bytes: Vec<u8>) -> Result<DecodedAudio> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&Hint::new(), mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Unrecognized audio format")?;
    let mut format = probed.format;

    let track = format.default_track().ok_or_else(|| anyhow!("No audio track"))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    let mut sample_rate = codec_params.sample_rate.unwrap_or(0);
    let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e).context("Failed to read audio packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => debug!("Skipping corrupt packet: {}", e),
            Err(e) => return Err(e).context("Failed to decode audio"),
        }
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        bail!("Fragment contained no audio");
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Output sink for decoded audio. Plays one clip at a time.
pub trait PlaybackDevice: Send {
    fn play(&mut self, clip: DecodedAudio) -> Result<()>;

    /// False once the current clip has finished or was stopped
    fn is_playing(&self) -> bool;

    fn stop(&mut self);

    fn name(&self) -> &str;
}

/// Plays nothing, but takes as long as the clip would. Used headless and in
/// tests.
#[derive(Debug, Default)]
pub struct SilentDevice {
    until: Option<Instant>,
}

impl SilentDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackDevice for SilentDevice {
    fn play(&mut self, clip: DecodedAudio) -> Result<()> {
        self.until = Some(Instant::now() + clip.duration());
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.until.is_some_and(|until| Instant::now() < until)
    }

    fn stop(&mut self) {
        self.until = None;
    }

    fn name(&self) -> &str {
        "silent"
    }
}

#[cfg(feature = "devices")]
pub use speaker::SpeakerDevice;

#[cfg(feature = "devices")]
mod speaker {
    use super::{DecodedAudio, PlaybackDevice};
    use anyhow::{anyhow, Context, Result};
    use rodio::buffer::SamplesBuffer;
    use rodio::{OutputStream, OutputStreamHandle, Sink};
    use std::thread;
    use tracing::info;

    /// Default output device via rodio.
    ///
    /// `OutputStream` is not `Send`; it stays parked on its own thread for
    /// the lifetime of the device, only the handle travels.
    pub struct SpeakerDevice {
        handle: OutputStreamHandle,
        sink: Sink,
        _keepalive: std::sync::mpsc::Sender<()>,
    }

    impl SpeakerDevice {
        pub fn open() -> Result<Self> {
            let (handle_tx, handle_rx) = std::sync::mpsc::channel();
            let (keepalive, parked) = std::sync::mpsc::channel::<()>();

            thread::Builder::new()
                .name("speaker-output".to_string())
                .spawn(move || match OutputStream::try_default() {
                    Ok((stream, handle)) => {
                        let _ = handle_tx.send(Ok(handle));
                        // Blocks until the device is dropped
                        let _ = parked.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = handle_tx.send(Err(anyhow!("No output device: {}", e)));
                    }
                })
                .context("Failed to spawn output thread")?;

            let handle = handle_rx
                .recv()
                .map_err(|_| anyhow!("Output thread exited during startup"))??;
            let sink = Sink::try_new(&handle).context("Failed to create output sink")?;

            info!("Speaker output ready");

            Ok(Self {
                handle,
                sink,
                _keepalive: keepalive,
            })
        }
    }

    impl PlaybackDevice for SpeakerDevice {
        fn play(&mut self, clip: DecodedAudio) -> Result<()> {
            self.sink
                .append(SamplesBuffer::new(clip.channels, clip.sample_rate, clip.samples));
            self.sink.play();
            Ok(())
        }

        fn is_playing(&self) -> bool {
            !self.sink.empty()
        }

        fn stop(&mut self) {
            self.sink.stop();
            // A stopped sink stays stopped; start fresh for the next clip
            match Sink::try_new(&self.handle) {
                Ok(sink) => self.sink = sink,
                Err(e) => tracing::warn!("Failed to recreate output sink: {}", e),
            }
        }

        fn name(&self) -> &str {
            "rodio-speaker"
        }
    }
}

/// What a poll observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackProgress {
    Idle,
    Playing,
    /// The last queued fragment just ended
    Finished,
}

/// Plays inbound fragments strictly one after another, in arrival order
pub struct PlaybackController {
    device: Box<dyn PlaybackDevice>,
    queue: VecDeque<DecodedAudio>,
    playing: bool,
}

impl PlaybackController {
    pub fn new(device: Box<dyn PlaybackDevice>) -> Self {
        Self {
            device,
            queue: VecDeque::new(),
            playing: false,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Decode off the async runtime, then play or queue. An undecodable
    /// fragment is logged and skipped. Returns whether playback is running.
    pub async fn enqueue(&mut self, fragment: Vec<u8>) -> bool {
        let size = fragment.len();
        let decoded = match tokio::task::spawn_blocking(move || decode_fragment(fragment)).await {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(e)) => {
                warn!("Skipping undecodable {} byte audio fragment: {:#}", size, e);
                return self.playing;
            }
            Err(e) => {
                warn!("Audio decode task failed: {}", e);
                return self.playing;
            }
        };

        self.enqueue_decoded(decoded)
    }

    pub fn enqueue_decoded(&mut self, clip: DecodedAudio) -> bool {
        debug!("Queued {:?} of audio", clip.duration());
        self.queue.push_back(clip);
        if !self.playing {
            self.start_next();
        }
        self.playing
    }

    /// Advance the queue when the current fragment has ended
    pub fn poll(&mut self) -> PlaybackProgress {
        if !self.playing {
            return PlaybackProgress::Idle;
        }
        if self.device.is_playing() {
            return PlaybackProgress::Playing;
        }

        self.playing = false;
        self.start_next();
        if self.playing {
            PlaybackProgress::Playing
        } else {
            PlaybackProgress::Finished
        }
    }

    /// Cut playback now and drop anything queued. Safe to call when idle.
    /// Returns whether something was playing.
    pub fn stop(&mut self) -> bool {
        let was_playing = self.playing;
        self.queue.clear();
        if was_playing {
            self.device.stop();
            info!("Playback stopped");
        }
        self.playing = false;
        was_playing
    }

    fn start_next(&mut self) {
        while let Some(clip) = self.queue.pop_front() {
            match self.device.play(clip) {
                Ok(()) => {
                    self.playing = true;
                    return;
                }
                // Treated like a fragment that ended on its own
                Err(e) => warn!("{} could not play fragment: {:#}", self.device.name(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn wav_bytes(samples: usize, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..samples {
                writer.write_sample(((i % 100) as i16 - 50) * 100).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    /// Records every call; clips "finish" when the test says so
    #[derive(Clone, Default)]
    struct ScriptedDevice {
        log: Arc<Mutex<Vec<String>>>,
        busy: Arc<Mutex<bool>>,
    }

    impl PlaybackDevice for ScriptedDevice {
        fn play(&mut self, clip: DecodedAudio) -> Result<()> {
            self.log.lock().unwrap().push(format!("play {}", clip.samples.len()));
            *self.busy.lock().unwrap() = true;
            Ok(())
        }

        fn is_playing(&self) -> bool {
            *self.busy.lock().unwrap()
        }

        fn stop(&mut self) {
            self.log.lock().unwrap().push("stop".to_string());
            *self.busy.lock().unwrap() = false;
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn clip(len: usize) -> DecodedAudio {
        DecodedAudio {
            samples: vec![0.0; len],
            sample_rate: 16000,
            channels: 1,
        }
    }

    #[test]
    fn test_decode_wav_fragment() {
        let decoded = decode_fragment(wav_bytes(1600, 16000)).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), 1600);
        assert_eq!(decoded.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_fragment(b"definitely not audio".to_vec()).is_err());
        assert!(decode_fragment(Vec::new()).is_err());
    }

    #[test]
    fn test_fragments_play_in_arrival_order() {
        let device = ScriptedDevice::default();
        let mut playback = PlaybackController::new(Box::new(device.clone()));

        assert!(playback.enqueue_decoded(clip(10)));
        assert!(playback.enqueue_decoded(clip(20)));
        assert_eq!(playback.queued(), 1);
        assert_eq!(playback.poll(), PlaybackProgress::Playing);

        *device.busy.lock().unwrap() = false;
        assert_eq!(playback.poll(), PlaybackProgress::Playing);

        *device.busy.lock().unwrap() = false;
        assert_eq!(playback.poll(), PlaybackProgress::Finished);
        assert_eq!(playback.poll(), PlaybackProgress::Idle);

        assert_eq!(*device.log.lock().unwrap(), vec!["play 10", "play 20"]);
    }

    #[test]
    fn test_stop_is_idempotent_and_clears_queue() {
        let device = ScriptedDevice::default();
        let mut playback = PlaybackController::new(Box::new(device.clone()));

        assert!(!playback.stop());

        playback.enqueue_decoded(clip(10));
        playback.enqueue_decoded(clip(20));
        assert!(playback.stop());
        assert!(!playback.stop());
        assert!(!playback.is_playing());
        assert_eq!(playback.queued(), 0);

        assert_eq!(*device.log.lock().unwrap(), vec!["play 10", "stop"]);
    }

    #[tokio::test]
    async fn test_undecodable_fragment_is_skipped() {
        let mut playback = PlaybackController::new(Box::new(SilentDevice::new()));
        assert!(!playback.enqueue(vec![1, 2, 3]).await);
        assert!(!playback.is_playing());

        assert!(playback.enqueue(wav_bytes(16000, 16000)).await);
        assert!(playback.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_runs_for_clip_duration() {
        let mut playback = PlaybackController::new(Box::new(SilentDevice::new()));
        playback.enqueue_decoded(clip(1600));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(playback.poll(), PlaybackProgress::Playing);

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(playback.poll(), PlaybackProgress::Finished);
    }
}
