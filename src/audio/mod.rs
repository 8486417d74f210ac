pub mod backend;
pub mod capture;
pub mod convert;
pub mod file;

#[cfg(feature = "devices")]
pub mod microphone;

pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource};
pub use capture::{signal_level, AudioCaptureLoop, AudioSegment, AudioSegmenter, CaptureEvent, SegmentEncoding};
pub use file::{AudioFile, FileBackend};

#[cfg(feature = "devices")]
pub use microphone::MicrophoneBackend;
