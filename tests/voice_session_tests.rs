mod common;

use anyhow::{bail, Result};
use async_trait::async_trait;
use common::{wait_for, FakeAiService};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use veritas_client::audio::{AudioBackend, AudioFrame};
use veritas_client::transport::TransportConfig;
use veritas_client::voice::{SilentDevice, VoicePhase, VoiceSession, VoiceSessionConfig, VoiceSessionHandle};

/// Microphone stand-in the test feeds by hand
#[derive(Clone, Default)]
struct HandFedBackend {
    deny: bool,
    feed: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    stops: Arc<AtomicUsize>,
}

impl HandFedBackend {
    fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<AudioFrame>> {
        self.feed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioBackend for HandFedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.deny {
            bail!("Permission denied by the user");
        }
        let (tx, rx) = mpsc::channel(64);
        *self.feed.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.feed.lock().unwrap().take();
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.feed.lock().unwrap().is_some()
    }

    fn name(&self) -> &str {
        "hand-fed"
    }
}

/// 20ms mono frame at 16kHz with a constant magnitude
fn frame(amplitude: i16, index: u64) -> AudioFrame {
    let samples = (0..320)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect();
    AudioFrame {
        samples,
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: index * 20,
    }
}

async fn feed(backend: &HandFedBackend, amplitude: i16, frames: u64) -> Result<()> {
    let Some(tx) = backend.sender() else {
        bail!("capture is not running");
    };
    for i in 0..frames {
        tx.send(frame(amplitude, i)).await?;
    }
    Ok(())
}

fn config(service: &FakeAiService) -> VoiceSessionConfig {
    VoiceSessionConfig {
        transport: TransportConfig {
            base_url: service.base_url.clone(),
            connect_timeout: Duration::from_secs(2),
        },
        tick: Duration::from_millis(10),
        ..VoiceSessionConfig::default()
    }
}

fn spawn(
    service: &FakeAiService,
    backend: &HandFedBackend,
    token: Option<&str>,
) -> (VoiceSessionHandle, tokio::task::JoinHandle<()>) {
    VoiceSession::spawn(
        config(service),
        token.map(str::to_string),
        Some("7".to_string()),
        Box::new(backend.clone()),
        Box::new(SilentDevice::new()),
    )
}

fn text_frames(frames: &[Message]) -> Vec<serde_json::Value> {
    frames
        .iter()
        .filter_map(|m| match m {
            Message::Text(text) => serde_json::from_str(text).ok(),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_capture_starts_when_channel_opens() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let backend = HandFedBackend::default();
    let (voice, _task) = spawn(&service, &backend, Some("tok"));

    let mut peer = service.next_connection().await?;
    assert_eq!(peer.uri, "/ai-service/ws/voice?token=tok&session_id=7");

    let mut rx = voice.subscribe();
    let snapshot = wait_for(&mut rx, |s| s.capturing).await?;
    assert_eq!(snapshot.phase, VoicePhase::Listening);
    assert_eq!(snapshot.status, "Listening...");

    // 13 frames of 20ms complete one 250ms segment
    feed(&backend, 800, 13).await?;

    match peer.recv().await? {
        Some(Message::Binary(bytes)) => assert_eq!(bytes.len(), 13 * 320 * 2),
        other => panic!("expected an audio segment, got {:?}", other),
    }
    wait_for(&mut rx, |s| s.segments_sent == 1).await?;

    Ok(())
}

#[tokio::test]
async fn test_barge_in_sends_one_interrupt() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let backend = HandFedBackend::default();
    let (voice, _task) = spawn(&service, &backend, Some("tok"));
    let mut peer = service.next_connection().await?;

    let mut rx = voice.subscribe();
    wait_for(&mut rx, |s| s.capturing).await?;

    // Three seconds of synthesized speech
    peer.send_binary(common::wav_bytes(48_000, 16_000, 2_000));
    let snapshot = wait_for(&mut rx, |s| s.playing).await?;
    assert_eq!(snapshot.phase, VoicePhase::Speaking);

    // User talks over it, well above the threshold, for several frames
    feed(&backend, 3_000, 6).await?;

    let snapshot = wait_for(&mut rx, |s| s.interrupts_sent > 0).await?;
    assert!(!snapshot.playing);
    assert_eq!(snapshot.phase, VoicePhase::Listening);

    let received = peer.drain(Duration::from_millis(300)).await;
    assert_eq!(text_frames(&received), vec![json!({"type": "interrupt"})]);
    assert_eq!(voice.snapshot().interrupts_sent, 1);

    Ok(())
}

#[tokio::test]
async fn test_loud_input_without_playback_sends_nothing() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let backend = HandFedBackend::default();
    let (voice, _task) = spawn(&service, &backend, Some("tok"));
    let mut peer = service.next_connection().await?;

    let mut rx = voice.subscribe();
    wait_for(&mut rx, |s| s.capturing).await?;

    feed(&backend, 3_000, 13).await?;
    wait_for(&mut rx, |s| s.segments_sent == 1).await?;

    let received = peer.drain(Duration::from_millis(200)).await;
    assert!(text_frames(&received).is_empty());
    assert_eq!(voice.snapshot().interrupts_sent, 0);

    Ok(())
}

#[tokio::test]
async fn test_quiet_input_does_not_interrupt() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let backend = HandFedBackend::default();
    let (voice, _task) = spawn(&service, &backend, Some("tok"));
    let mut peer = service.next_connection().await?;

    let mut rx = voice.subscribe();
    wait_for(&mut rx, |s| s.capturing).await?;

    peer.send_binary(common::wav_bytes(48_000, 16_000, 2_000));
    wait_for(&mut rx, |s| s.playing).await?;

    // ~3.9 on the 0-255 scale, below the threshold of 10
    feed(&backend, 500, 6).await?;
    wait_for(&mut rx, |s| s.level > 0.0).await?;

    let received = peer.drain(Duration::from_millis(200)).await;
    assert!(text_frames(&received).is_empty());
    assert!(voice.snapshot().playing);

    Ok(())
}

#[tokio::test]
async fn test_microphone_denied_moves_to_error() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let backend = HandFedBackend::denied();
    let (voice, _task) = spawn(&service, &backend, Some("tok"));
    let mut peer = service.next_connection().await?;

    let mut rx = voice.subscribe();
    let snapshot = wait_for(&mut rx, |s| s.phase == VoicePhase::Error).await?;
    assert_eq!(snapshot.status, "Microphone Error");
    assert!(!snapshot.capturing);

    // Error is absorbing: later frames do not revive the overlay
    peer.send_json(json!({"type": "transcription", "text": "hello"}));
    assert!(voice.start_capture().await.is_err());

    let received = peer.drain(Duration::from_millis(200)).await;
    assert!(received.iter().all(|m| !m.is_binary()));
    assert_eq!(voice.snapshot().phase, VoicePhase::Error);
    assert_eq!(voice.snapshot().segments_sent, 0);

    Ok(())
}

#[tokio::test]
async fn test_service_frames_drive_phase() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let backend = HandFedBackend::default();
    let (voice, _task) = spawn(&service, &backend, Some("tok"));
    let peer = service.next_connection().await?;

    let mut rx = voice.subscribe();
    wait_for(&mut rx, |s| s.phase == VoicePhase::Listening).await?;

    peer.send_json(json!({"type": "transcription", "text": "What did the report say?"}));
    let snapshot = wait_for(&mut rx, |s| s.phase == VoicePhase::Processing).await?;
    assert_eq!(snapshot.transcription, "What did the report say?");
    assert_eq!(snapshot.status, "Processing...");

    peer.send_json(json!({"type": "status_update", "text": "Searching sources"}));
    wait_for(&mut rx, |s| s.status == "Searching sources").await?;

    peer.send_text("{not json");
    peer.send_json(json!({"type": "ai_response", "text": "It covers Q3."}));
    let snapshot = wait_for(&mut rx, |s| s.phase == VoicePhase::Speaking).await?;
    assert_eq!(snapshot.ai_response, "It covers Q3.");

    Ok(())
}

#[tokio::test]
async fn test_service_close_disconnects_and_releases_microphone() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let backend = HandFedBackend::default();
    let (voice, task) = spawn(&service, &backend, Some("tok"));
    let peer = service.next_connection().await?;

    let mut rx = voice.subscribe();
    wait_for(&mut rx, |s| s.capturing).await?;

    peer.close();

    let snapshot = wait_for(&mut rx, |s| s.phase == VoicePhase::Disconnected).await?;
    assert_eq!(snapshot.status, "Disconnected");
    assert!(!snapshot.capturing);
    assert_eq!(backend.stops.load(Ordering::SeqCst), 1);

    voice.close().await;
    task.await?;
    // Already released; closing does not stop it twice
    assert_eq!(backend.stops.load(Ordering::SeqCst), 1);

    Ok(())
}

#[tokio::test]
async fn test_missing_token_is_disconnected() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let backend = HandFedBackend::default();
    let (voice, _task) = spawn(&service, &backend, None);

    let mut rx = voice.subscribe();
    let snapshot = wait_for(&mut rx, |s| s.phase == VoicePhase::Disconnected).await?;
    assert_eq!(snapshot.status, "Authentication missing");
    assert!(!backend.is_capturing());
    service.expect_no_connection(Duration::from_millis(200)).await?;

    Ok(())
}

#[tokio::test]
async fn test_stop_and_restart_capture() -> Result<()> {
    let mut service = FakeAiService::start().await?;
    let backend = HandFedBackend::default();
    let (voice, task) = spawn(&service, &backend, Some("tok"));
    let _peer = service.next_connection().await?;

    let mut rx = voice.subscribe();
    wait_for(&mut rx, |s| s.capturing).await?;

    voice.stop_capture().await?;
    voice.stop_capture().await?;
    assert!(!voice.snapshot().capturing);
    assert_eq!(backend.stops.load(Ordering::SeqCst), 1);

    voice.start_capture().await?;
    assert!(voice.snapshot().capturing);
    assert!(backend.sender().is_some());

    voice.close().await;
    task.await?;
    assert_eq!(backend.stops.load(Ordering::SeqCst), 2);
    assert_eq!(voice.snapshot().phase, VoicePhase::Disconnected);

    Ok(())
}
