use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::activity::VoiceActivityMonitor;
use super::config::VoiceSessionConfig;
use super::playback::{PlaybackController, PlaybackDevice, PlaybackProgress};
use super::snapshot::VoiceSnapshot;
use super::state::VoiceSessionState;
use crate::audio::{AudioBackend, AudioCaptureLoop, CaptureEvent};
use crate::error::{SessionError, SessionResult};
use crate::protocol::{VoiceClientFrame, WireMessage};
use crate::transport::{ChannelKind, SessionTransport, TransportEvent, TransportEventKind, TransportStatus};

const EVENT_QUEUE_DEPTH: usize = 256;
const CAPTURE_QUEUE_DEPTH: usize = 128;
const COMMAND_QUEUE_DEPTH: usize = 16;

enum VoiceCommand {
    StartCapture { reply: oneshot::Sender<SessionResult<()>> },
    StopCapture { reply: oneshot::Sender<()> },
    Close,
}

#[derive(Clone)]
pub struct VoiceSessionHandle {
    commands: mpsc::Sender<VoiceCommand>,
    snapshot: watch::Receiver<VoiceSnapshot>,
}

impl VoiceSessionHandle {
    /// Mic toggle on. Capture also starts by itself once the channel opens.
    pub async fn start_capture(&self) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(VoiceCommand::StartCapture { reply }).await?;
        rx.await.map_err(|_| ended())?
    }

    /// Mic toggle off
    pub async fn stop_capture(&self) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(VoiceCommand::StopCapture { reply }).await?;
        rx.await.map_err(|_| ended())
    }

    pub async fn close(&self) {
        let _ = self.commands.send(VoiceCommand::Close).await;
    }

    pub fn snapshot(&self) -> VoiceSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<VoiceSnapshot> {
        self.snapshot.clone()
    }

    async fn command(&self, command: VoiceCommand) -> SessionResult<()> {
        self.commands.send(command).await.map_err(|_| ended())
    }
}

fn ended() -> SessionError {
    SessionError::connectivity("voice session has ended")
}

/// Voice overlay session: one channel, one capture device, one playback
/// device, all owned by a single event loop.
pub struct VoiceSession {
    config: VoiceSessionConfig,
    session_id: Uuid,
    state: VoiceSessionState,
    transport: SessionTransport,
    events_rx: mpsc::Receiver<TransportEvent>,
    capture: AudioCaptureLoop,
    capture_tx: mpsc::Sender<CaptureEvent>,
    capture_rx: mpsc::Receiver<CaptureEvent>,
    monitor: VoiceActivityMonitor,
    playback: PlaybackController,
    interrupts_sent: u64,
    segments_sent: u64,
    snapshot_tx: watch::Sender<VoiceSnapshot>,
}

impl VoiceSession {
    pub fn spawn(
        config: VoiceSessionConfig,
        token: Option<String>,
        conversation: Option<String>,
        backend: Box<dyn AudioBackend>,
        device: Box<dyn PlaybackDevice>,
    ) -> (VoiceSessionHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (capture_tx, capture_rx) = mpsc::channel(CAPTURE_QUEUE_DEPTH);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let state = VoiceSessionState::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(VoiceSnapshot::new(&state, TransportStatus::Idle));

        let session = Self {
            session_id: Uuid::new_v4(),
            state,
            transport: SessionTransport::new(ChannelKind::Voice, config.transport.clone(), events_tx),
            events_rx,
            capture: AudioCaptureLoop::new(backend, config.segment_ms, config.segment_encoding),
            capture_tx,
            capture_rx,
            monitor: VoiceActivityMonitor::new(config.activity_threshold),
            playback: PlaybackController::new(device),
            interrupts_sent: 0,
            segments_sent: 0,
            snapshot_tx,
            config,
        };

        let task = tokio::spawn(session.run(conversation, token, commands_rx));

        (
            VoiceSessionHandle {
                commands: commands_tx,
                snapshot: snapshot_rx,
            },
            task,
        )
    }

    async fn run(
        mut self,
        conversation: Option<String>,
        token: Option<String>,
        mut commands: mpsc::Receiver<VoiceCommand>,
    ) {
        info!("Voice session {} starting", self.session_id);

        self.transport.open(conversation.as_deref(), token.as_deref());
        match self.transport.status() {
            TransportStatus::Disconnected(reason) => {
                self.state.disconnect(reason);
            }
            TransportStatus::Failed(reason) => {
                error!("Voice channel unusable: {}", reason);
                self.state.fail("Connection Error");
            }
            _ => {}
        }
        self.publish();

        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(VoiceCommand::Close) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.events_rx.recv() => self.on_transport_event(event).await,
                Some(event) = self.capture_rx.recv() => self.on_capture_event(event).await,
                _ = ticker.tick() => self.on_tick(),
            }
            self.publish();
        }

        self.teardown().await;
        self.transport.close();
        self.state.disconnect("Disconnected");
        self.publish();

        info!(
            "Voice session {} closed ({} segments, {} interrupts)",
            self.session_id, self.segments_sent, self.interrupts_sent
        );
    }

    async fn handle_command(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::StartCapture { reply } => {
                let result = self.start_capture().await;
                self.publish();
                let _ = reply.send(result);
            }
            VoiceCommand::StopCapture { reply } => {
                self.capture.stop().await;
                self.state.set_capturing(false);
                self.publish();
                let _ = reply.send(());
            }
            VoiceCommand::Close => {}
        }
    }

    async fn start_capture(&mut self) -> SessionResult<()> {
        if !self.state.phase().is_live() {
            return Err(SessionError::connectivity("voice channel is not open"));
        }

        match self.capture.start(self.capture_tx.clone()).await {
            Ok(()) => {
                self.state.set_capturing(true);
                Ok(())
            }
            Err(e) => {
                // Not retried; the overlay stays in error until reopened
                self.state.fail("Microphone Error");
                Err(e)
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        if !self.transport.accepts(&event) {
            debug!("Discarding event from closed voice link (generation {})", event.generation);
            return;
        }

        match event.kind {
            TransportEventKind::Opened => {
                if self.state.on_open() {
                    self.publish();
                    let _ = self.start_capture().await;
                }
            }
            TransportEventKind::Text(raw) => {
                self.state.apply_raw(&raw);
            }
            TransportEventKind::Binary(fragment) => {
                if self.state.phase().is_terminal() {
                    return;
                }
                if self.playback.enqueue(fragment).await {
                    self.state.playback_started();
                }
            }
            TransportEventKind::Closed(reason) => {
                info!("Voice channel closed: {:?}", reason);
                self.teardown().await;
                self.state.disconnect("Disconnected");
            }
            TransportEventKind::Error(e) => {
                error!("Voice channel failed: {}", e);
                self.teardown().await;
                self.state.fail("Connection Error");
            }
        }
    }

    async fn on_capture_event(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Level { level, .. } => {
                self.state.set_level(level);
                if self.monitor.observe(level, self.playback.is_playing()) {
                    self.barge_in();
                }
            }
            CaptureEvent::Segment(segment) => {
                if !self.state.phase().is_live() || !self.transport.is_open() {
                    debug!("Dropping segment {}, channel not live", segment.index);
                    return;
                }
                match self.transport.send(WireMessage::Binary(segment.data)) {
                    Ok(()) => self.segments_sent += 1,
                    Err(e) => warn!("Audio segment {} not sent: {}", segment.index, e),
                }
            }
            CaptureEvent::Ended => {
                self.capture.stop().await;
                self.state.set_capturing(false);
            }
        }
    }

    /// User spoke over the assistant: silence it and tell the service
    fn barge_in(&mut self) {
        info!(
            "Barge-in at level {:.1} (threshold {:.1})",
            self.monitor.last_level(),
            self.monitor.threshold()
        );
        self.playback.stop();
        self.state.playback_stopped();

        let sent = VoiceClientFrame::Interrupt
            .to_wire()
            .and_then(|frame| self.transport.send(frame));
        match sent {
            Ok(()) => self.interrupts_sent += 1,
            Err(e) => warn!("Interrupt not sent: {}", e),
        }
    }

    fn on_tick(&mut self) {
        if self.playback.poll() == PlaybackProgress::Finished {
            self.state.playback_stopped();
        }
    }

    async fn teardown(&mut self) {
        self.capture.stop().await;
        self.playback.stop();
        self.state.set_capturing(false);
    }

    fn publish(&self) {
        let next = VoiceSnapshot {
            playing: self.playback.is_playing(),
            interrupts_sent: self.interrupts_sent,
            segments_sent: self.segments_sent,
            ..VoiceSnapshot::new(&self.state, self.transport.status())
        };

        self.snapshot_tx.send_if_modified(move |current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
