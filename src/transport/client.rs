use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::url::{channel_url, ChannelKind};
use crate::error::{SessionError, SessionResult};
use crate::protocol::WireMessage;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// e.g. `ws://localhost:8000`
    pub base_url: String,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8000".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection status as seen by the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TransportStatus {
    Idle,
    Connecting,
    Open,
    Disconnected(String),
    Failed(String),
}

impl TransportStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, TransportStatus::Open)
    }
}

/// Inbound event, tagged with the generation of the link that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEventKind {
    Opened,
    Text(String),
    Binary(Vec<u8>),
    Closed(Option<String>),
    Error(String),
}

#[derive(Debug, Clone)]
struct LinkState {
    generation: u64,
    status: TransportStatus,
}

struct Link {
    outbound: mpsc::UnboundedSender<WireMessage>,
    task: JoinHandle<()>,
}

/// Owns the duplex channel for one session instance.
///
/// No reconnection: a dropped link is terminal and only shows up as a status
/// change plus a `Closed`/`Error` event.
pub struct SessionTransport {
    kind: ChannelKind,
    config: TransportConfig,
    generation: u64,
    link: Option<Link>,
    state_tx: Arc<watch::Sender<LinkState>>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl SessionTransport {
    /// Inbound events are delivered to `events_tx` in arrival order
    pub fn new(
        kind: ChannelKind,
        config: TransportConfig,
        events_tx: mpsc::Sender<TransportEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(LinkState {
            generation: 0,
            status: TransportStatus::Idle,
        });

        Self {
            kind,
            config,
            generation: 0,
            link: None,
            state_tx: Arc::new(state_tx),
            events_tx,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Generation of the current link. Events with any other tag are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn accepts(&self, event: &TransportEvent) -> bool {
        event.generation == self.generation && self.link.is_some()
    }

    pub fn status(&self) -> TransportStatus {
        self.state_tx.borrow().status.clone()
    }

    pub fn is_open(&self) -> bool {
        self.status().is_open()
    }

    /// Tear down any previous link and connect a new one.
    ///
    /// Without a token nothing is connected and the status becomes
    /// `Disconnected`; sends will fail until the next successful open.
    pub fn open(&mut self, conversation_id: Option<&str>, token: Option<&str>) -> u64 {
        self.close();
        self.generation += 1;
        let generation = self.generation;

        let Some(token) = token.filter(|t| !t.is_empty()) else {
            warn!("No auth token, {} channel not opened", self.kind.name());
            self.replace_status(TransportStatus::Disconnected(
                "Authentication missing".to_string(),
            ));
            return generation;
        };

        let url = match channel_url(&self.config.base_url, self.kind, token, conversation_id) {
            Ok(url) => url,
            Err(e) => {
                error!("Cannot build {} channel URL: {:#}", self.kind.name(), e);
                self.replace_status(TransportStatus::Failed(e.to_string()));
                return generation;
            }
        };

        info!(
            "Opening {} channel (generation {}, session {})",
            self.kind.name(),
            generation,
            conversation_id.unwrap_or(super::url::PLACEHOLDER_SESSION_ID)
        );

        self.replace_status(TransportStatus::Connecting);

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(
            url,
            self.kind,
            generation,
            self.config.connect_timeout,
            outbound_rx,
            self.events_tx.clone(),
            Arc::clone(&self.state_tx),
        ));

        self.link = Some(Link { outbound, task });

        generation
    }

    /// Send one frame. Never queues: fails with `Connectivity` unless open.
    pub fn send(&self, message: WireMessage) -> SessionResult<()> {
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| SessionError::connectivity("no channel is open"))?;

        if !self.is_open() {
            return Err(SessionError::connectivity(format!(
                "{} channel is not ready",
                self.kind.name()
            )));
        }

        link.outbound
            .send(message)
            .map_err(|_| SessionError::connectivity("channel closed"))
    }

    /// Close the current link. Idempotent.
    ///
    /// Bumps the generation so anything the old link still delivers is stale.
    pub fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        let was_open = self.is_open();
        // Dropping the sender makes the writer send a close frame and exit
        drop(link.outbound);
        if !was_open {
            link.task.abort();
        }

        self.generation += 1;
        self.replace_status(TransportStatus::Disconnected("closed".to_string()));

        info!("Closed {} channel", self.kind.name());
    }

    /// Wait until the current link is open (the "transport ready" signal)
    pub async fn wait_ready(&self, timeout: Duration) -> SessionResult<()> {
        let generation = self.generation;
        let mut state_rx = self.state_tx.subscribe();

        let wait = async {
            loop {
                {
                    let state = state_rx.borrow_and_update();
                    if state.generation != generation {
                        return Err(SessionError::connectivity("channel was replaced"));
                    }
                    match &state.status {
                        TransportStatus::Open => return Ok(()),
                        TransportStatus::Connecting => {}
                        TransportStatus::Idle => {
                            return Err(SessionError::connectivity("channel was never opened"))
                        }
                        TransportStatus::Disconnected(reason) | TransportStatus::Failed(reason) => {
                            return Err(SessionError::connectivity(reason))
                        }
                    }
                }

                if state_rx.changed().await.is_err() {
                    return Err(SessionError::connectivity("transport dropped"));
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SessionError::connectivity("timed out waiting for the AI service"))?
    }

    fn replace_status(&self, status: TransportStatus) {
        self.state_tx.send_replace(LinkState {
            generation: self.generation,
            status,
        });
    }
}

impl Drop for SessionTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Status update from a link task; ignored once the link is superseded
fn set_status(state_tx: &watch::Sender<LinkState>, generation: u64, status: TransportStatus) {
    state_tx.send_if_modified(|state| {
        if state.generation != generation {
            return false;
        }
        state.status = status;
        true
    });
}

async fn emit(
    events_tx: &mpsc::Sender<TransportEvent>,
    generation: u64,
    kind: TransportEventKind,
) -> bool {
    events_tx
        .send(TransportEvent { generation, kind })
        .await
        .is_ok()
}

async fn run_link(
    url: Url,
    kind: ChannelKind,
    generation: u64,
    connect_timeout: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<WireMessage>,
    events_tx: mpsc::Sender<TransportEvent>,
    state_tx: Arc<watch::Sender<LinkState>>,
) {
    let ws = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            error!("Failed to connect {} channel: {}", kind.name(), e);
            set_status(&state_tx, generation, TransportStatus::Failed(e.to_string()));
            emit(&events_tx, generation, TransportEventKind::Error(e.to_string())).await;
            return;
        }
        Err(_) => {
            error!("Timed out connecting {} channel", kind.name());
            let reason = "connection timed out".to_string();
            set_status(&state_tx, generation, TransportStatus::Failed(reason.clone()));
            emit(&events_tx, generation, TransportEventKind::Error(reason)).await;
            return;
        }
    };

    info!("{} channel open (generation {})", kind.name(), generation);
    set_status(&state_tx, generation, TransportStatus::Open);
    if !emit(&events_tx, generation, TransportEventKind::Opened).await {
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let message = match outbound {
                    Some(WireMessage::Text(text)) => Message::Text(text.into()),
                    Some(WireMessage::Binary(bytes)) => Message::Binary(bytes.into()),
                    None => {
                        debug!("{} channel closed locally", kind.name());
                        let _ = ws_tx.close().await;
                        break;
                    }
                };

                if let Err(e) = ws_tx.send(message).await {
                    error!("Failed to send on {} channel: {}", kind.name(), e);
                    set_status(&state_tx, generation, TransportStatus::Failed(e.to_string()));
                    emit(&events_tx, generation, TransportEventKind::Error(e.to_string())).await;
                    break;
                }
            }

            inbound = ws_rx.next() => {
                let event = match inbound {
                    Some(Ok(Message::Text(text))) => TransportEventKind::Text(text.to_string()),
                    Some(Ok(Message::Binary(bytes))) => TransportEventKind::Binary(bytes.to_vec()),
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                        info!("{} channel closed by peer: {:?}", kind.name(), reason);
                        set_status(
                            &state_tx,
                            generation,
                            TransportStatus::Disconnected(reason.clone().unwrap_or_else(|| "closed by peer".to_string())),
                        );
                        emit(&events_tx, generation, TransportEventKind::Closed(reason)).await;
                        break;
                    }
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("{} channel error: {}", kind.name(), e);
                        set_status(&state_tx, generation, TransportStatus::Failed(e.to_string()));
                        emit(&events_tx, generation, TransportEventKind::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        info!("{} channel stream ended", kind.name());
                        set_status(
                            &state_tx,
                            generation,
                            TransportStatus::Disconnected("connection lost".to_string()),
                        );
                        emit(&events_tx, generation, TransportEventKind::Closed(None)).await;
                        break;
                    }
                };

                if !emit(&events_tx, generation, event).await {
                    break;
                }
            }
        }
    }
}
