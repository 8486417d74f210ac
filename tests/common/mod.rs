// Shared fixtures: an in-process AI service speaking WebSocket, and a
// scripted conversation store.

#![allow(dead_code)]

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use veritas_client::api::{Conversation, ConversationApi, ConversationDetail, StoredMessage};
use veritas_client::chat::Role;

pub const WAIT: Duration = Duration::from_secs(5);

/// One accepted client connection
pub struct PeerConnection {
    /// Request path and query the client connected with
    pub uri: String,
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl PeerConnection {
    pub fn send_json(&self, value: Value) {
        let _ = self.outbound.send(Message::Text(value.to_string()));
    }

    pub fn send_text(&self, raw: &str) {
        let _ = self.outbound.send(Message::Text(raw.to_string()));
    }

    pub fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self.outbound.send(Message::Binary(bytes));
    }

    /// Close from the service side
    pub fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
    }

    /// Next data frame from the client; `None` once the client hung up
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for a client frame"))
    }

    pub async fn recv_json(&mut self) -> Result<Value> {
        loop {
            match self.recv().await? {
                Some(Message::Text(text)) => return serde_json::from_str(&text).context("client sent invalid JSON"),
                Some(_) => continue,
                None => bail!("client disconnected"),
            }
        }
    }

    /// Everything received within `window`
    pub async fn drain(&mut self, window: Duration) -> Vec<Message> {
        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, self.inbound.recv()).await {
            frames.push(frame);
        }
        frames
    }
}

/// Stand-in for the AI service
pub struct FakeAiService {
    pub base_url: String,
    connections: mpsc::UnboundedReceiver<PeerConnection>,
}

impl FakeAiService {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("ws://{}", listener.local_addr()?);
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let uri = Arc::new(Mutex::new(String::new()));
                    let seen = Arc::clone(&uri);
                    let callback = move |req: &Request, res: Response| -> Result<Response, ErrorResponse> {
                        *seen.lock().unwrap() = req.uri().to_string();
                        Ok(res)
                    };

                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                        return;
                    };

                    let (in_tx, inbound) = mpsc::unbounded_channel();
                    let (outbound, mut out_rx) = mpsc::unbounded_channel::<Message>();
                    let uri = uri.lock().unwrap().clone();
                    let _ = conn_tx.send(PeerConnection { uri, inbound, outbound });

                    let (mut ws_tx, mut ws_rx) = ws.split();
                    loop {
                        tokio::select! {
                            frame = ws_rx.next() => match frame {
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(frame)) if frame.is_text() || frame.is_binary() => {
                                    let _ = in_tx.send(frame);
                                }
                                Some(Ok(_)) => {}
                            },
                            out = out_rx.recv() => match out {
                                Some(Message::Close(frame)) => {
                                    let _ = ws_tx.send(Message::Close(frame)).await;
                                    break;
                                }
                                Some(frame) => {
                                    if ws_tx.send(frame).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        });

        Ok(Self { base_url, connections })
    }

    pub async fn next_connection(&mut self) -> Result<PeerConnection> {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for a client to connect"))?
            .ok_or_else(|| anyhow!("listener stopped"))
    }

    /// Skip connections until one whose URI contains `needle`. Links a
    /// client replaced mid-handshake may or may not show up first.
    pub async fn connection_matching(&mut self, needle: &str) -> Result<PeerConnection> {
        loop {
            let conn = self.next_connection().await?;
            if conn.uri.contains(needle) {
                return Ok(conn);
            }
        }
    }

    /// Assert nobody connects within `window`
    pub async fn expect_no_connection(&mut self, window: Duration) -> Result<()> {
        match tokio::time::timeout(window, self.connections.recv()).await {
            Ok(Some(conn)) => bail!("unexpected connection to {}", conn.uri),
            _ => Ok(()),
        }
    }
}

/// Scripted conversation store
#[derive(Default)]
pub struct StubApi {
    pub token: Option<String>,
    pub fail_create: bool,
    pub next_id: Mutex<u32>,
    pub created_titles: Mutex<Vec<String>>,
    pub history: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl StubApi {
    pub fn signed_in() -> Self {
        Self {
            token: Some("test-token".to_string()),
            next_id: Mutex::new(100),
            ..Self::default()
        }
    }

    pub fn with_history(self, id: &str, messages: &[(Role, &str, &str)]) -> Self {
        let stored = messages
            .iter()
            .map(|(role, msg_id, content)| StoredMessage {
                id: msg_id.to_string(),
                role: *role,
                content: content.to_string(),
            })
            .collect();
        self.history.lock().unwrap().insert(id.to_string(), stored);
        self
    }

    fn conversation(id: &str, title: &str) -> Conversation {
        Conversation {
            id: id.to_string(),
            title: title.to_string(),
            created_at: None,
            updated_at: None,
        }
    }
}

#[async_trait]
impl ConversationApi for StubApi {
    async fn token(&self) -> Option<String> {
        self.token.clone()
    }

    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        if self.fail_create {
            bail!("Backend returned 500 Internal Server Error");
        }
        self.created_titles.lock().unwrap().push(title.to_string());
        let mut next = self.next_id.lock().unwrap();
        let id = next.to_string();
        *next += 1;
        Ok(Self::conversation(&id, title))
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .keys()
            .map(|id| Self::conversation(id, "stored"))
            .collect())
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationDetail> {
        let messages = self
            .history
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Backend returned 404 Not Found"))?;
        Ok(ConversationDetail {
            conversation: Self::conversation(id, "stored"),
            messages,
        })
    }
}

/// 16-bit mono WAV with a steady tone of the given amplitude
pub fn wav_bytes(samples: usize, sample_rate: u32, amplitude: i16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("wav writer");
        for i in 0..samples {
            let sample = if i % 2 == 0 { amplitude } else { -amplitude };
            writer.write_sample(sample).expect("wav sample");
        }
        writer.finalize().expect("wav finalize");
    }
    cursor.into_inner()
}

/// Wait until a published value satisfies `pred`
pub async fn wait_for<T, F>(rx: &mut tokio::sync::watch::Receiver<T>, mut pred: F) -> Result<T>
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let found = tokio::time::timeout(WAIT, rx.wait_for(|value| pred(value)))
        .await
        .map_err(|_| anyhow!("timed out waiting for state"))?
        .map_err(|_| anyhow!("publisher dropped"))?;
    Ok(found.clone())
}
