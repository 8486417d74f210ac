use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::ChatSessionConfig;
use super::message::Message;
use super::quote::{Quote, QuoteSelectionController, SelectionHighlight, SelectionSnapshot};
use super::snapshot::ChatSnapshot;
use super::state::ChatSessionState;
use crate::api::ConversationApi;
use crate::error::{SessionError, SessionResult};
use crate::protocol::ChatClientFrame;
use crate::transport::{ChannelKind, SessionTransport, TransportEvent, TransportEventKind};

const EVENT_QUEUE_DEPTH: usize = 256;
const COMMAND_QUEUE_DEPTH: usize = 32;

const DISCONNECTED_NOTICE: &str = "AI service is disconnected. Please refresh.";

enum ChatCommand {
    Send {
        text: String,
        reply: oneshot::Sender<SessionResult<()>>,
    },
    Select {
        selection: SelectionSnapshot,
        reply: oneshot::Sender<Option<SelectionHighlight>>,
    },
    ConfirmQuote {
        reply: oneshot::Sender<Option<Quote>>,
    },
    DismissQuote {
        reply: oneshot::Sender<()>,
    },
    OpenConversation {
        id: Option<String>,
        reply: oneshot::Sender<()>,
    },
    Close,
}

/// Cheap, cloneable front door to a running chat session
#[derive(Clone)]
pub struct ChatSessionHandle {
    commands: mpsc::Sender<ChatCommand>,
    snapshot: watch::Receiver<ChatSnapshot>,
}

impl ChatSessionHandle {
    /// Submit a message. The user message shows up in the snapshot before
    /// this resolves; the result reports delivery to the AI service.
    pub async fn send(&self, text: impl Into<String>) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(ChatCommand::Send {
            text: text.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ended())?
    }

    /// Report a selection change; returns the quotable highlight, if any
    pub async fn select(&self, selection: SelectionSnapshot) -> SessionResult<Option<SelectionHighlight>> {
        let (reply, rx) = oneshot::channel();
        self.command(ChatCommand::Select { selection, reply }).await?;
        rx.await.map_err(|_| ended())
    }

    /// Turn the live selection into the pending quote. `None` when nothing
    /// quotable is selected.
    pub async fn confirm_quote(&self) -> SessionResult<Option<Quote>> {
        let (reply, rx) = oneshot::channel();
        self.command(ChatCommand::ConfirmQuote { reply }).await?;
        rx.await.map_err(|_| ended())
    }

    pub async fn dismiss_quote(&self) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(ChatCommand::DismissQuote { reply }).await?;
        rx.await.map_err(|_| ended())
    }

    /// Full reset onto another conversation (or a blank one with `None`)
    pub async fn open_conversation(&self, id: Option<String>) -> SessionResult<()> {
        let (reply, rx) = oneshot::channel();
        self.command(ChatCommand::OpenConversation { id, reply }).await?;
        rx.await.map_err(|_| ended())
    }

    pub async fn close(&self) {
        let _ = self.commands.send(ChatCommand::Close).await;
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.clone()
    }

    async fn command(&self, command: ChatCommand) -> SessionResult<()> {
        self.commands.send(command).await.map_err(|_| ended())
    }
}

fn ended() -> SessionError {
    SessionError::connectivity("chat session has ended")
}

/// Chat session: owns the message list, quote state and the chat channel.
///
/// Runs as one task consuming a single queue of commands and transport
/// events, so every mutation happens in arrival order on one owner.
pub struct ChatSession {
    config: ChatSessionConfig,
    api: Arc<dyn ConversationApi>,
    session_id: Uuid,
    conversation: Option<String>,
    state: ChatSessionState,
    quotes: QuoteSelectionController,
    loading_history: bool,
    transport: SessionTransport,
    events_rx: mpsc::Receiver<TransportEvent>,
    snapshot_tx: watch::Sender<ChatSnapshot>,
}

impl ChatSession {
    /// Start a session, optionally resuming an existing conversation
    pub fn spawn(
        config: ChatSessionConfig,
        api: Arc<dyn ConversationApi>,
        conversation: Option<String>,
    ) -> (ChatSessionHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (snapshot_tx, snapshot_rx) = watch::channel(ChatSnapshot::empty());

        let transport = SessionTransport::new(ChannelKind::Chat, config.transport.clone(), events_tx);

        let session = Self {
            config,
            api,
            session_id: Uuid::nil(),
            conversation: None,
            state: ChatSessionState::new(),
            quotes: QuoteSelectionController::new(),
            loading_history: false,
            transport,
            events_rx,
            snapshot_tx,
        };

        let task = tokio::spawn(session.run(conversation, commands_rx));

        (
            ChatSessionHandle {
                commands: commands_tx,
                snapshot: snapshot_rx,
            },
            task,
        )
    }

    async fn run(mut self, conversation: Option<String>, mut commands: mpsc::Receiver<ChatCommand>) {
        self.open_conversation(conversation).await;
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ChatCommand::Close) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.events_rx.recv() => self.on_transport_event(event),
            }
            self.publish();
        }

        info!("Chat session {} closing", self.session_id);
        self.transport.close();
        self.publish();
    }

    /// Replies go out after the resulting state is published, so a caller
    /// that awaited a command sees its effect in the next snapshot read.
    async fn handle_command(&mut self, command: ChatCommand) {
        match command {
            ChatCommand::Send { text, reply } => {
                let result = self.send(text).await;
                self.publish();
                let _ = reply.send(result);
            }
            ChatCommand::Select { selection, reply } => {
                let highlight = self.quotes.on_selection_change(&selection).cloned();
                self.publish();
                let _ = reply.send(highlight);
            }
            ChatCommand::ConfirmQuote { reply } => {
                let quote = self.quotes.confirm_quote().cloned();
                self.publish();
                let _ = reply.send(quote);
            }
            ChatCommand::DismissQuote { reply } => {
                self.quotes.dismiss_quote();
                self.publish();
                let _ = reply.send(());
            }
            ChatCommand::OpenConversation { id, reply } => {
                self.open_conversation(id).await;
                self.publish();
                let _ = reply.send(());
            }
            ChatCommand::Close => {}
        }
    }

    /// Full session reset: new instance id, empty state, fresh channel
    async fn open_conversation(&mut self, id: Option<String>) {
        self.session_id = Uuid::new_v4();
        self.state.clear();
        self.quotes.reset();
        self.conversation = id;

        info!(
            "Chat session {} on conversation {:?}",
            self.session_id, self.conversation
        );

        let token = self.api.token().await;
        self.transport.open(self.conversation.as_deref(), token.as_deref());

        let Some(id) = self.conversation.clone() else {
            return;
        };

        self.loading_history = true;
        self.publish();

        match self.api.get_conversation(&id).await {
            Ok(detail) => {
                debug!("Loaded {} messages for {}", detail.messages.len(), id);
                self.state
                    .replace_history(detail.messages.into_iter().map(Message::from));
            }
            Err(e) => {
                error!("Failed to fetch messages for {}: {:#}", id, e);
                self.state.set_error("Failed to load messages.");
            }
        }

        self.loading_history = false;
    }

    async fn send(&mut self, text: String) -> SessionResult<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        // At-most-once: the quote goes with this attempt whatever happens
        let quote = self.quotes.take_quote();
        self.state.push_user(text.clone());
        self.publish();

        if self.conversation.is_none() {
            self.create_conversation(&text).await?;
        }

        let frame = ChatClientFrame::user_message(
            self.conversation.clone(),
            text,
            quote.map(|q| (q.text, q.source_message_id)),
        );

        let delivered = self.deliver(&frame).await;
        if let Err(e) = &delivered {
            warn!("Message not delivered: {}", e);
            self.state.set_error(DISCONNECTED_NOTICE);
        }

        delivered
    }

    async fn create_conversation(&mut self, text: &str) -> SessionResult<()> {
        let title: String = text.chars().take(self.config.title_max_chars).collect();

        match self.api.create_conversation(&title).await {
            Ok(conversation) => {
                info!("Conversation {} created for session {}", conversation.id, self.session_id);
                self.conversation = Some(conversation.id);

                // Same session instance: the optimistic message stays, only
                // the channel moves onto the new id
                let token = self.api.token().await;
                self.transport.open(self.conversation.as_deref(), token.as_deref());
                self.publish();
                Ok(())
            }
            Err(e) => {
                error!("Failed to create chat: {:#}", e);
                self.state.set_error("Failed to create new chat.");
                Err(SessionError::Dependency {
                    reason: e.to_string(),
                    draft: text.to_string(),
                })
            }
        }
    }

    async fn deliver(&self, frame: &ChatClientFrame) -> SessionResult<()> {
        self.transport.wait_ready(self.config.ready_timeout).await?;
        self.transport.send(frame.to_wire()?)
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        if !self.transport.accepts(&event) {
            debug!("Discarding event from closed chat link (generation {})", event.generation);
            return;
        }

        match event.kind {
            TransportEventKind::Opened => debug!("Chat channel ready"),
            TransportEventKind::Text(raw) => {
                self.state.apply_raw(&raw);
            }
            TransportEventKind::Binary(bytes) => {
                debug!("Ignoring {} byte binary frame on chat channel", bytes.len());
            }
            TransportEventKind::Closed(reason) => {
                info!("Chat channel closed: {:?}", reason);
                if self.state.is_composing() {
                    self.state.set_error(DISCONNECTED_NOTICE);
                }
            }
            TransportEventKind::Error(e) => {
                self.state.set_error(format!("Connection error: {}", e));
            }
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(ChatSnapshot {
            session_id: self.session_id,
            conversation_id: self.conversation.clone(),
            messages: self.state.messages().to_vec(),
            status: self.state.status().to_string(),
            composing: self.state.is_composing(),
            connection: self.transport.status(),
            highlight: self.quotes.highlight().cloned(),
            quote: self.quotes.pending().cloned(),
            loading_history: self.loading_history,
            last_error: self.state.last_error().map(str::to_string),
            plan: self.state.plan().clone(),
        });
    }
}
