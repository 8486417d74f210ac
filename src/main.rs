use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use veritas_client::audio::{AudioBackendConfig, AudioBackendFactory, AudioSource};
use veritas_client::chat::{ChatSession, ChatSessionConfig, ChatSessionHandle, ChatSnapshot, Rect, SelectionSnapshot};
use veritas_client::voice::{PlaybackDevice, SilentDevice, VoiceSession, VoiceSessionConfig, VoiceSnapshot};
use veritas_client::{create_router, ApiClient, AppState, Config, ConversationApi, SessionError};

#[derive(Parser)]
#[command(name = "veritas")]
#[command(about = "Research assistant session client")]
struct Cli {
    /// Config file (TOML; extension optional)
    #[arg(short, long, default_value = "config/veritas", env = "VERITAS_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and print the access token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "VERITAS_PASSWORD")]
        password: String,
    },
    /// Create an account and print the access token
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "VERITAS_PASSWORD")]
        password: String,
    },
    /// List conversations
    Conversations,
    /// Interactive text chat
    Chat {
        /// Resume an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Voice session from the microphone or a WAV file
    Voice {
        /// WAV file to use instead of the microphone
        #[arg(long)]
        input: Option<String>,
        #[arg(long)]
        conversation: Option<String>,
    },
    /// List audio input devices
    Devices,
    /// Serve the local HTTP control API
    Serve {
        #[arg(long)]
        conversation: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    let api = Arc::new(
        ApiClient::new(cfg.api.base_url.clone(), cfg.api.timeout())?.with_token(cfg.auth.token.clone()),
    );

    match cli.command {
        Command::Login { email, password } => {
            let auth = api.login(&email, &password).await?;
            print_token(&auth.user.email, &auth.access_token);
        }
        Command::Signup { email, password } => {
            let auth = api.signup(&email, &password).await?;
            print_token(&auth.user.email, &auth.access_token);
        }
        Command::Conversations => {
            for conversation in api.list_conversations().await? {
                let updated = conversation
                    .updated_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!("{:>8}  {:<16}  {}", conversation.id, updated, conversation.title);
            }
        }
        Command::Chat { conversation } => run_chat(&cfg, api, conversation).await?,
        Command::Voice { input, conversation } => run_voice(&cfg, api, input, conversation).await?,
        Command::Devices => list_devices(),
        Command::Serve { conversation } => serve(&cfg, api, conversation).await?,
    }

    Ok(())
}

fn print_token(email: &str, token: &str) {
    info!("Signed in as {}", email);
    println!("export VERITAS__AUTH__TOKEN={}", token);
}

async fn run_chat(cfg: &Config, api: Arc<ApiClient>, conversation: Option<String>) -> Result<()> {
    let (chat, task) = ChatSession::spawn(ChatSessionConfig::from(cfg), api, conversation);
    let printer = tokio::spawn(print_chat(chat.subscribe()));

    println!("Type a message. Commands: /quote N TEXT, /unquote, /open ID, /new, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

        let result = match command {
            "/quit" => break,
            "/quote" => quote(&chat, rest).await,
            "/unquote" => chat.dismiss_quote().await,
            "/open" => chat.open_conversation(Some(rest.trim().to_string())).await,
            "/new" => chat.open_conversation(None).await,
            _ => chat.send(line).await,
        };

        match result {
            Ok(()) => {}
            Err(SessionError::Dependency { reason, draft }) => {
                eprintln!("! Failed to create new chat ({}). Your message was: {}", reason, draft);
            }
            Err(e) => eprintln!("! {}", e),
        }
    }

    chat.close().await;
    task.await.context("Chat session task failed")?;
    printer.abort();

    Ok(())
}

/// `/quote N TEXT`: quote TEXT out of message number N (1-based)
async fn quote(chat: &ChatSessionHandle, args: &str) -> Result<(), SessionError> {
    let (number, text) = args.split_once(' ').unwrap_or((args, ""));
    let snapshot = chat.snapshot();
    let message = number
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| snapshot.messages.get(i));

    let selection = SelectionSnapshot {
        text: text.to_string(),
        collapsed: false,
        message_id: message.and_then(|m| m.id.clone()),
        bounds: Rect {
            top: 0.0,
            left: 0.0,
            width: 1.0,
            height: 1.0,
        },
    };

    if chat.select(selection).await?.is_none() {
        eprintln!("! Nothing quotable there (only stored or assistant messages can be quoted)");
        return Ok(());
    }

    if let Some(quote) = chat.confirm_quote().await? {
        println!("> quoting \"{}\"", quote.text);
    }
    Ok(())
}

/// Streams assistant output to stdout as it is assembled
async fn print_chat(mut rx: watch::Receiver<ChatSnapshot>) {
    let mut session = uuid::Uuid::nil();
    let mut printed: Vec<String> = Vec::new();
    let mut status = String::new();
    let mut error: Option<String> = None;

    loop {
        {
            let snapshot = rx.borrow_and_update();

            if snapshot.session_id != session {
                session = snapshot.session_id;
                printed.clear();
                if let Some(id) = &snapshot.conversation_id {
                    println!("--- conversation {} ---", id);
                }
            }

            for (i, message) in snapshot.messages.iter().enumerate() {
                if i >= printed.len() {
                    printed.push(String::new());
                    if message.is_assistant() {
                        print!("\n[{}] assistant: ", i + 1);
                    } else {
                        println!("[{}] you: {}", i + 1, message.content);
                        printed[i] = message.content.clone();
                        continue;
                    }
                }

                let seen = &printed[i];
                if message.content == *seen {
                    continue;
                }
                match message.content.strip_prefix(seen.as_str()) {
                    Some(delta) => print!("{}", delta),
                    None => print!("\n[{}] (revised) {}", i + 1, message.content),
                }
                printed[i] = message.content.clone();
            }

            if snapshot.status != status {
                status = snapshot.status.clone();
                if !status.is_empty() {
                    println!("  ... {}", status);
                }
            }

            if snapshot.last_error != error {
                error = snapshot.last_error.clone();
                if let Some(e) = &error {
                    eprintln!("! {}", e);
                }
            }
        }

        std::io::Write::flush(&mut std::io::stdout()).ok();

        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn list_devices() {
    #[cfg(feature = "devices")]
    {
        let names = veritas_client::audio::MicrophoneBackend::list_input_devices();
        if names.is_empty() {
            println!("No input devices found");
        }
        for name in names {
            println!("{}", name);
        }
    }

    #[cfg(not(feature = "devices"))]
    {
        println!("Built without the \"devices\" feature; only WAV file input is available");
    }
}

fn playback_device() -> Box<dyn PlaybackDevice> {
    #[cfg(feature = "devices")]
    {
        match veritas_client::voice::SpeakerDevice::open() {
            Ok(device) => return Box::new(device),
            Err(e) => tracing::warn!("No speaker output, playing silently: {:#}", e),
        }
    }

    Box::new(SilentDevice::new())
}

async fn run_voice(
    cfg: &Config,
    api: Arc<ApiClient>,
    input: Option<String>,
    conversation: Option<String>,
) -> Result<()> {
    let source = match input {
        Some(path) => AudioSource::File(path),
        None => AudioSource::Microphone,
    };
    let backend = AudioBackendFactory::create(source, AudioBackendConfig::from(&cfg.audio))?;
    info!("Capture backend: {}", backend.name());

    let (voice, task) = VoiceSession::spawn(
        VoiceSessionConfig::from(cfg),
        api.token().await,
        conversation,
        backend,
        playback_device(),
    );

    let mut rx = voice.subscribe();
    let printer = tokio::spawn(async move {
        let mut last: Option<VoiceSnapshot> = None;
        loop {
            {
                let snapshot = rx.borrow_and_update();
                let previous = last.as_ref();
                if previous.map(|p| &p.status) != Some(&snapshot.status) {
                    println!("[{}]", snapshot.status);
                }
                if previous.map(|p| &p.transcription) != Some(&snapshot.transcription) && !snapshot.transcription.is_empty() {
                    println!("you: \"{}\"", snapshot.transcription);
                }
                if previous.map(|p| &p.ai_response) != Some(&snapshot.ai_response) && !snapshot.ai_response.is_empty() {
                    println!("assistant: {}", snapshot.ai_response);
                }
                last = Some(snapshot.clone());
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    });

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Closing voice session");

    voice.close().await;
    task.await.context("Voice session task failed")?;
    printer.abort();

    Ok(())
}

async fn serve(cfg: &Config, api: Arc<ApiClient>, conversation: Option<String>) -> Result<()> {
    let (chat, task) = ChatSession::spawn(ChatSessionConfig::from(cfg), api.clone(), conversation);
    let app = create_router(AppState::new(chat.clone(), api));

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server failed")?;

    chat.close().await;
    task.await.context("Chat session task failed")?;

    Ok(())
}
