pub mod api;
pub mod audio;
pub mod chat;
pub mod config;
pub mod error;
pub mod http;
pub mod protocol;
pub mod transport;
pub mod voice;

pub use api::{ApiClient, ConversationApi};
pub use audio::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioCaptureLoop, AudioFrame, AudioSource};
pub use chat::{ChatSession, ChatSessionConfig, ChatSessionHandle, ChatSessionState, ChatSnapshot};
pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use http::{create_router, AppState};
pub use transport::{SessionTransport, TransportConfig, TransportStatus};
pub use voice::{VoiceSession, VoiceSessionConfig, VoiceSessionHandle, VoiceSnapshot};
