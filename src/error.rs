use thiserror::Error;

/// Failures a session reports to the user (or deliberately swallows)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Transport not open at send time, socket error or close
    #[error("AI service is disconnected: {0}")]
    Connectivity(String),

    /// Microphone access denied or no input device
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// Malformed inbound frame or undecodable audio
    #[error("could not decode: {0}")]
    Decode(String),

    /// Conversation creation failed before the first send.
    /// `draft` is the text that was not delivered.
    #[error("failed to create new chat: {reason}")]
    Dependency { reason: String, draft: String },
}

pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    pub fn connectivity(reason: impl ToString) -> Self {
        Self::Connectivity(reason.to_string())
    }

    pub fn permission(reason: impl ToString) -> Self {
        Self::Permission(reason.to_string())
    }

    pub fn decode(reason: impl ToString) -> Self {
        Self::Decode(reason.to_string())
    }
}
