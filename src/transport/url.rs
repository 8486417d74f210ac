use anyhow::{Context, Result};
use reqwest::Url;
use serde::Serialize;

/// Sent as `session_id` before a conversation exists
pub const PLACEHOLDER_SESSION_ID: &str = "temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Chat,
    Voice,
}

impl ChannelKind {
    pub fn path(&self) -> &'static str {
        match self {
            ChannelKind::Chat => "/ai-service/ws/chat",
            ChannelKind::Voice => "/ai-service/ws/voice",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Chat => "chat",
            ChannelKind::Voice => "voice",
        }
    }
}

/// Build the channel URL: `{base}{path}?token=..&session_id=..`
pub fn channel_url(
    base_url: &str,
    kind: ChannelKind,
    token: &str,
    conversation_id: Option<&str>,
) -> Result<Url> {
    let raw = format!("{}{}", base_url.trim_end_matches('/'), kind.path());
    let mut url = Url::parse(&raw).with_context(|| format!("Invalid AI service URL: {}", raw))?;

    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("session_id", conversation_id.unwrap_or(PLACEHOLDER_SESSION_ID));

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_url_with_conversation() {
        let url = channel_url("ws://localhost:8000/", ChannelKind::Chat, "abc", Some("42")).unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/ai-service/ws/chat?token=abc&session_id=42"
        );
    }

    #[test]
    fn test_voice_url_uses_placeholder() {
        let url = channel_url("wss://ai.example.com", ChannelKind::Voice, "t", None).unwrap();
        assert_eq!(url.path(), "/ai-service/ws/voice");
        assert!(url.query().unwrap().ends_with("session_id=temp"));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(channel_url("not a url", ChannelKind::Chat, "t", None).is_err());
    }
}
