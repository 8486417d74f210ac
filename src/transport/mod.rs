//! Duplex channel to the AI service
//!
//! One `SessionTransport` per (conversation, channel kind). Every open
//! starts a new generation; inbound events carry the generation they were
//! produced under so a session can discard residue from a closed link.

mod client;
mod url;

pub use client::{SessionTransport, TransportConfig, TransportEvent, TransportEventKind, TransportStatus};
pub use url::{channel_url, ChannelKind, PLACEHOLDER_SESSION_ID};
