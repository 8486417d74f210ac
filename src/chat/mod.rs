//! Text chat with the research assistant
//!
//! This module provides the `ChatSession` abstraction that manages:
//! - The chat channel to the AI service
//! - Streaming assembly of assistant replies
//! - Quoting a selection into the next message
//! - Lazy conversation creation and history loading

mod config;
mod message;
mod quote;
mod session;
mod snapshot;
mod state;

pub use config::ChatSessionConfig;
pub use message::{Message, Role};
pub use quote::{AnchorPoint, Quote, QuoteSelectionController, Rect, SelectionHighlight, SelectionSnapshot};
pub use session::{ChatSession, ChatSessionHandle};
pub use snapshot::ChatSnapshot;
pub use state::{Applied, ChatSessionState, PlanSection};
