//! Conversation session management
//!
//! This module provides the `ConversationSession` abstraction that manages:
//! - The agent connection and its mode (audio or text)
//! - Microphone capture and agent audio playback
//! - Inbound envelope dispatch through `SessionStateMachine`
//! - The transcript read model and session status

mod aggregator;
mod config;
mod session;
mod state_machine;
mod stats;
mod transcript;

pub use aggregator::{TranscriptAggregator, TranscriptSnapshot};
pub use config::{SessionConfig, SessionOverrides};
pub use session::ConversationSession;
pub use state_machine::{Dispatch, Indicators, SessionStateMachine, Turn};
pub use stats::{ErrorKind, ErrorState, SessionStatus};
pub use transcript::{merge_fragment, MessageStatus, TranscriptMessage};
