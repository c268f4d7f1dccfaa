//! Agent connection management
//!
//! One duplex websocket per session, addressed by session identifier and mode:
//! - `ConnectionManager::connect` supersedes a prior link only after it closed
//! - `send` drops frames while the link is not open (no outbound queueing)
//! - audio-mode links retry once after an unexpected close

mod manager;
mod address;

use serde::{Deserialize, Serialize};

pub use self::manager::{ConnectionConfig, ConnectionManager};
pub use self::address::session_url;

/// Whether the session streams microphone audio or only typed text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Audio,
    Text,
}

impl ConnectionMode {
    pub fn is_audio(&self) -> bool {
        matches!(self, ConnectionMode::Audio)
    }
}

impl std::str::FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "audio" => Ok(ConnectionMode::Audio),
            "text" => Ok(ConnectionMode::Text),
            other => Err(format!("unknown connection mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Waiting out the reconnect delay or retrying the handshake
    Reconnecting,
}

/// Notifications from the connection to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened { url: String },
    /// One inbound text frame, not yet decoded
    Message(String),
    Closed { unexpected: bool, reason: String },
    Reconnecting { delay_ms: u64 },
    /// Connection-level failure with a human-readable cause
    Error(String),
}
