use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audio::{CaptureState, PlaybackState};
use crate::connection::{ConnectionMode, ConnectionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Connection refused, handshake failure or abrupt close
    Transport,
    /// A malformed inbound envelope was dropped
    Decode,
    /// Microphone or speaker unavailable
    Device,
}

/// Most recent failure, kept until the next one replaces it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorState {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorState {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Snapshot of a conversation session for presentation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,

    /// Mode of the current or most recent connection
    pub mode: ConnectionMode,

    pub connection: ConnectionState,

    pub capture: CaptureState,

    pub playback: PlaybackState,

    /// False once the output device failed; text keeps working
    pub playback_available: bool,

    /// Agent audio is arriving for the current turn
    pub agent_responding: bool,

    /// User speech is being recognised for the current turn
    pub user_speaking: bool,

    /// Captured frames handed to the connection
    pub frames_sent: u64,

    /// Captured frames dropped because the link was not open
    pub frames_dropped: u64,

    /// Well-formed inbound envelopes
    pub envelopes_received: u64,

    /// Inbound envelopes dropped as malformed
    pub envelopes_malformed: u64,

    /// Entries in the transcript, open or closed
    pub messages: usize,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    pub last_error: Option<ErrorState>,
}

impl SessionStatus {
    pub fn new(session_id: impl Into<String>, mode: ConnectionMode) -> Self {
        Self {
            session_id: session_id.into(),
            mode,
            connection: ConnectionState::Disconnected,
            capture: CaptureState::Stopped,
            playback: PlaybackState::Idle,
            playback_available: true,
            agent_responding: false,
            user_speaking: false,
            frames_sent: 0,
            frames_dropped: 0,
            envelopes_received: 0,
            envelopes_malformed: 0,
            messages: 0,
            started_at: Utc::now(),
            last_error: None,
        }
    }
}
