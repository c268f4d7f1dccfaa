use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::AudioBackendConfig;
use crate::connection::{ConnectionConfig, ConnectionMode};

/// Configuration for a conversation session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identifier the agent server keys the conversation on
    pub session_id: String,

    /// Mode used by `connect`
    pub mode: ConnectionMode,

    /// Agent server address and reconnect policy
    pub connection: ConnectionConfig,

    /// Format of captured frames sent upstream (16kHz mono)
    pub capture: AudioBackendConfig,

    /// Format of agent audio received for playback (24kHz mono)
    pub playback: AudioBackendConfig,

    /// Captured frames allowed to wait for the connection before being dropped
    pub capture_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            mode: ConnectionMode::Text,
            connection: ConnectionConfig::default(),
            capture: AudioBackendConfig::default(),
            playback: AudioBackendConfig {
                target_sample_rate: 24000,
                ..AudioBackendConfig::default()
            },
            capture_buffer: 32,
        }
    }
}

impl SessionConfig {
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_mode(mut self, mode: ConnectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.connection.base_url = base_url.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.connection.reconnect_delay = delay;
        self
    }
}

/// Subset of the session configuration a remote caller may choose
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOverrides {
    pub session_id: Option<String>,
    pub mode: Option<ConnectionMode>,
}
