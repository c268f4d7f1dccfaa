use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::audio::{
    AudioBackend, AudioBackendFactory, AudioSource, PlaybackBackend, PlaybackTarget,
    UnavailableDevice,
};
use crate::session::{ConversationSession, SessionConfig, SessionOverrides};

/// Builds sessions with the process-wide audio selection
#[derive(Clone)]
pub struct SessionFactory {
    /// Settings every new session starts from
    template: SessionConfig,

    input: AudioSource,

    output: PlaybackTarget,
}

impl SessionFactory {
    pub fn new(template: SessionConfig, input: AudioSource, output: PlaybackTarget) -> Self {
        Self {
            template,
            input,
            output,
        }
    }

    /// Build and start a session
    ///
    /// A device that cannot be created only disables its own direction; the
    /// session is still usable for text.
    pub fn create(&self, overrides: SessionOverrides) -> ConversationSession {
        let mut config = self.template.clone();
        config.session_id = overrides
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if let Some(mode) = overrides.mode {
            config.mode = mode;
        }

        let capture = AudioBackendFactory::create(self.input.clone(), config.capture.clone())
            .unwrap_or_else(|e| {
                warn!("Capture unavailable for {}: {}", config.session_id, e);
                Box::new(UnavailableDevice::new(e)) as Box<dyn AudioBackend>
            });

        let playback =
            AudioBackendFactory::create_playback(self.output.clone(), config.playback.clone())
                .unwrap_or_else(|e| {
                    warn!("Playback unavailable for {}: {}", config.session_id, e);
                    Box::new(UnavailableDevice::new(e)) as Box<dyn PlaybackBackend>
                });

        ConversationSession::new(config, capture, playback)
    }
}

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Active sessions (session_id → session)
    pub sessions: Arc<RwLock<HashMap<String, Arc<ConversationSession>>>>,

    pub factory: SessionFactory,
}

impl AppState {
    pub fn new(factory: SessionFactory) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            factory,
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<ConversationSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Disconnect every session; used on server shutdown
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.disconnect().await;
        }
    }
}
