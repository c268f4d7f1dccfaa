// Text Chat Example: typed conversation with an agent server
//
// Connects one session in text mode, sends a single question, and prints the
// agent's reply once its turn completes.
//
// Prerequisites:
// - An agent server listening on AGENT_SERVER_URL (default http://localhost:8000)
//
// Usage: cargo run --example text_chat -- "What are your opening hours?"

use agent_voice_session::audio::UnavailableDevice;
use agent_voice_session::session::MessageStatus;
use agent_voice_session::{
    AudioBackendFactory, ConnectionMode, ConnectionState, ConversationSession, DeviceError,
    PlaybackTarget, Role, SessionConfig,
};
use anyhow::{bail, Result};
use std::time::Duration;
use tokio::time::timeout;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Hello! What can you help me with?".to_string());

    let mut config = SessionConfig::default().with_mode(ConnectionMode::Text);
    if let Ok(url) = std::env::var("AGENT_SERVER_URL") {
        config = config.with_base_url(url);
    }

    // Text only: no microphone, agent audio (if any) is discarded
    let capture = Box::new(UnavailableDevice::new(DeviceError::NoDevice(
        "text chat has no microphone".to_string(),
    )));
    let playback =
        AudioBackendFactory::create_playback(PlaybackTarget::Discard, config.playback.clone())?;

    let session = ConversationSession::new(config, capture, playback);
    info!("Session ID: {}", session.session_id());

    if session.connect().await != ConnectionState::Open {
        let reason = session
            .status()
            .last_error
            .map(|e| e.message)
            .unwrap_or_else(|| "unknown error".to_string());
        session.disconnect().await;
        bail!("Could not connect: {}", reason);
    }

    println!("you> {}", question);
    session.send_text(question).await;

    // Wait for a closed agent message
    let mut transcript = session.subscribe_transcript();
    let reply = timeout(Duration::from_secs(60), async {
        loop {
            let done = transcript
                .borrow_and_update()
                .iter()
                .rev()
                .find(|m| m.role == Role::Agent && m.status == MessageStatus::Closed)
                .map(|m| m.content.clone());
            if let Some(content) = done {
                return Some(content);
            }
            if transcript.changed().await.is_err() {
                return None;
            }
        }
    })
    .await;

    match reply {
        Ok(Some(content)) => println!("agent> {}", content),
        Ok(None) => println!("(session closed before the agent answered)"),
        Err(_) => println!("(no answer within 60 seconds)"),
    }

    session.disconnect().await;
    Ok(())
}
