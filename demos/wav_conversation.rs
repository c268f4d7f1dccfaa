// WAV Conversation Example: scripted voice turn without audio hardware
//
// Streams a WAV file to the agent as if it were the microphone, renders the
// agent's spoken answer into another WAV file, and prints the transcript.
//
// Prerequisites:
// - An agent server listening on AGENT_SERVER_URL (default http://localhost:8000)
// - A 16-bit PCM WAV at 16kHz (or 32/48kHz, mono or stereo)
//
// Usage: cargo run --example wav_conversation -- question.wav answer.wav

use agent_voice_session::{
    AudioBackendFactory, AudioFile, AudioSource, ConnectionMode, ConnectionState,
    ConversationSession, PlaybackTarget, SessionConfig,
};
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let input = PathBuf::from(args.next().context("missing input WAV path")?);
    let output = PathBuf::from(args.next().unwrap_or_else(|| "agent-reply.wav".to_string()));

    let audio = AudioFile::open(&input)?;
    info!(
        "Input: {:.1}s at {}Hz, {} channels",
        audio.duration_seconds, audio.sample_rate, audio.channels
    );

    let mut config = SessionConfig::default().with_mode(ConnectionMode::Audio);
    if let Ok(url) = std::env::var("AGENT_SERVER_URL") {
        config = config.with_base_url(url);
    }

    let capture = AudioBackendFactory::create(AudioSource::File(input), config.capture.clone())?;
    let playback =
        AudioBackendFactory::create_playback(PlaybackTarget::File(output.clone()), config.playback.clone())?;

    let session = ConversationSession::new(config, capture, playback);

    if session.connect().await != ConnectionState::Open {
        session.disconnect().await;
        bail!("Could not connect to the agent server");
    }
    session.start_audio().await?;

    // Let the file play out, then leave time for the answer
    sleep(Duration::from_secs_f64(audio.duration_seconds)).await;
    session.stop_audio().await?;
    sleep(Duration::from_secs(10)).await;

    for message in session.transcript() {
        println!("[{}] {}", message.role.as_str(), message.content);
    }

    let status = session.status();
    info!(
        "Sent {} frames, received {} envelopes",
        status.frames_sent, status.envelopes_received
    );

    session.disconnect().await;
    println!("Agent audio written to {}", output.display());
    Ok(())
}
