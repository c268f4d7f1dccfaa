use agent_voice_session::config::DEFAULT_CONFIG_PATH;
use agent_voice_session::session::{SessionOverrides, TranscriptSnapshot};
use agent_voice_session::{
    create_router, AppState, AudioSource, Config, ConnectionMode, ConnectionState,
    ConversationSession, PlaybackTarget, SessionFactory,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Talk to an agent server over a realtime voice/text session
#[derive(Parser, Debug)]
#[command(name = "agent-voice-session", version)]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Agent server address, overrides configuration and AGENT_SERVER_URL
    #[arg(long)]
    base_url: Option<String>,

    /// Connection mode: audio or text
    #[arg(long, default_value = "text")]
    mode: ConnectionMode,

    /// Session identifier (default: random UUID)
    #[arg(long)]
    session_id: Option<String>,

    /// Microphone ("mic") or a WAV file to stream
    #[arg(long, default_value = "mic")]
    input: AudioSource,

    /// Speaker ("speaker"), "null", or a WAV file to render into
    #[arg(long, default_value = "speaker")]
    output: PlaybackTarget,

    /// Serve the HTTP control API
    #[arg(long)]
    http: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Agent Voice Session v{}", env!("CARGO_PKG_VERSION"));

    let mut template = cfg.session_config().with_mode(cli.mode);
    if let Some(base_url) = cli.base_url {
        template = template.with_base_url(base_url);
    }
    info!("Agent server: {}", template.connection.base_url);

    let factory = SessionFactory::new(template, cli.input, cli.output);
    let state = AppState::new(factory.clone());

    let session = Arc::new(factory.create(SessionOverrides {
        session_id: cli.session_id,
        mode: Some(cli.mode),
    }));
    state
        .sessions
        .write()
        .await
        .insert(session.session_id().to_string(), Arc::clone(&session));

    let server = if cli.http || cfg.http.enabled {
        let addr = cfg.http_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
        info!("HTTP API listening on {}", addr);

        let router = create_router(state.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("HTTP server failed: {}", e);
            }
        }))
    } else {
        None
    };

    match session.connect().await {
        ConnectionState::Open => info!("Session {} connected", session.session_id()),
        other => warn!(
            "Session {} is {:?}; typed text will be dropped until it connects",
            session.session_id(),
            other
        ),
    }

    if cli.mode.is_audio() {
        if let Err(e) = session.start_audio().await {
            warn!("Microphone unavailable, continuing with text only: {}", e);
        }
    }

    let printer = tokio::spawn(print_closed_messages(session.subscribe_transcript()));

    println!("Type a message, or /interrupt, /audio on, /audio off, /mode <audio|text>, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if !handle_line(&session, line.trim()).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    state.close_all().await;
    printer.abort();
    if let Some(server) = server {
        server.abort();
    }

    Ok(())
}

/// Returns false when the user asked to quit
async fn handle_line(session: &ConversationSession, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" | "/exit" => return false,
        "/interrupt" => {
            session.interrupt().await;
        }
        "/audio on" => {
            if let Err(e) = session.start_audio().await {
                warn!("Microphone unavailable: {}", e);
            }
        }
        "/audio off" => {
            if let Err(e) = session.stop_audio().await {
                warn!("Microphone did not stop cleanly: {}", e);
            }
        }
        command if command.starts_with("/mode ") => {
            match command.trim_start_matches("/mode ").parse::<ConnectionMode>() {
                Ok(mode) => {
                    let state = session.switch_mode(mode).await;
                    info!("Reconnected in {:?} mode: {:?}", mode, state);
                }
                Err(e) => warn!("{}", e),
            }
        }
        text => {
            if !session.send_text(text).await {
                warn!("Not connected; message dropped");
            }
        }
    }
    true
}

/// Print each message once it is closed, in conversation order
async fn print_closed_messages(mut transcript: watch::Receiver<TranscriptSnapshot>) {
    let mut printed = 0usize;

    loop {
        {
            let messages = transcript.borrow_and_update();
            while let Some(message) = messages.get(printed) {
                if message.is_open() {
                    break;
                }
                println!("[{}] {}", message.role.as_str(), message.content);
                printed += 1;
            }
        }

        if transcript.changed().await.is_err() {
            break;
        }
    }
}
