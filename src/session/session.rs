use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state_machine::{Dispatch, SessionStateMachine};
use super::stats::{ErrorKind, ErrorState, SessionStatus};
use super::aggregator::TranscriptSnapshot;
use super::transcript::TranscriptMessage;
use crate::audio::{
    AudioBackend, AudioCaptureService, AudioFrame, AudioPlaybackService, AudioStreamSource,
    CaptureState, PlaybackBackend,
};
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionMode, ConnectionState};
use crate::error::DeviceError;
use crate::protocol::{MessageCodec, OutboundMessage};

enum SessionCommand {
    Connect {
        mode: ConnectionMode,
        reply: oneshot::Sender<ConnectionState>,
    },
    StartAudio {
        reply: oneshot::Sender<Result<(), DeviceError>>,
    },
    StopAudio {
        reply: oneshot::Sender<Result<(), DeviceError>>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Interrupt {
        reply: oneshot::Sender<bool>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// A live conversation with the agent server
///
/// All protocol and transcript state lives on one driver task; this handle
/// only sends it commands. Captured audio reaches the driver over a channel,
/// agent audio leaves it over the playback command channel, so the audio
/// threads never share mutable state with it.
pub struct ConversationSession {
    session_id: String,

    /// Commands to the driver task
    commands: mpsc::Sender<SessionCommand>,

    /// Latest status snapshot
    status: watch::Receiver<SessionStatus>,

    /// Latest transcript snapshot
    transcript: watch::Receiver<TranscriptSnapshot>,

    /// Driver task, taken by `disconnect`
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationSession {
    /// Create a session and start its driver task
    ///
    /// Nothing is connected or opened yet: the connection waits for `connect`,
    /// the microphone for `start_audio`, and the speaker for the first agent
    /// audio frame.
    pub fn new(
        config: SessionConfig,
        capture: Box<dyn AudioBackend>,
        playback: Box<dyn PlaybackBackend>,
    ) -> Self {
        info!(
            "Creating conversation session: {} ({:?} mode, agent at {})",
            config.session_id, config.mode, config.connection.base_url
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(config.connection.clone(), event_tx);
        let connection_state = connection.subscribe_state();

        let machine = SessionStateMachine::new();
        let transcript = machine.transcript().subscribe();

        let initial = SessionStatus::new(config.session_id.clone(), config.mode);
        let (status_tx, status_rx) = watch::channel(initial.clone());

        let (captured_tx, captured_rx) = mpsc::channel(config.capture_buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(16);

        let driver = SessionDriver {
            session_id: config.session_id.clone(),
            mode: config.mode,
            connection,
            connection_events: event_rx,
            connection_state,
            codec: MessageCodec::new(config.playback.target_channels),
            machine,
            capture: AudioCaptureService::new(capture, config.capture.clone()),
            captured_tx,
            captured_rx,
            capture_overflow: Arc::new(AtomicU64::new(0)),
            playback: AudioPlaybackService::new(playback, config.playback.clone()),
            started: Instant::now(),
            current: initial,
            status: status_tx,
        };

        let task = tokio::spawn(driver.run(command_rx));

        Self {
            session_id: config.session_id,
            commands: command_tx,
            status: status_rx,
            transcript,
            driver: Mutex::new(Some(task)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Every message so far, open ones included
    pub fn transcript(&self) -> Vec<TranscriptMessage> {
        self.transcript
            .borrow()
            .iter()
            .map(|message| TranscriptMessage::clone(message))
            .collect()
    }

    pub fn subscribe_transcript(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.transcript.clone()
    }

    /// Connect in the session's current mode
    pub async fn connect(&self) -> ConnectionState {
        let mode = self.status.borrow().mode;
        self.switch_mode(mode).await
    }

    /// Close the current connection fully, then reconnect in `mode`
    ///
    /// The transcript survives the switch. Leaving audio mode also stops the
    /// microphone.
    pub async fn switch_mode(&self, mode: ConnectionMode) -> ConnectionState {
        self.request(|reply| SessionCommand::Connect { mode, reply })
            .await
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Open the microphone and stream its frames to the agent
    ///
    /// Device failures are returned here and also recorded in the status; the
    /// session stays usable for text.
    pub async fn start_audio(&self) -> Result<(), DeviceError> {
        self.request(|reply| SessionCommand::StartAudio { reply })
            .await
            .unwrap_or_else(|| Err(closed()))
    }

    pub async fn stop_audio(&self) -> Result<(), DeviceError> {
        self.request(|reply| SessionCommand::StopAudio { reply })
            .await
            .unwrap_or_else(|| Err(closed()))
    }

    /// Send typed text; returns whether it was transmitted
    ///
    /// Text sent while the connection is not open is dropped silently and
    /// leaves no local echo.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        self.request(|reply| SessionCommand::SendText { text, reply })
            .await
            .unwrap_or(false)
    }

    /// Barge in: ask the agent to stop and drop queued agent audio locally
    ///
    /// Local playback is cancelled even when the request could not be sent.
    pub async fn interrupt(&self) -> bool {
        self.request(|reply| SessionCommand::Interrupt { reply })
            .await
            .unwrap_or(false)
    }

    /// Tear the session down: microphone, speaker, then connection
    ///
    /// Returns once every resource has been released. Safe to call twice.
    pub async fn disconnect(&self) {
        let _ = self.request(|reply| SessionCommand::Shutdown { reply }).await;

        let task = self.driver.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Session driver for {} panicked: {}", self.session_id, e);
            }
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Option<T> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(command(reply)).await.is_err() {
            debug!("Session {} is closed", self.session_id);
            return None;
        }
        response.await.ok()
    }
}

fn closed() -> DeviceError {
    DeviceError::Backend("session closed".to_string())
}

/// State owned by the driver task
struct SessionDriver {
    session_id: String,
    mode: ConnectionMode,

    connection: ConnectionManager,
    connection_events: mpsc::UnboundedReceiver<ConnectionEvent>,
    connection_state: watch::Receiver<ConnectionState>,

    codec: MessageCodec,
    machine: SessionStateMachine,

    capture: AudioCaptureService,
    captured_tx: mpsc::Sender<AudioFrame>,
    captured_rx: mpsc::Receiver<AudioFrame>,

    /// Frames the capture callback could not queue
    capture_overflow: Arc<AtomicU64>,

    playback: AudioPlaybackService,

    /// Origin for agent frame timestamps
    started: Instant,

    /// Counters and last error; state fields are refreshed on publish
    current: SessionStatus,
    status: watch::Sender<SessionStatus>,
}

impl SessionDriver {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!("Session {} driver started", self.session_id);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.connection_events.recv() => {
                    self.handle_connection_event(event).await;
                }
                Some(frame) = self.captured_rx.recv() => self.transmit(frame),
                Ok(()) = self.connection_state.changed() => {}
            }

            self.publish();
        }

        // Every handle is gone
        self.teardown().await;
    }

    /// Status is published before each reply so callers observe the outcome
    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect { mode, reply } => {
                let state = self.connect(mode).await;
                self.publish();
                let _ = reply.send(state);
            }
            SessionCommand::StartAudio { reply } => {
                let result = self.start_audio().await;
                self.publish();
                let _ = reply.send(result);
            }
            SessionCommand::StopAudio { reply } => {
                let result = self.stop_audio().await;
                self.publish();
                let _ = reply.send(result);
            }
            SessionCommand::SendText { text, reply } => {
                let sent = self.connection.send(&OutboundMessage::Text(text.clone()));
                if sent {
                    self.machine.record_outbound_text(&text);
                } else {
                    debug!("Dropped text for {}: connection not open", self.session_id);
                }
                self.publish();
                let _ = reply.send(sent);
            }
            SessionCommand::Interrupt { reply } => {
                let sent = self.connection.send(&OutboundMessage::Interrupt);
                self.playback.cancel();
                self.machine.record_local_interrupt();
                info!("Session {} interrupted the agent (sent: {})", self.session_id, sent);
                self.publish();
                let _ = reply.send(sent);
            }
            SessionCommand::Shutdown { reply } => {
                // Handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    async fn connect(&mut self, mode: ConnectionMode) -> ConnectionState {
        if !mode.is_audio() {
            if let Err(e) = self.stop_audio().await {
                warn!("Failed to stop microphone while leaving audio mode: {}", e);
            }
        }

        self.mode = mode;
        self.current.mode = mode;
        let state = self.connection.connect(&self.session_id, mode).await;

        // Handshake failures arrive as events; surface them before replying
        while let Ok(event) = self.connection_events.try_recv() {
            self.handle_connection_event(event).await;
        }
        self.publish();
        state
    }

    async fn start_audio(&mut self) -> Result<(), DeviceError> {
        if self.capture.state() == CaptureState::Capturing {
            return Ok(());
        }

        let frames = self.captured_tx.clone();
        let overflow = Arc::clone(&self.capture_overflow);
        let result = self
            .capture
            .start(move |frame| {
                // Never block the forwarder on a slow connection
                if frames.try_send(frame).is_err() {
                    overflow.fetch_add(1, Ordering::Relaxed);
                }
            })
            .await;

        match &result {
            Ok(()) => {
                if !self.mode.is_audio() {
                    warn!(
                        "Microphone started on {} while connected in text mode",
                        self.session_id
                    );
                }
            }
            Err(e) => {
                error!("Failed to start microphone for {}: {}", self.session_id, e);
                self.record_error(ErrorKind::Device, e.to_string());
            }
        }
        self.publish();
        result
    }

    async fn stop_audio(&mut self) -> Result<(), DeviceError> {
        let result = self.capture.stop().await;

        // Frames captured before the stop still go out
        while let Ok(frame) = self.captured_rx.try_recv() {
            self.transmit(frame);
        }

        if let Err(e) = &result {
            self.record_error(ErrorKind::Device, e.to_string());
        }
        self.publish();
        result
    }

    fn transmit(&mut self, frame: AudioFrame) {
        if self.connection.send(&OutboundMessage::Audio(frame.to_pcm())) {
            self.current.frames_sent += 1;
        } else {
            self.current.frames_dropped += 1;
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened { url } => {
                info!("Session {} connected to {}", self.session_id, url);
            }
            ConnectionEvent::Message(raw) => self.handle_inbound(&raw).await,
            ConnectionEvent::Closed { unexpected, reason } => {
                if unexpected {
                    warn!("Session {} lost its connection: {}", self.session_id, reason);
                    self.record_error(ErrorKind::Transport, format!("connection closed: {}", reason));
                } else {
                    debug!("Session {} connection closed: {}", self.session_id, reason);
                }
            }
            ConnectionEvent::Reconnecting { delay_ms } => {
                info!("Session {} reconnecting in {}ms", self.session_id, delay_ms);
            }
            ConnectionEvent::Error(cause) => {
                error!("Session {} connection error: {}", self.session_id, cause);
                self.record_error(ErrorKind::Transport, cause);
            }
        }
    }

    async fn handle_inbound(&mut self, raw: &str) {
        let envelope = match self.codec.decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed envelope for {}: {}", self.session_id, e);
                self.current.envelopes_malformed += 1;
                self.record_error(ErrorKind::Decode, e.to_string());
                return;
            }
        };
        self.current.envelopes_received += 1;

        match self.machine.handle(envelope) {
            Dispatch::None => {}
            Dispatch::Play(pcm) => self.play(&pcm).await,
            Dispatch::CancelPlayback => self.playback.cancel(),
        }
    }

    async fn play(&mut self, pcm: &[u8]) {
        if !self.current.playback_available {
            return;
        }

        let config = self.playback.config();
        let frame = AudioFrame::from_pcm(
            pcm,
            config.target_sample_rate,
            config.target_channels,
            self.started.elapsed().as_millis() as u64,
            AudioStreamSource::Agent,
        );

        if let Err(e) = self.playback.enqueue(frame).await {
            error!(
                "Playback unavailable for {}; continuing without agent audio: {}",
                self.session_id, e
            );
            self.current.playback_available = false;
            self.record_error(ErrorKind::Device, e.to_string());
        }
    }

    fn record_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.current.last_error = Some(ErrorState::new(kind, message));
    }

    fn publish(&mut self) {
        let indicators = self.machine.indicators();
        let status = &mut self.current;
        status.connection = self.connection.state();
        status.capture = self.capture.state();
        status.playback = self.playback.state();
        status.agent_responding = indicators.agent_responding;
        status.user_speaking = indicators.user_speaking;
        status.messages = self.machine.transcript().len();

        let mut snapshot = status.clone();
        snapshot.frames_dropped += self.capture_overflow.load(Ordering::Relaxed);
        self.status.send_replace(snapshot);
    }

    async fn teardown(&mut self) {
        info!("Tearing down session {}", self.session_id);

        if let Err(e) = self.stop_audio().await {
            warn!("Microphone did not stop cleanly: {}", e);
        }
        if let Err(e) = self.playback.shutdown().await {
            warn!("Speaker did not stop cleanly: {}", e);
        }
        self.connection.disconnect().await;

        while let Ok(event) = self.connection_events.try_recv() {
            if let ConnectionEvent::Error(cause) = event {
                debug!("Ignoring late connection error during teardown: {}", cause);
            }
        }

        self.publish();
        info!(
            "Session {} closed ({} messages, {} frames sent)",
            self.session_id,
            self.machine.transcript().len(),
            self.current.frames_sent
        );
    }
}
