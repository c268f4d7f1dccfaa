use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::{session_url, ConnectionEvent, ConnectionMode, ConnectionState};
use crate::error::ConnectionError;
use crate::protocol::{MessageCodec, OutboundMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for the agent connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// HTTP(S) base address of the agent server
    pub base_url: String,
    /// Delay before the single reconnect attempt (audio mode only)
    pub reconnect_delay: Duration,
    /// Upper bound on a websocket handshake
    pub connect_timeout: Duration,
    /// Frames allowed in flight between `send` and the socket writer
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            reconnect_delay: Duration::from_millis(5000),
            connect_timeout: Duration::from_secs(10),
            outbound_buffer: 64,
        }
    }
}

/// Owns at most one live websocket for a session
pub struct ConnectionManager {
    config: ConnectionConfig,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    link: Option<Link>,
}

struct Link {
    session_id: String,
    mode: ConnectionMode,
    outbound: mpsc::Sender<Message>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum LinkOutcome {
    /// Closed on request of the owner
    Shutdown,
    /// Closed by the peer or the network
    Dropped(String),
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, events: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            events,
            state: Arc::new(state),
            link: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn mode(&self) -> Option<ConnectionMode> {
        self.link.as_ref().map(|link| link.mode)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.link.as_ref().map(|link| link.session_id.as_str())
    }

    /// Open the websocket for `session_id`
    ///
    /// Any previous link is fully closed first. Returns once the handshake
    /// finished or failed; failures are reported as `ConnectionEvent::Error`
    /// and never returned as errors.
    pub async fn connect(&mut self, session_id: &str, mode: ConnectionMode) -> ConnectionState {
        self.disconnect().await;

        let url = match session_url(&self.config.base_url, session_id, mode) {
            Ok(url) => url,
            Err(e) => {
                error!("Cannot connect session {}: {}", session_id, e);
                let _ = self.events.send(ConnectionEvent::Error(e.to_string()));
                return ConnectionState::Disconnected;
            }
        };

        info!("Connecting to agent at {} ({:?} mode)", url, mode);
        self.state.send_replace(ConnectionState::Connecting);

        let stream = match handshake(url.as_str(), self.config.connect_timeout).await {
            Ok(stream) => stream,
            Err(cause) => {
                error!("{}", cause);
                self.state.send_replace(ConnectionState::Disconnected);
                let _ = self.events.send(ConnectionEvent::Error(cause));
                return ConnectionState::Disconnected;
            }
        };

        info!("Connected to agent for session {}", session_id);
        self.state.send_replace(ConnectionState::Open);
        let _ = self.events.send(ConnectionEvent::Opened {
            url: url.to_string(),
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_link(
            LinkContext {
                url: url.to_string(),
                mode,
                reconnect_delay: self.config.reconnect_delay,
                connect_timeout: self.config.connect_timeout,
                outbound: outbound_rx,
                events: self.events.clone(),
                state: Arc::clone(&self.state),
                shutdown: shutdown_rx,
            },
            stream,
        ));

        self.link = Some(Link {
            session_id: session_id.to_string(),
            mode,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            task,
        });

        ConnectionState::Open
    }

    /// Transmit one message if the link is open
    ///
    /// Returns whether the frame was handed to the socket writer. Frames sent
    /// while disconnected or reconnecting are dropped.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        let Some(link) = &self.link else {
            debug!("Dropping {} frame: no connection", message.kind());
            return false;
        };

        if self.state() != ConnectionState::Open {
            debug!("Dropping {} frame: connection {:?}", message.kind(), self.state());
            return false;
        }

        let text = match MessageCodec::encode(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} frame: {}", message.kind(), e);
                return false;
            }
        };

        match link.outbound.try_send(Message::Text(text)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound buffer full, dropping {} frame", message.kind());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Dropping {} frame: link task finished", message.kind());
                false
            }
        }
    }

    /// Close the link and cancel any pending reconnect; waits for the link task
    pub async fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            info!("Closing agent connection for session {}", link.session_id);
            let _ = link.shutdown.send(true);
            if let Err(e) = link.task.await {
                error!("Connection task panicked: {}", e);
            }
        }
        self.state.send_replace(ConnectionState::Disconnected);
    }
}

async fn handshake(url: &str, connect_timeout: Duration) -> Result<WsStream, String> {
    match tokio::time::timeout(connect_timeout, connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(source)) => Err(ConnectionError::Handshake {
            url: url.to_string(),
            source,
        }
        .to_string()),
        Err(_) => Err(format!(
            "websocket handshake with {} timed out after {:?}",
            url, connect_timeout
        )),
    }
}

struct LinkContext {
    url: String,
    mode: ConnectionMode,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    outbound: mpsc::Receiver<Message>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: watch::Receiver<bool>,
}

async fn run_link(ctx: LinkContext, mut stream: WsStream) {
    let LinkContext {
        url,
        mode,
        reconnect_delay,
        connect_timeout,
        mut outbound,
        events,
        state,
        mut shutdown,
    } = ctx;

    loop {
        let reason = match pump(&mut stream, &mut outbound, &events, &mut shutdown).await {
            LinkOutcome::Shutdown => {
                state.send_replace(ConnectionState::Disconnected);
                let _ = events.send(ConnectionEvent::Closed {
                    unexpected: false,
                    reason: "closed by client".to_string(),
                });
                return;
            }
            LinkOutcome::Dropped(reason) => reason,
        };

        warn!("Agent connection closed unexpectedly: {}", reason);
        state.send_replace(ConnectionState::Disconnected);
        let _ = events.send(ConnectionEvent::Closed {
            unexpected: true,
            reason,
        });

        if !mode.is_audio() {
            return;
        }

        info!("Reconnecting in {:?}", reconnect_delay);
        state.send_replace(ConnectionState::Reconnecting);
        let _ = events.send(ConnectionEvent::Reconnecting {
            delay_ms: reconnect_delay.as_millis() as u64,
        });

        let attempt = tokio::select! {
            _ = shutdown.changed() => None,
            result = async {
                tokio::time::sleep(reconnect_delay).await;
                handshake(&url, connect_timeout).await
            } => Some(result),
        };

        // Frames queued before the drop are stale by now
        while outbound.try_recv().is_ok() {}

        match attempt {
            None => {
                state.send_replace(ConnectionState::Disconnected);
                return;
            }
            Some(Ok(new_stream)) => {
                info!("Reconnected to agent at {}", url);
                stream = new_stream;
                state.send_replace(ConnectionState::Open);
                let _ = events.send(ConnectionEvent::Opened { url: url.clone() });
            }
            Some(Err(cause)) => {
                error!("Reconnect failed: {}", cause);
                state.send_replace(ConnectionState::Disconnected);
                let _ = events.send(ConnectionEvent::Error(cause));
                return;
            }
        }
    }
}

async fn pump(
    stream: &mut WsStream,
    outbound: &mut mpsc::Receiver<Message>,
    events: &mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> LinkOutcome {
    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    // Frames accepted by `send` still go out before the close
                    while let Ok(message) = outbound.try_recv() {
                        if stream.send(message).await.is_err() {
                            break;
                        }
                    }
                    if let Err(e) = stream.close(None).await {
                        debug!("Close handshake failed: {}", e);
                    }
                    return LinkOutcome::Shutdown;
                }
            }

            Some(message) = outbound.recv() => {
                if let Err(e) = stream.send(message).await {
                    return LinkOutcome::Dropped(e.to_string());
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ConnectionEvent::Message(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        let _ = events.send(ConnectionEvent::Message(text));
                    }
                    Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) => format!(
                            "closed by agent ({}): {}",
                            u16::from(frame.code),
                            frame.reason
                        ),
                        None => "closed by agent".to_string(),
                    };
                    return LinkOutcome::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return LinkOutcome::Dropped(e.to_string()),
                None => return LinkOutcome::Dropped("stream ended".to_string()),
            },
        }
    }
}
