// Shared helpers for integration tests
//
// `MockAgent` is a loopback websocket server standing in for the agent: every
// accepted connection is handed to the test, which scripts what the agent
// says and inspects what the client sent.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

enum AgentAction {
    Send(String),
    Close,
}

pub struct AgentConnection {
    /// Request path and query, e.g. `/ws/abc?is_audio=false`
    pub path: String,
    outbound: mpsc::UnboundedSender<AgentAction>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl AgentConnection {
    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.outbound.send(AgentAction::Send(frame.into()));
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send(value.to_string());
    }

    /// Close the socket from the agent side
    pub fn close(&self) {
        let _ = self.outbound.send(AgentAction::Close);
    }

    /// Next text frame from the client; `None` once the socket is gone
    pub async fn recv(&mut self) -> Option<String> {
        tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for a client frame")
    }

    pub async fn recv_json(&mut self) -> serde_json::Value {
        let frame = self.recv().await.expect("client closed the socket");
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    /// Whether the client sends nothing for `wait`
    pub async fn is_quiet_for(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.inbound.recv()).await.is_err()
    }
}

pub struct MockAgent {
    /// HTTP base address to configure the client with
    pub base_url: String,
    connections: mpsc::UnboundedReceiver<AgentConnection>,
    accept_task: JoinHandle<()>,
}

impl MockAgent {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let mut path = String::new();
                let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    path = req.uri().to_string();
                    Ok(resp)
                };
                let Ok(ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
                    continue;
                };

                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<AgentAction>();
                let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

                tokio::spawn(async move {
                    let (mut sink, mut stream) = ws.split();
                    loop {
                        tokio::select! {
                            action = out_rx.recv() => match action {
                                Some(AgentAction::Send(text)) => {
                                    if sink.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                Some(AgentAction::Close) | None => {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                            frame = stream.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = in_tx.send(text);
                                }
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                });

                let connection = AgentConnection {
                    path,
                    outbound: out_tx,
                    inbound: in_rx,
                };
                if conn_tx.send(connection).is_err() {
                    break;
                }
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            connections: conn_rx,
            accept_task,
        }
    }

    pub async fn next_connection(&mut self) -> AgentConnection {
        self.try_next_connection(WAIT)
            .await
            .expect("client never connected")
    }

    pub async fn try_next_connection(&mut self, wait: Duration) -> Option<AgentConnection> {
        tokio::time::timeout(wait, self.connections.recv())
            .await
            .ok()
            .flatten()
    }

    /// Refuse all further connections
    pub async fn stop_accepting(&mut self) {
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Address on which nothing is listening
pub async fn unused_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Wait until the watched value satisfies `pred`
pub async fn wait_until<T>(rx: &mut watch::Receiver<T>, pred: impl FnMut(&T) -> bool) {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for condition")
        .expect("sender dropped");
}

/// Write a mono or stereo 16-bit WAV file
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &sample in samples {
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// Base64 audio envelope as the agent sends it
pub fn agent_audio(pcm: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "mime_type": "audio/pcm",
        "data": agent_voice_session::protocol::encode_pcm(pcm),
    })
}
