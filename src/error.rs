use thiserror::Error;

/// Reasons an inbound envelope is rejected by the codec
///
/// A codec error is fatal to one frame only; the session drops the frame and
/// keeps running.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope has neither a mime_type nor a control flag")]
    MissingMimeType,

    #[error("unsupported mime_type: {0}")]
    UnsupportedMimeType(String),

    #[error("{0} envelope is missing its data field")]
    MissingData(&'static str),

    #[error("audio payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("audio payload of {len} bytes is not a multiple of the {frame_bytes}-byte sample frame")]
    MisalignedAudio { len: usize, frame_bytes: usize },
}

/// Audio device failures (capture or playback)
///
/// Never retried automatically; a device error disables only the affected
/// modality.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("permission denied for {0}")]
    PermissionDenied(String),

    #[error("no audio device available: {0}")]
    NoDevice(String),

    #[error("device {0} is held by another session")]
    Busy(String),

    #[error("unsupported audio format: {0}")]
    Unsupported(String),

    #[error("audio backend failure: {0}")]
    Backend(String),
}

/// Failures while establishing the agent connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("invalid agent base URL {url}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("websocket handshake with {url} failed: {source}")]
    Handshake {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}
