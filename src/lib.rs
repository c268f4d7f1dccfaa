pub mod audio;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod protocol;
pub mod session;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioCaptureService, AudioFile,
    AudioFrame, AudioPlaybackService, AudioSource, AudioStreamSource, PlaybackBackend,
    PlaybackTarget, WavFileSink, WavFileSource,
};
pub use config::Config;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionMode, ConnectionState};
pub use error::{CodecError, ConnectionError, DeviceError};
pub use http::{create_router, AppState, SessionFactory};
pub use protocol::{Envelope, MessageCodec, OutboundMessage, Role};
pub use session::{
    ConversationSession, ErrorKind, SessionConfig, SessionStateMachine, SessionStatus,
    TranscriptAggregator, TranscriptMessage,
};
