use serde::{Deserialize, Serialize};

pub const MIME_AUDIO_PCM: &str = "audio/pcm";
pub const MIME_TEXT_PLAIN: &str = "text/plain";
pub const MIME_INTERRUPT: &str = "interrupt";

/// Which side of the conversation produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "model")]
    Agent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
        }
    }
}

/// JSON envelope exactly as it travels over the agent connection
///
/// Both directions share this shape. Inbound control frames such as
/// `{"turn_complete": true}` carry no `mime_type` at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Base64 PCM for audio, UTF-8 text otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_transcript: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_user_transcript: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub turn_complete: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub interrupted: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Decoded content of an inbound envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw little-endian 16-bit PCM bytes
    Audio(Vec<u8>),
    Text(String),
    /// Control-only frame
    None,
}

/// Inbound envelope after decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub payload: Payload,
    pub role: Option<Role>,
    pub is_transcript: bool,
    pub is_user_transcript: bool,
    pub turn_complete: bool,
    pub interrupted: bool,
}

impl Envelope {
    pub fn turn_complete() -> Self {
        Self::control(true, false)
    }

    pub fn interrupted() -> Self {
        Self::control(false, true)
    }

    pub fn audio(pcm: Vec<u8>) -> Self {
        Self {
            payload: Payload::Audio(pcm),
            role: Some(Role::Agent),
            ..Self::control(false, false)
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            payload: Payload::Text(text.into()),
            role: Some(role),
            ..Self::control(false, false)
        }
    }

    /// Partial recognised speech from the user's microphone
    pub fn user_transcript(text: impl Into<String>) -> Self {
        Self {
            is_transcript: true,
            is_user_transcript: true,
            ..Self::text(Role::User, text)
        }
    }

    /// Partial recognised speech of the agent's own audio output
    pub fn agent_transcript(text: impl Into<String>) -> Self {
        Self {
            is_transcript: true,
            ..Self::text(Role::Agent, text)
        }
    }

    fn control(turn_complete: bool, interrupted: bool) -> Self {
        Self {
            payload: Payload::None,
            role: None,
            is_transcript: false,
            is_user_transcript: false,
            turn_complete,
            interrupted,
        }
    }
}

/// Everything the client sends to the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Captured PCM frame (little-endian i16 bytes)
    Audio(Vec<u8>),
    /// Typed user text
    Text(String),
    /// Client-side barge-in
    Interrupt,
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Audio(_) => MIME_AUDIO_PCM,
            OutboundMessage::Text(_) => MIME_TEXT_PLAIN,
            OutboundMessage::Interrupt => MIME_INTERRUPT,
        }
    }
}
