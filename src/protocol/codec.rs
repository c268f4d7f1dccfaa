use base64::Engine;

use super::messages::{
    Envelope, OutboundMessage, Payload, WireMessage, MIME_AUDIO_PCM, MIME_INTERRUPT,
    MIME_TEXT_PLAIN,
};
use crate::error::CodecError;

/// Bytes per 16-bit PCM sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Encode a PCM frame into its text-safe form
pub fn encode_pcm(pcm: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm)
}

/// Decode a text-safe payload back into PCM bytes
pub fn decode_pcm(payload: &str) -> Result<Vec<u8>, CodecError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(payload)?)
}

pub fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert little-endian PCM bytes to samples; a trailing odd byte is ignored
pub fn pcm_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(BYTES_PER_SAMPLE)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Translates between wire JSON and in-memory envelopes
///
/// The codec knows the sample-frame size agreed at session start (bytes per
/// sample times channel count) and rejects inbound audio that does not line up
/// with it.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    frame_bytes: usize,
}

impl MessageCodec {
    pub fn new(channels: u16) -> Self {
        Self {
            frame_bytes: BYTES_PER_SAMPLE * channels.max(1) as usize,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Build the outbound wire envelope for `message`
    pub fn to_wire(message: &OutboundMessage) -> WireMessage {
        match message {
            OutboundMessage::Audio(pcm) => WireMessage {
                mime_type: Some(MIME_AUDIO_PCM.to_string()),
                data: Some(encode_pcm(pcm)),
                ..Default::default()
            },
            OutboundMessage::Text(text) => WireMessage {
                mime_type: Some(MIME_TEXT_PLAIN.to_string()),
                data: Some(text.clone()),
                ..Default::default()
            },
            OutboundMessage::Interrupt => WireMessage {
                action: Some("interrupt".to_string()),
                mime_type: Some(MIME_INTERRUPT.to_string()),
                ..Default::default()
            },
        }
    }

    /// Serialize an outbound message into one text frame
    pub fn encode(message: &OutboundMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&Self::to_wire(message))?)
    }

    /// Parse one inbound text frame
    pub fn decode(&self, raw: &str) -> Result<Envelope, CodecError> {
        let wire: WireMessage = serde_json::from_str(raw)?;
        self.from_wire(wire)
    }

    pub fn from_wire(&self, wire: WireMessage) -> Result<Envelope, CodecError> {
        let has_control = wire.turn_complete || wire.interrupted;

        let payload = match wire.mime_type.as_deref() {
            None if has_control => Payload::None,
            None => return Err(CodecError::MissingMimeType),
            Some(MIME_AUDIO_PCM) => {
                let data = wire.data.as_deref().ok_or(CodecError::MissingData("audio"))?;
                let pcm = decode_pcm(data)?;
                if pcm.is_empty() || pcm.len() % self.frame_bytes != 0 {
                    return Err(CodecError::MisalignedAudio {
                        len: pcm.len(),
                        frame_bytes: self.frame_bytes,
                    });
                }
                Payload::Audio(pcm)
            }
            Some(MIME_TEXT_PLAIN) => {
                Payload::Text(wire.data.ok_or(CodecError::MissingData("text"))?)
            }
            Some(_) if has_control => Payload::None,
            Some(other) => return Err(CodecError::UnsupportedMimeType(other.to_string())),
        };

        Ok(Envelope {
            payload,
            role: wire.role,
            is_transcript: wire.is_transcript,
            is_user_transcript: wire.is_user_transcript,
            turn_complete: wire.turn_complete,
            interrupted: wire.interrupted,
        })
    }
}
