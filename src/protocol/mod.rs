pub mod codec;
pub mod messages;

pub use codec::{decode_pcm, encode_pcm, pcm_to_samples, samples_to_pcm, MessageCodec};
pub use messages::{Envelope, OutboundMessage, Payload, Role, WireMessage};
