pub mod backend;
pub mod capture;
pub mod convert;
pub mod file;
pub mod lease;
pub mod playback;
pub mod sink;

#[cfg(feature = "device-audio")]
pub mod device;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource,
    AudioStreamSource, PlaybackBackend, PlaybackCommand, PlaybackTarget, UnavailableDevice,
};
pub use capture::{AudioCaptureService, CaptureState};
pub use convert::{FrameAssembler, FrameNormalizer, PlaybackConverter, StreamResampler};
pub use file::{AudioFile, WavFileSource};
pub use lease::DeviceLease;
pub use playback::{AudioPlaybackService, PlaybackState, RenderQueue};
pub use sink::{NullSink, WavFileSink};
