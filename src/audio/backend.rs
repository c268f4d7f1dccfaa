use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::DeviceError;
use crate::protocol::{pcm_to_samples, samples_to_pcm};

/// Where a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioStreamSource {
    /// Live microphone input
    Microphone,
    /// Pre-recorded WAV input
    File,
    /// Agent speech received over the connection
    Agent,
}

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
    pub source: AudioStreamSource,
}

impl AudioFrame {
    pub fn from_pcm(
        pcm: &[u8],
        sample_rate: u32,
        channels: u16,
        timestamp_ms: u64,
        source: AudioStreamSource,
    ) -> Self {
        Self {
            samples: pcm_to_samples(pcm),
            sample_rate,
            channels,
            timestamp_ms,
            source,
        }
    }

    /// Little-endian PCM bytes, as sent on the wire
    pub fn to_pcm(&self) -> Vec<u8> {
        samples_to_pcm(&self.samples)
    }

    pub fn duration_ms(&self) -> u64 {
        let per_second = self.sample_rate as u64 * self.channels.max(1) as u64;
        if per_second == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / per_second
    }
}

/// Audio format agreed at session start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBackendConfig {
    /// Target sample rate; sources at other rates are resampled
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono, 2 = stereo)
    pub target_channels: u16,
    /// Duration of one fixed-size frame in milliseconds
    pub frame_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // Speech recognisers expect 16kHz
            target_channels: 1,        // Mono
            frame_duration_ms: 100,    // 100ms frames
        }
    }
}

impl AudioBackendConfig {
    /// Interleaved samples in one frame
    pub fn samples_per_frame(&self) -> usize {
        let per_channel = self.target_sample_rate as u64 * self.frame_duration_ms / 1000;
        (per_channel as usize).max(1) * self.target_channels.max(1) as usize
    }

    /// Bytes in one frame on the wire
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * crate::protocol::codec::BYTES_PER_SAMPLE
    }

    /// Reject formats no device or conversion can produce
    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.target_sample_rate == 0
            || self.target_channels == 0
            || self.target_channels > 2
            || self.frame_duration_ms == 0
        {
            return Err(DeviceError::Unsupported(format!(
                "{}Hz/{}ch with {}ms frames",
                self.target_sample_rate, self.target_channels, self.frame_duration_ms
            )));
        }
        Ok(())
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - cpal microphone input (`device-audio` feature)
/// - WAV file input (testing / scripted conversations)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire the input device and start capturing
    ///
    /// Returns a channel receiver that will receive audio frames of any size.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError>;

    /// Release the input device; no frames are produced after this returns
    async fn stop(&mut self) -> Result<(), DeviceError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;

    /// Identifier of the physical device, if it must be held exclusively
    fn device_id(&self) -> Option<String> {
        None
    }
}

/// Instructions for the render path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackCommand {
    /// Append samples to the render queue
    Frame(Vec<i16>),
    /// Discard everything queued but not yet rendered
    Flush,
}

/// Audio playback backend trait
///
/// The backend owns the render loop (a real-time audio callback or a paced
/// writer thread). It only ever receives commands over `commands`; no state is
/// shared with the session.
#[async_trait::async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Acquire the output device and start rendering commands
    async fn start(
        &mut self,
        commands: std::sync::mpsc::Receiver<PlaybackCommand>,
    ) -> Result<(), DeviceError>;

    /// Stop rendering and release the output device
    async fn stop(&mut self) -> Result<(), DeviceError>;

    fn is_active(&self) -> bool;

    fn name(&self) -> &str;

    fn device_id(&self) -> Option<String> {
        None
    }
}

/// Audio input selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default microphone
    Microphone,
    /// WAV file, paced in real time
    File(PathBuf),
}

impl std::str::FromStr for AudioSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mic" | "microphone" => AudioSource::Microphone,
            path => AudioSource::File(PathBuf::from(path)),
        })
    }
}

/// Audio output selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackTarget {
    /// Default speaker
    Speaker,
    /// Render agent audio into a WAV file
    File(PathBuf),
    /// Accept and discard agent audio
    Discard,
}

impl std::str::FromStr for PlaybackTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "speaker" => PlaybackTarget::Speaker,
            "null" | "none" | "discard" => PlaybackTarget::Discard,
            path => PlaybackTarget::File(PathBuf::from(path)),
        })
    }
}

/// Stand-in for a device that could not be created
///
/// Every `start` fails with the original error, so only the affected modality
/// is lost and the session itself can still be built.
pub struct UnavailableDevice {
    error: DeviceError,
}

impl UnavailableDevice {
    pub fn new(error: DeviceError) -> Self {
        Self { error }
    }
}

#[async_trait::async_trait]
impl AudioBackend for UnavailableDevice {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        Err(self.error.clone())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "unavailable device"
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for UnavailableDevice {
    async fn start(
        &mut self,
        _commands: std::sync::mpsc::Receiver<PlaybackCommand>,
    ) -> Result<(), DeviceError> {
        Err(self.error.clone())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "unavailable device"
    }
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create a capture backend for `source`
    pub fn create(
        source: AudioSource,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, DeviceError> {
        match source {
            AudioSource::Microphone => {
                #[cfg(feature = "device-audio")]
                {
                    let backend = super::device::MicrophoneBackend::new(config);
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "device-audio"))]
                {
                    let _ = config;
                    Err(DeviceError::NoDevice(
                        "microphone capture requires the device-audio feature".to_string(),
                    ))
                }
            }

            AudioSource::File(path) => {
                let backend = super::file::WavFileSource::new(path, config);
                Ok(Box::new(backend))
            }
        }
    }

    /// Create a playback backend for `target`
    pub fn create_playback(
        target: PlaybackTarget,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn PlaybackBackend>, DeviceError> {
        match target {
            PlaybackTarget::Speaker => {
                #[cfg(feature = "device-audio")]
                {
                    let backend = super::device::SpeakerBackend::new(config);
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "device-audio"))]
                {
                    let _ = config;
                    Err(DeviceError::NoDevice(
                        "speaker playback requires the device-audio feature".to_string(),
                    ))
                }
            }

            PlaybackTarget::File(path) => Ok(Box::new(super::sink::WavFileSink::new(path, config))),

            PlaybackTarget::Discard => Ok(Box::new(super::sink::NullSink::new())),
        }
    }
}
