// Format normalisation and fixed-size framing for captured audio
//
// Capture backends deliver whatever the hardware hands them: any buffer size,
// often 48kHz stereo. The session needs constant-size mono frames at the rate
// agreed at session start, so every captured buffer passes through a
// `FrameNormalizer` and a `FrameAssembler`.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::{debug, warn};

use super::backend::{AudioBackendConfig, AudioFrame, PlaybackCommand};
use crate::error::DeviceError;

/// Brings captured buffers to the session rate and channel count
///
/// Integer ratios are decimated; any other ratio goes through a sinc
/// resampler that keeps its filter state across buffers.
pub struct FrameNormalizer {
    config: AudioBackendConfig,
    resampler: Option<StreamResampler>,
}

impl FrameNormalizer {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            resampler: None,
        }
    }

    pub fn normalize(&mut self, frame: AudioFrame) -> Result<AudioFrame, DeviceError> {
        let target_channels = self.config.target_channels;
        let target_rate = self.config.target_sample_rate;

        let mut processed = if frame.channels == target_channels {
            frame
        } else {
            let samples =
                remap_channels(&frame.samples, frame.channels, target_channels).ok_or_else(|| {
                    DeviceError::Unsupported(format!(
                        "cannot map {} channels to {}",
                        frame.channels, target_channels
                    ))
                })?;
            AudioFrame {
                samples,
                channels: target_channels,
                ..frame
            }
        };

        if processed.sample_rate == target_rate {
            return Ok(processed);
        }
        if processed.sample_rate == 0 || target_rate == 0 {
            return Err(DeviceError::Unsupported(format!(
                "cannot convert {}Hz audio to {}Hz",
                processed.sample_rate, target_rate
            )));
        }

        if processed.sample_rate % target_rate == 0 {
            let ratio = (processed.sample_rate / target_rate) as usize;
            processed.samples = decimate(&processed.samples, ratio, target_channels);
            processed.sample_rate = target_rate;
            return Ok(processed);
        }

        if self.resampler.as_ref().map(StreamResampler::from_rate) != Some(processed.sample_rate) {
            debug!(
                "Resampling captured audio from {}Hz to {}Hz",
                processed.sample_rate, target_rate
            );
            self.resampler = Some(StreamResampler::new(
                processed.sample_rate,
                target_rate,
                target_channels,
            )?);
        }

        let samples = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&processed.samples)?,
            None => Vec::new(),
        };

        Ok(AudioFrame {
            samples,
            sample_rate: target_rate,
            ..processed
        })
    }
}

/// Adapts session-format playback commands to the format an output device runs at
pub struct PlaybackConverter {
    from_channels: u16,
    to_channels: u16,
    resampler: Option<StreamResampler>,
}

impl PlaybackConverter {
    pub fn new(
        config: &AudioBackendConfig,
        device_rate: u32,
        device_channels: u16,
    ) -> Result<Self, DeviceError> {
        config.validate()?;
        if remap_channels(&[], config.target_channels, device_channels).is_none() {
            return Err(DeviceError::Unsupported(format!(
                "cannot play {} channels on a {} channel device",
                config.target_channels, device_channels
            )));
        }

        let resampler = if config.target_sample_rate == device_rate {
            None
        } else {
            Some(StreamResampler::new(
                config.target_sample_rate,
                device_rate,
                config.target_channels,
            )?)
        };

        Ok(Self {
            from_channels: config.target_channels,
            to_channels: device_channels,
            resampler,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none() && self.from_channels == self.to_channels
    }

    pub fn convert(&mut self, command: PlaybackCommand) -> PlaybackCommand {
        match command {
            PlaybackCommand::Frame(samples) => {
                let resampled = match self.resampler.as_mut() {
                    Some(resampler) => resampler.process(&samples).unwrap_or_else(|e| {
                        warn!("Dropping agent audio: {}", e);
                        Vec::new()
                    }),
                    None => samples,
                };
                let remapped = remap_channels(&resampled, self.from_channels, self.to_channels)
                    .unwrap_or_default();
                PlaybackCommand::Frame(remapped)
            }
            PlaybackCommand::Flush => {
                if let Some(resampler) = self.resampler.as_mut() {
                    resampler.reset();
                }
                PlaybackCommand::Flush
            }
        }
    }
}

/// Sample-rate converter for a continuous interleaved i16 stream
///
/// Input that does not fill a whole resampler chunk is held back until the
/// next call.
pub struct StreamResampler {
    inner: SincFixedIn<f32>,
    from_rate: u32,
    channels: usize,
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Result<Self, DeviceError> {
        if from_rate == 0 || to_rate == 0 || channels == 0 {
            return Err(DeviceError::Unsupported(format!(
                "cannot resample {}Hz/{}ch audio to {}Hz",
                from_rate, channels, to_rate
            )));
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        // 10ms of input per chunk
        let chunk_size = (from_rate as usize / 100).max(1);
        let inner = SincFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            2.0,
            params,
            chunk_size,
            channels as usize,
        )
        .map_err(|e| DeviceError::Unsupported(format!("resampler setup failed: {}", e)))?;

        Ok(Self {
            inner,
            from_rate,
            channels: channels as usize,
            pending: vec![Vec::with_capacity(chunk_size * 2); channels as usize],
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Feed interleaved samples and collect whatever output is ready
    pub fn process(&mut self, samples: &[i16]) -> Result<Vec<i16>, DeviceError> {
        for frame in samples.chunks_exact(self.channels) {
            for (channel, &sample) in self.pending.iter_mut().zip(frame) {
                channel.push(sample as f32 / 32768.0);
            }
        }

        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }

            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..needed).collect())
                .collect();
            let waves = self
                .inner
                .process(&chunk, None)
                .map_err(|e| DeviceError::Backend(format!("resampling failed: {}", e)))?;

            let frames = waves.first().map_or(0, Vec::len);
            out.reserve(frames * self.channels);
            for index in 0..frames {
                for channel in &waves {
                    out.push((channel[index].clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                }
            }
        }

        Ok(out)
    }

    /// Forget buffered input and filter history
    pub fn reset(&mut self) {
        self.inner.reset();
        for channel in &mut self.pending {
            channel.clear();
        }
    }
}

/// Keep every `ratio`-th interleaved sample frame
pub fn decimate(samples: &[i16], ratio: usize, channels: u16) -> Vec<i16> {
    samples
        .chunks_exact(channels.max(1) as usize)
        .step_by(ratio.max(1))
        .flatten()
        .copied()
        .collect()
}

/// Convert interleaved audio between channel layouts
///
/// Any layout folds down to mono by averaging; mono fans out to any layout.
/// Other conversions are not supported.
pub fn remap_channels(samples: &[i16], from: u16, to: u16) -> Option<Vec<i16>> {
    match (from, to) {
        (0, _) | (_, 0) => None,
        (from, to) if from == to => Some(samples.to_vec()),
        (from, 1) => Some(
            samples
                .chunks_exact(from as usize)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / from as i32) as i16
                })
                .collect(),
        ),
        (1, to) => Some(
            samples
                .iter()
                .flat_map(|&s| std::iter::repeat(s).take(to as usize))
                .collect(),
        ),
        _ => None,
    }
}

/// Re-chunks normalised audio into frames of exactly `samples_per_frame`
///
/// A trailing partial frame stays buffered until more audio arrives and is
/// discarded with the assembler.
pub struct FrameAssembler {
    config: AudioBackendConfig,
    samples_per_frame: usize,
    pending: Vec<i16>,
    start_ms: Option<u64>,
    emitted: u64,
}

impl FrameAssembler {
    pub fn new(config: AudioBackendConfig) -> Self {
        let samples_per_frame = config.samples_per_frame();
        Self {
            config,
            samples_per_frame,
            pending: Vec::with_capacity(samples_per_frame * 2),
            start_ms: None,
            emitted: 0,
        }
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, frame: AudioFrame) -> Vec<AudioFrame> {
        let start_ms = *self.start_ms.get_or_insert(frame.timestamp_ms);
        let source = frame.source;
        self.pending.extend_from_slice(&frame.samples);

        let mut ready = Vec::new();
        while self.pending.len() >= self.samples_per_frame {
            let rest = self.pending.split_off(self.samples_per_frame);
            let samples = std::mem::replace(&mut self.pending, rest);
            ready.push(AudioFrame {
                samples,
                sample_rate: self.config.target_sample_rate,
                channels: self.config.target_channels,
                timestamp_ms: start_ms + self.emitted * self.config.frame_duration_ms,
                source,
            });
            self.emitted += 1;
        }
        ready
    }
}
