use anyhow::{Context, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, AudioStreamSource};
use crate::error::DeviceError;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            anyhow::bail!(
                "Expected 16-bit integer PCM, got {}-bit {:?}",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Capture backend that replays a WAV file as if it were a microphone
///
/// Audio is delivered in 20ms buffers, paced in real time unless pacing is
/// turned off.
pub struct WavFileSource {
    path: PathBuf,
    config: AudioBackendConfig,
    paced: bool,
    task: Option<JoinHandle<()>>,
}

const SOURCE_BUFFER_MS: u64 = 20;

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            paced: true,
            task: None,
        }
    }

    /// Deliver the whole file as fast as the consumer accepts it
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for WavFileSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        if self.task.is_some() {
            return Err(DeviceError::Backend("already capturing".to_string()));
        }

        let audio = AudioFile::open(&self.path)
            .map_err(|e| DeviceError::NoDevice(format!("{}: {:#}", self.path.display(), e)))?;

        self.config.validate()?;
        if audio.sample_rate == 0 || audio.channels == 0 || audio.channels > 2 {
            return Err(DeviceError::Unsupported(format!(
                "{}Hz/{}ch file cannot feed a {}Hz/{}ch session",
                audio.sample_rate,
                audio.channels,
                self.config.target_sample_rate,
                self.config.target_channels
            )));
        }

        let (tx, rx) = mpsc::channel(100);
        let paced = self.paced;
        let sample_rate = audio.sample_rate;
        let channels = audio.channels;
        let chunk = (sample_rate as u64 * SOURCE_BUFFER_MS / 1000) as usize * channels as usize;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(SOURCE_BUFFER_MS));

            for (index, samples) in audio.samples.chunks(chunk.max(1)).enumerate() {
                if paced {
                    ticker.tick().await;
                }

                let frame = AudioFrame {
                    samples: samples.to_vec(),
                    sample_rate,
                    channels,
                    timestamp_ms: index as u64 * SOURCE_BUFFER_MS,
                    source: AudioStreamSource::File,
                };

                if tx.send(frame).await.is_err() {
                    warn!("Capture consumer went away; stopping file playback");
                    return;
                }
            }

            info!("Finished streaming {}", audio.path);
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
