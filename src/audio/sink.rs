use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info};

use super::backend::{AudioBackendConfig, PlaybackBackend, PlaybackCommand};
use super::playback::RenderQueue;
use crate::error::DeviceError;

const RENDER_TICK_MS: u64 = 20;

/// Playback backend that renders agent audio into a WAV file
///
/// A writer thread drains the render queue at real-time speed, so queued
/// audio can still be flushed by a cancellation just like on a speaker. Only
/// rendered audio is written; silence between utterances is skipped.
pub struct WavFileSink {
    path: PathBuf,
    config: AudioBackendConfig,
    running: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
}

impl WavFileSink {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            running: Arc::new(AtomicBool::new(false)),
            writer: None,
        }
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for WavFileSink {
    async fn start(&mut self, commands: Receiver<PlaybackCommand>) -> Result<(), DeviceError> {
        if self.writer.is_some() {
            return Err(DeviceError::Backend("already rendering".to_string()));
        }

        let spec = hound::WavSpec {
            channels: self.config.target_channels,
            sample_rate: self.config.target_sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&self.path, spec).map_err(|e| {
            DeviceError::NoDevice(format!("cannot create {}: {}", self.path.display(), e))
        })?;

        let samples_per_tick = (self.config.target_sample_rate as u64 * RENDER_TICK_MS / 1000)
            as usize
            * self.config.target_channels.max(1) as usize;
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);
        let path = self.path.display().to_string();

        let handle = std::thread::Builder::new()
            .name("wav-playback".to_string())
            .spawn(move || {
                let mut queue = RenderQueue::new();
                let mut block = vec![0i16; samples_per_tick.max(1)];
                let mut written = 0usize;

                while running.load(Ordering::SeqCst) {
                    let connected = queue.drain(&commands);
                    let rendered = queue.render(&mut block);

                    for &sample in &block[..rendered] {
                        if let Err(e) = writer.write_sample(sample) {
                            error!("Failed to write playback sample: {}", e);
                            running.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    written += rendered;

                    if !connected && queue.is_empty() {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(RENDER_TICK_MS));
                }

                if let Err(e) = writer.finalize() {
                    error!("Failed to finalize {}: {}", path, e);
                }
                info!("Playback file {} closed ({} samples)", path, written);
            })
            .map_err(|e| DeviceError::Backend(format!("cannot spawn writer thread: {}", e)))?;

        self.writer = Some(handle);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.writer.take() {
            tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| DeviceError::Backend(e.to_string()))?
                .map_err(|_| DeviceError::Backend("playback writer thread panicked".to_string()))?;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.writer.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file sink"
    }

    fn device_id(&self) -> Option<String> {
        Some(format!("wav:{}", self.path.display()))
    }
}

/// Playback backend that accepts and discards everything
#[derive(Default)]
pub struct NullSink {
    active: bool,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for NullSink {
    async fn start(&mut self, _commands: Receiver<PlaybackCommand>) -> Result<(), DeviceError> {
        self.active = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        self.active = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn name(&self) -> &str {
        "null sink"
    }
}
