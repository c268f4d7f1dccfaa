use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use super::convert::{FrameAssembler, FrameNormalizer};
use super::lease::DeviceLease;
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Stopped,
    Capturing,
}

struct Forwarder {
    stop: oneshot::Sender<()>,
    task: JoinHandle<u64>,
}

/// Turns a capture backend into a push stream of fixed-size PCM frames
///
/// The device lease belongs to the forwarding task, so a source that runs
/// dry releases its device without waiting for `stop`.
pub struct AudioCaptureService {
    backend: Box<dyn AudioBackend>,
    config: AudioBackendConfig,
    forwarder: Option<Forwarder>,
    frames_delivered: u64,
}

impl AudioCaptureService {
    pub fn new(backend: Box<dyn AudioBackend>, config: AudioBackendConfig) -> Self {
        Self {
            backend,
            config,
            forwarder: None,
            frames_delivered: 0,
        }
    }

    /// `Capturing` only while frames can still arrive
    pub fn state(&self) -> CaptureState {
        match &self.forwarder {
            Some(forwarder) if !forwarder.task.is_finished() => CaptureState::Capturing,
            _ => CaptureState::Stopped,
        }
    }

    pub fn config(&self) -> &AudioBackendConfig {
        &self.config
    }

    /// Frames handed to sinks by previous `start`/`stop` cycles
    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    /// Acquire the input device and start delivering frames to `on_frame`
    ///
    /// `on_frame` runs once per fixed-size frame, off the caller's task; it
    /// must not block. Device failures are returned as-is and never retried.
    pub async fn start<F>(&mut self, mut on_frame: F) -> Result<(), DeviceError>
    where
        F: FnMut(AudioFrame) + Send + 'static,
    {
        if self.state() == CaptureState::Capturing {
            warn!("Capture already started on {}", self.backend.name());
            return Ok(());
        }
        // A source that ran dry still has to be released
        if self.forwarder.is_some() {
            self.stop().await?;
        }

        self.config.validate()?;

        let lease = match self.backend.device_id() {
            Some(id) => Some(DeviceLease::acquire(&id)?),
            None => None,
        };

        info!(
            "Starting capture on {} ({}Hz, {} channels, {}ms frames)",
            self.backend.name(),
            self.config.target_sample_rate,
            self.config.target_channels,
            self.config.frame_duration_ms
        );

        let mut audio_rx = self.backend.start().await?;

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let config = self.config.clone();
        let backend_name = self.backend.name().to_string();

        let task = tokio::spawn(async move {
            let _lease = lease;
            let mut normalizer = FrameNormalizer::new(config.clone());
            let mut assembler = FrameAssembler::new(config);
            let mut delivered = 0u64;
            let mut warned_format = false;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    frame = audio_rx.recv() => {
                        let Some(frame) = frame else {
                            info!("Capture source {} finished", backend_name);
                            break;
                        };
                        let frame = match normalizer.normalize(frame) {
                            Ok(frame) => frame,
                            Err(e) => {
                                if !warned_format {
                                    warn!("Dropping captured audio from {}: {}", backend_name, e);
                                    warned_format = true;
                                }
                                continue;
                            }
                        };
                        for fixed in assembler.push(frame) {
                            on_frame(fixed);
                            delivered += 1;
                        }
                    }
                }
            }

            delivered
        });

        self.forwarder = Some(Forwarder { stop: stop_tx, task });

        Ok(())
    }

    /// Release the input device
    ///
    /// Once this returns, `on_frame` will not be invoked again and the device
    /// lease is released.
    pub async fn stop(&mut self) -> Result<(), DeviceError> {
        let Some(forwarder) = self.forwarder.take() else {
            return Ok(());
        };

        info!("Stopping capture on {}", self.backend.name());

        let _ = forwarder.stop.send(());
        match forwarder.task.await {
            Ok(delivered) => self.frames_delivered += delivered,
            Err(e) => error!("Capture forwarding task panicked: {}", e),
        }

        let result = self.backend.stop().await;

        if let Err(e) = &result {
            error!("Failed to stop capture backend {}: {}", self.backend.name(), e);
        }
        result
    }
}
