use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackendConfig, AudioFrame, PlaybackBackend, PlaybackCommand};
use super::lease::DeviceLease;
use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    /// Pending audio was flushed; the next enqueue resumes playing
    Cancelled,
}

/// Render-side FIFO owned by a playback backend's render loop
///
/// Commands are applied strictly in arrival order, so a `Flush` discards
/// every frame sent before it and nothing sent after it.
#[derive(Debug, Default)]
pub struct RenderQueue {
    pending: VecDeque<i16>,
    flushes: u64,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn apply(&mut self, command: PlaybackCommand) {
        match command {
            PlaybackCommand::Frame(samples) => self.pending.extend(samples),
            PlaybackCommand::Flush => {
                self.pending.clear();
                self.flushes += 1;
            }
        }
    }

    /// Apply every command currently waiting on `commands`
    ///
    /// Returns `false` once the sending side is gone.
    pub fn drain(&mut self, commands: &Receiver<PlaybackCommand>) -> bool {
        loop {
            match commands.try_recv() {
                Ok(command) => self.apply(command),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Fill `out` from the head of the queue, padding with silence
    ///
    /// Returns how many queued samples were rendered.
    pub fn render(&mut self, out: &mut [i16]) -> usize {
        let take = out.len().min(self.pending.len());
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..take)) {
            *slot = sample;
        }
        out[take..].fill(0);
        take
    }

    pub fn render_f32(&mut self, out: &mut [f32]) -> usize {
        let take = out.len().min(self.pending.len());
        for (slot, sample) in out.iter_mut().zip(self.pending.drain(..take)) {
            *slot = sample as f32 / i16::MAX as f32;
        }
        out[take..].fill(0.0);
        take
    }
}

/// Queues agent audio for playback and cancels it on barge-in
///
/// The output device is acquired on the first enqueued frame and released on
/// `shutdown`.
pub struct AudioPlaybackService {
    backend: Box<dyn PlaybackBackend>,
    config: AudioBackendConfig,
    commands: Option<Sender<PlaybackCommand>>,
    lease: Option<DeviceLease>,
    state: PlaybackState,
    frames_enqueued: u64,
    cancellations: u64,
}

impl AudioPlaybackService {
    pub fn new(backend: Box<dyn PlaybackBackend>, config: AudioBackendConfig) -> Self {
        Self {
            backend,
            config,
            commands: None,
            lease: None,
            state: PlaybackState::Idle,
            frames_enqueued: 0,
            cancellations: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn config(&self) -> &AudioBackendConfig {
        &self.config
    }

    pub fn is_acquired(&self) -> bool {
        self.commands.is_some()
    }

    pub fn frames_enqueued(&self) -> u64 {
        self.frames_enqueued
    }

    pub fn cancellations(&self) -> u64 {
        self.cancellations
    }

    async fn acquire(&mut self) -> Result<(), DeviceError> {
        self.config.validate()?;
        let lease = match self.backend.device_id() {
            Some(id) => Some(DeviceLease::acquire(&id)?),
            None => None,
        };

        info!(
            "Opening playback on {} ({}Hz, {} channels)",
            self.backend.name(),
            self.config.target_sample_rate,
            self.config.target_channels
        );

        let (tx, rx) = std::sync::mpsc::channel();
        self.backend.start(rx).await?;

        self.lease = lease;
        self.commands = Some(tx);
        Ok(())
    }

    /// Append a frame to the render queue (FIFO)
    pub async fn enqueue(&mut self, frame: AudioFrame) -> Result<(), DeviceError> {
        if self.commands.is_none() {
            self.acquire().await?;
        }

        if frame.sample_rate != self.config.target_sample_rate
            || frame.channels != self.config.target_channels
        {
            warn!(
                "Playing {}Hz/{}ch frame on a {}Hz/{}ch output",
                frame.sample_rate,
                frame.channels,
                self.config.target_sample_rate,
                self.config.target_channels
            );
        }

        if let Some(commands) = &self.commands {
            if commands.send(PlaybackCommand::Frame(frame.samples)).is_err() {
                debug!("Render path of {} is gone; frame discarded", self.backend.name());
            }
        }

        self.frames_enqueued += 1;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Discard all queued, not yet rendered audio immediately
    pub fn cancel(&mut self) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(PlaybackCommand::Flush);
        }
        if self.state == PlaybackState::Playing {
            info!("Playback cancelled");
            self.cancellations += 1;
        }
        self.state = PlaybackState::Cancelled;
    }

    /// Stop rendering and release the output device
    pub async fn shutdown(&mut self) -> Result<(), DeviceError> {
        let Some(commands) = self.commands.take() else {
            self.state = PlaybackState::Idle;
            return Ok(());
        };

        let _ = commands.send(PlaybackCommand::Flush);
        drop(commands);

        info!("Closing playback on {}", self.backend.name());
        let result = self.backend.stop().await;
        self.lease = None;
        self.state = PlaybackState::Idle;

        if let Err(e) = &result {
            error!("Failed to stop playback backend {}: {}", self.backend.name(), e);
        }
        result
    }
}
