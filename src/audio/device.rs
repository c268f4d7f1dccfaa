// Hardware audio backends built on cpal
//
// cpal streams are not `Send`, so each stream lives on its own thread for its
// whole life. The thread reports whether the device opened, then parks until
// asked to stop; dropping the stream there releases the device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc::{Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{
    AudioBackend, AudioBackendConfig, AudioFrame, AudioStreamSource, PlaybackBackend,
    PlaybackCommand,
};
use super::convert::PlaybackConverter;
use super::playback::RenderQueue;
use crate::error::DeviceError;

struct StreamThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl StreamThread {
    async fn shutdown(self) -> Result<(), DeviceError> {
        let _ = self.stop.send(());
        tokio::task::spawn_blocking(move || self.handle.join())
            .await
            .map_err(|e| DeviceError::Backend(e.to_string()))?
            .map_err(|_| DeviceError::Backend("audio stream thread panicked".to_string()))
    }
}

fn build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DeviceError::NoDevice("device disconnected".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            DeviceError::Unsupported("stream configuration rejected by device".to_string())
        }
        other => backend_error(other.to_string()),
    }
}

fn backend_error(message: String) -> DeviceError {
    if message.to_ascii_lowercase().contains("permission") {
        DeviceError::PermissionDenied(message)
    } else {
        DeviceError::Backend(message)
    }
}

/// Pick a device configuration at the session rate if the device offers one
///
/// Otherwise the device default is used and captured audio is converted.
fn input_config(
    device: &cpal::Device,
    config: &AudioBackendConfig,
) -> Result<cpal::SupportedStreamConfig, DeviceError> {
    let rate = cpal::SampleRate(config.target_sample_rate);
    let exact = device
        .supported_input_configs()
        .map_err(|e| backend_error(e.to_string()))?
        .find(|c| {
            c.channels() == config.target_channels
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .map(|c| c.with_sample_rate(rate));

    match exact {
        Some(found) => Ok(found),
        None => device
            .default_input_config()
            .map_err(|e| backend_error(e.to_string())),
    }
}

/// Default microphone via cpal
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stream: Option<StreamThread>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        if self.stream.is_some() {
            return Err(DeviceError::Backend("already capturing".to_string()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let config = self.config.clone();

        let handle = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let opened = open_input(&config, frame_tx);
                match opened {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        let _ = stop_rx.recv();
                        drop(stream);
                        info!("Microphone released");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| DeviceError::Backend(format!("cannot spawn capture thread: {}", e)))?;

        let thread = StreamThread {
            stop: stop_tx,
            handle,
        };

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stream = Some(thread);
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                thread.shutdown().await?;
                Err(e)
            }
            Err(_) => {
                thread.shutdown().await?;
                Err(DeviceError::Backend("capture thread exited during setup".to_string()))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        match self.stream.take() {
            Some(thread) => thread.shutdown().await,
            None => Ok(()),
        }
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }

    fn device_id(&self) -> Option<String> {
        Some("input:default".to_string())
    }
}

fn open_input(
    config: &AudioBackendConfig,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| DeviceError::NoDevice("no default input device".to_string()))?;

    let supported = input_config(&device, config)?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();
    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels;

    info!(
        "Microphone config - Sample rate: {}, Channels: {}, Format: {:?}",
        sample_rate, channels, sample_format
    );

    let started = Instant::now();
    let emit = move |samples: Vec<i16>| {
        let frame = AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: started.elapsed().as_millis() as u64,
            source: AudioStreamSource::Microphone,
        };
        // Never block the audio thread; a full channel drops the buffer
        let _ = frames.try_send(frame);
    };
    let on_error = |err: cpal::StreamError| error!("Microphone stream error: {}", err);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                emit(
                    data.iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                        .collect(),
                )
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| emit(data.to_vec()),
            on_error,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                emit(data.iter().map(|&s| (s as i32 - 32768) as i16).collect())
            },
            on_error,
            None,
        ),
        other => {
            return Err(DeviceError::Unsupported(format!(
                "sample format {:?}",
                other
            )))
        }
    }
    .map_err(build_error)?;

    stream.play().map_err(|e| backend_error(e.to_string()))?;
    Ok(stream)
}

/// Default speaker via cpal
pub struct SpeakerBackend {
    config: AudioBackendConfig,
    stream: Option<StreamThread>,
}

impl SpeakerBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for SpeakerBackend {
    async fn start(&mut self, commands: Receiver<PlaybackCommand>) -> Result<(), DeviceError> {
        if self.stream.is_some() {
            return Err(DeviceError::Backend("already rendering".to_string()));
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let config = self.config.clone();

        let handle = std::thread::Builder::new()
            .name("speaker-playback".to_string())
            .spawn(move || match open_output(&config, commands) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    let _ = stop_rx.recv();
                    drop(stream);
                    info!("Speaker released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| DeviceError::Backend(format!("cannot spawn playback thread: {}", e)))?;

        let thread = StreamThread {
            stop: stop_tx,
            handle,
        };

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stream = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                thread.shutdown().await?;
                Err(e)
            }
            Err(_) => {
                thread.shutdown().await?;
                Err(DeviceError::Backend("playback thread exited during setup".to_string()))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        match self.stream.take() {
            Some(thread) => thread.shutdown().await,
            None => Ok(()),
        }
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "cpal speaker"
    }

    fn device_id(&self) -> Option<String> {
        Some("output:default".to_string())
    }
}

fn open_output(
    config: &AudioBackendConfig,
    commands: Receiver<PlaybackCommand>,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| DeviceError::NoDevice("no default output device".to_string()))?;

    let rate = cpal::SampleRate(config.target_sample_rate);
    let exact = device
        .supported_output_configs()
        .map_err(|e| backend_error(e.to_string()))?
        .find(|c| {
            c.channels() == config.target_channels
                && c.min_sample_rate() <= rate
                && c.max_sample_rate() >= rate
        })
        .map(|c| c.with_sample_rate(rate));
    let supported = match exact {
        Some(found) => found,
        None => device
            .default_output_config()
            .map_err(|e| backend_error(e.to_string()))?,
    };

    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();
    let mut converter = PlaybackConverter::new(
        config,
        stream_config.sample_rate.0,
        stream_config.channels,
    )?;

    info!(
        "Speaker config - Sample rate: {}, Channels: {}, Format: {:?}, converting: {}",
        stream_config.sample_rate.0,
        stream_config.channels,
        sample_format,
        !converter.is_passthrough()
    );

    let on_error = |err: cpal::StreamError| error!("Speaker stream error: {}", err);
    let mut queue = RenderQueue::new();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                drain_converted(&mut queue, &commands, &mut converter);
                queue.render_f32(data);
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                drain_converted(&mut queue, &commands, &mut converter);
                queue.render(data);
            },
            on_error,
            None,
        ),
        other => {
            warn!("Speaker prefers unsupported sample format {:?}", other);
            return Err(DeviceError::Unsupported(format!(
                "sample format {:?}",
                other
            )));
        }
    }
    .map_err(build_error)?;

    stream.play().map_err(|e| backend_error(e.to_string()))?;
    Ok(stream)
}

fn drain_converted(
    queue: &mut RenderQueue,
    commands: &Receiver<PlaybackCommand>,
    converter: &mut PlaybackConverter,
) {
    if converter.is_passthrough() {
        queue.drain(commands);
        return;
    }
    while let Ok(command) = commands.try_recv() {
        queue.apply(converter.convert(command));
    }
}
