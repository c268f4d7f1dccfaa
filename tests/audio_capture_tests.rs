// Integration tests for audio capture
//
// These tests feed AudioCaptureService from generated WAV files and a fake
// microphone, and verify framing, format normalisation, stop semantics and
// exclusive device ownership.

mod common;

use agent_voice_session::audio::{CaptureState, DeviceLease, FrameAssembler};
use agent_voice_session::{
    AudioBackend, AudioBackendConfig, AudioCaptureService, AudioFile, AudioFrame,
    AudioStreamSource, DeviceError, WavFileSource,
};
use anyhow::Result;
use common::{write_wav, WAIT};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

type Collected = Arc<Mutex<Vec<AudioFrame>>>;

fn collector() -> (Collected, impl FnMut(AudioFrame) + Send + 'static) {
    let frames: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    (frames, move |frame| sink.lock().unwrap().push(frame))
}

async fn wait_for_frames(frames: &Collected, count: usize) {
    let deadline = Instant::now() + WAIT;
    while frames.lock().unwrap().len() < count {
        assert!(Instant::now() < deadline, "timed out waiting for {} frames", count);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Microphone stand-in that claims a physical device
struct FakeMicrophone {
    device: String,
    feed: Option<mpsc::Sender<AudioFrame>>,
}

impl FakeMicrophone {
    fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            feed: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FakeMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        let (tx, rx) = mpsc::channel(8);
        self.feed = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        self.feed = None;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.feed.is_some()
    }

    fn name(&self) -> &str {
        "fake microphone"
    }

    fn device_id(&self) -> Option<String> {
        Some(self.device.clone())
    }
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sample.wav");
    write_wav(&path, 16000, 1, &vec![0i16; 8000]);

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.5).abs() < 1e-9);
    assert!(audio.path.contains("sample.wav"));

    Ok(())
}

#[tokio::test]
async fn test_capture_delivers_fixed_size_frames() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("speech.wav");
    write_wav(&path, 16000, 1, &(0..4800).map(|i| i as i16).collect::<Vec<_>>());

    let config = AudioBackendConfig::default();
    let backend = WavFileSource::new(&path, config.clone()).unpaced();
    let mut capture = AudioCaptureService::new(Box::new(backend), config);
    let (frames, on_frame) = collector();

    capture.start(on_frame).await?;
    assert_eq!(capture.state(), CaptureState::Capturing);
    wait_for_frames(&frames, 3).await;
    capture.stop().await?;

    let frames = frames.lock().unwrap().clone();
    assert_eq!(frames.len(), 3, "300ms of audio should yield three 100ms frames");
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.samples.len(), 1600);
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.channels, 1);
        assert_eq!(frame.timestamp_ms, i as u64 * 100);
        assert_eq!(frame.samples[0], (i * 1600) as i16, "Frames must stay in order");
    }
    assert_eq!(capture.frames_delivered(), 3);

    Ok(())
}

#[tokio::test]
async fn test_capture_normalises_48k_stereo() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stereo.wav");
    // 0.25s of interleaved L=1000, R=3000
    let samples: Vec<i16> = (0..12000).flat_map(|_| [1000i16, 3000]).collect();
    write_wav(&path, 48000, 2, &samples);

    let config = AudioBackendConfig::default();
    let backend = WavFileSource::new(&path, config.clone()).unpaced();
    let mut capture = AudioCaptureService::new(Box::new(backend), config);
    let (frames, on_frame) = collector();

    capture.start(on_frame).await?;
    wait_for_frames(&frames, 2).await;
    capture.stop().await?;

    let frames = frames.lock().unwrap().clone();
    assert_eq!(frames.len(), 2, "The trailing 50ms stays buffered");
    assert!(frames
        .iter()
        .all(|f| f.samples.len() == 1600 && f.samples.iter().all(|&s| s == 2000)));

    Ok(())
}

#[tokio::test]
async fn test_no_frames_after_stop() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("long.wav");
    write_wav(&path, 16000, 1, &vec![7i16; 16000 * 3]);

    let config = AudioBackendConfig::default();
    let backend = WavFileSource::new(&path, config.clone());
    let mut capture = AudioCaptureService::new(Box::new(backend), config);
    let (frames, on_frame) = collector();

    capture.start(on_frame).await?;
    wait_for_frames(&frames, 1).await;
    capture.stop().await?;

    let delivered = frames.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(frames.lock().unwrap().len(), delivered, "on_frame ran after stop returned");
    assert_eq!(capture.state(), CaptureState::Stopped);

    Ok(())
}

#[tokio::test]
async fn test_device_lease_is_exclusive_and_released_on_stop() -> Result<()> {
    let config = AudioBackendConfig::default();
    let mut first = AudioCaptureService::new(Box::new(FakeMicrophone::new("input:lease-test")), config.clone());
    let mut second = AudioCaptureService::new(Box::new(FakeMicrophone::new("input:lease-test")), config);

    first.start(|_| {}).await?;
    assert!(DeviceLease::is_held("input:lease-test"));

    let err = second.start(|_| {}).await.unwrap_err();
    assert_eq!(err, DeviceError::Busy("input:lease-test".to_string()));
    assert_eq!(second.state(), CaptureState::Stopped);

    first.stop().await?;
    assert!(!DeviceLease::is_held("input:lease-test"), "Release must be synchronous");

    second.start(|_| {}).await?;
    second.stop().await?;

    Ok(())
}

#[tokio::test]
async fn test_capture_resamples_44k1() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cd.wav");
    // 2s of 44.1kHz mono
    write_wav(&path, 44100, 1, &vec![4000i16; 88200]);

    let config = AudioBackendConfig::default();
    let backend = WavFileSource::new(&path, config.clone()).unpaced();
    let mut capture = AudioCaptureService::new(Box::new(backend), config);
    let (frames, on_frame) = collector();

    capture.start(on_frame).await?;
    wait_for_frames(&frames, 19).await;
    capture.stop().await?;

    let frames = frames.lock().unwrap().clone();
    assert!((19..=20).contains(&frames.len()), "got {} frames", frames.len());
    for frame in &frames {
        assert_eq!(frame.samples.len(), 1600);
        assert_eq!(frame.sample_rate, 16000);
        assert_eq!(frame.channels, 1);
    }

    // Past the filter warm-up the level is preserved
    let settled = &frames[5].samples;
    assert!(settled.iter().all(|&s| (3800..=4200).contains(&s)));

    Ok(())
}

#[tokio::test]
async fn test_zero_target_rate_is_a_device_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("speech.wav");
    write_wav(&path, 16000, 1, &vec![0i16; 1600]);

    let config = AudioBackendConfig {
        target_sample_rate: 0,
        ..AudioBackendConfig::default()
    };

    let mut source = WavFileSource::new(&path, config.clone());
    let err = source.start().await.unwrap_err();
    assert!(matches!(err, DeviceError::Unsupported(_)));

    let mut capture =
        AudioCaptureService::new(Box::new(WavFileSource::new(&path, config.clone())), config);
    let err = capture.start(|_| {}).await.unwrap_err();
    assert!(matches!(err, DeviceError::Unsupported(_)));
    assert_eq!(capture.state(), CaptureState::Stopped);

    Ok(())
}

/// Source that delivers a fixed script of buffers and then closes
struct FiniteSource {
    device: String,
    buffers: usize,
}

#[async_trait::async_trait]
impl AudioBackend for FiniteSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        let (tx, rx) = mpsc::channel(self.buffers.max(1));
        for _ in 0..self.buffers {
            let _ = tx.try_send(AudioFrame {
                samples: vec![1; 1600],
                sample_rate: 16000,
                channels: 1,
                timestamp_ms: 0,
                source: AudioStreamSource::Microphone,
            });
        }
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "finite source"
    }

    fn device_id(&self) -> Option<String> {
        Some(self.device.clone())
    }
}

#[tokio::test]
async fn test_exhausted_source_stops_and_releases_device() -> Result<()> {
    let config = AudioBackendConfig::default();
    let backend = FiniteSource {
        device: "input:finite".to_string(),
        buffers: 2,
    };
    let mut capture = AudioCaptureService::new(Box::new(backend), config);
    let (frames, on_frame) = collector();

    capture.start(on_frame).await?;

    let deadline = Instant::now() + WAIT;
    while capture.state() == CaptureState::Capturing {
        assert!(Instant::now() < deadline, "capture never noticed the source ended");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(frames.lock().unwrap().len(), 2);
    assert!(!DeviceLease::is_held("input:finite"));

    // The service can be started again without an explicit stop
    let (again, on_frame) = collector();
    capture.start(on_frame).await?;
    wait_for_frames(&again, 2).await;
    capture.stop().await?;
    assert_eq!(capture.frames_delivered(), 4);

    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_no_device() {
    let config = AudioBackendConfig::default();
    let mut capture = AudioCaptureService::new(
        Box::new(WavFileSource::new("/nonexistent/input.wav", config.clone())),
        config,
    );

    let err = capture.start(|_| {}).await.unwrap_err();
    assert!(matches!(err, DeviceError::NoDevice(_)));
}

#[test]
fn test_frame_assembler_buffers_partial_frames() {
    let config = AudioBackendConfig {
        target_sample_rate: 16000,
        target_channels: 1,
        frame_duration_ms: 20,
    };
    let mut assembler = FrameAssembler::new(config);
    let chunk = |n: usize| AudioFrame {
        samples: vec![1; n],
        sample_rate: 16000,
        channels: 1,
        timestamp_ms: 0,
        source: AudioStreamSource::Microphone,
    };

    assert!(assembler.push(chunk(200)).is_empty());
    assert_eq!(assembler.pending_samples(), 200);

    let ready = assembler.push(chunk(500));
    assert_eq!(ready.len(), 2);
    assert!(ready.iter().all(|f| f.samples.len() == 320));
    assert_eq!(ready[1].timestamp_ms, 20);
    assert_eq!(assembler.pending_samples(), 60);
}
