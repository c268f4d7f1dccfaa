// Integration tests for audio playback
//
// These tests drive AudioPlaybackService into WAV sinks and verify lazy device
// acquisition, FIFO rendering, cancellation and device release.

mod common;

use agent_voice_session::audio::{DeviceLease, NullSink, PlaybackState};
use agent_voice_session::{
    AudioBackendConfig, AudioFrame, AudioPlaybackService, AudioStreamSource, DeviceError,
    WavFileSink,
};
use anyhow::Result;
use std::path::Path;
use std::time::Duration;

fn output_config() -> AudioBackendConfig {
    AudioBackendConfig {
        target_sample_rate: 24000,
        ..AudioBackendConfig::default()
    }
}

fn agent_frame(value: i16, samples: usize) -> AudioFrame {
    AudioFrame {
        samples: vec![value; samples],
        sample_rate: 24000,
        channels: 1,
        timestamp_ms: 0,
        source: AudioStreamSource::Agent,
    }
}

fn read_samples(path: &Path) -> Vec<i16> {
    hound::WavReader::open(path)
        .unwrap()
        .into_samples::<i16>()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[tokio::test]
async fn test_device_is_acquired_on_first_frame_and_released_on_shutdown() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("lazy.wav");
    let sink = WavFileSink::new(&path, output_config());
    let device = format!("wav:{}", path.display());
    let mut playback = AudioPlaybackService::new(Box::new(sink), output_config());

    assert!(!playback.is_acquired());
    assert!(!DeviceLease::is_held(&device));
    assert!(!path.exists(), "Nothing is opened before audio arrives");

    playback.enqueue(agent_frame(1, 240)).await?;
    assert!(playback.is_acquired());
    assert!(DeviceLease::is_held(&device));
    assert_eq!(playback.state(), PlaybackState::Playing);

    playback.shutdown().await?;
    assert!(!playback.is_acquired());
    assert!(!DeviceLease::is_held(&device));
    assert_eq!(playback.state(), PlaybackState::Idle);

    Ok(())
}

#[tokio::test]
async fn test_frames_render_in_arrival_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("fifo.wav");
    let mut playback =
        AudioPlaybackService::new(Box::new(WavFileSink::new(&path, output_config())), output_config());

    for value in 1..=3 {
        playback.enqueue(agent_frame(value, 480)).await?;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;
    playback.shutdown().await?;

    let mut expected = vec![1i16; 480];
    expected.extend(vec![2i16; 480]);
    expected.extend(vec![3i16; 480]);
    assert_eq!(read_samples(&path), expected);

    Ok(())
}

#[tokio::test]
async fn test_cancel_discards_queued_audio() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("barge-in.wav");
    let mut playback =
        AudioPlaybackService::new(Box::new(WavFileSink::new(&path, output_config())), output_config());

    // Two seconds of agent speech, cancelled right away
    playback.enqueue(agent_frame(5, 48000)).await?;
    playback.cancel();
    assert_eq!(playback.state(), PlaybackState::Cancelled);
    assert_eq!(playback.cancellations(), 1);

    // Audio after the cancellation plays normally
    playback.enqueue(agent_frame(9, 2400)).await?;
    assert_eq!(playback.state(), PlaybackState::Playing);
    tokio::time::sleep(Duration::from_millis(400)).await;
    playback.shutdown().await?;

    let samples = read_samples(&path);
    let stale = samples.iter().filter(|&&s| s == 5).count();
    assert!(stale < 24000, "{} cancelled samples were rendered", stale);
    assert_eq!(samples.iter().filter(|&&s| s == 9).count(), 2400);
    assert!(samples.ends_with(&[9; 2400]));

    Ok(())
}

#[tokio::test]
async fn test_output_device_is_exclusive() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shared.wav");
    let mut first =
        AudioPlaybackService::new(Box::new(WavFileSink::new(&path, output_config())), output_config());
    let mut second =
        AudioPlaybackService::new(Box::new(WavFileSink::new(&path, output_config())), output_config());

    first.enqueue(agent_frame(1, 240)).await?;
    let err = second.enqueue(agent_frame(1, 240)).await.unwrap_err();
    assert!(matches!(err, DeviceError::Busy(_)));
    assert_eq!(second.state(), PlaybackState::Idle);

    first.shutdown().await?;
    second.enqueue(agent_frame(1, 240)).await?;
    second.shutdown().await?;

    Ok(())
}

#[tokio::test]
async fn test_cancel_before_any_audio_is_harmless() -> Result<()> {
    let mut playback = AudioPlaybackService::new(Box::new(NullSink::new()), output_config());

    playback.cancel();
    assert_eq!(playback.cancellations(), 0);
    assert!(!playback.is_acquired());

    playback.enqueue(agent_frame(3, 100)).await?;
    assert_eq!(playback.frames_enqueued(), 1);
    playback.shutdown().await?;

    Ok(())
}
