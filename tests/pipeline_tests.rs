//! End-to-end pipeline tests over the mock capture backend: raw samples
//! in, encoded speech-channel frames out.

use capture_edge_rs::capture::imp_mock::MockPlatform;
use capture_edge_rs::config::CaptureConfig;
use capture_edge_rs::error::CaptureError;
use capture_edge_rs::lifecycle::LifecycleController;
use capture_edge_rs::speech_channel::{decode_pcm, ChannelLabel, FrameStream, SpeechFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn mock_with_mic() -> Arc<MockPlatform> {
    Arc::new(MockPlatform::new(vec![MockPlatform::input_device(
        "USB Microphone",
    )]))
}

/// VAD off so every chunk flows; AEC stays enabled to exercise the
/// pass-through fallback when no native filter is linked.
fn ungated_config() -> CaptureConfig {
    CaptureConfig {
        vad_enabled: false,
        ..Default::default()
    }
}

async fn next_frame(frames: &mut FrameStream) -> SpeechFrame {
    timeout(Duration::from_secs(1), frames.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("frame stream closed")
}

async fn expect_no_frame(frames: &mut FrameStream) {
    assert!(
        timeout(Duration::from_millis(100), frames.recv())
            .await
            .is_err(),
        "unexpected frame emitted"
    );
}

#[test_log::test(tokio::test)]
async fn test_microphone_samples_become_local_frames() {
    let platform = mock_with_mic();
    let (controller, mut frames) = LifecycleController::with_channel(platform.clone(), 32);

    controller.start_capture(ungated_config()).await.unwrap();
    platform.push_mic(&vec![0.25f32; 600]);

    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.channel, ChannelLabel::Local);
    assert_eq!(frame.sample_rate, 24_000);
    assert_eq!(decode_pcm(&frame.data).unwrap().len(), 600);

    controller.stop_capture().await;
}

#[test_log::test(tokio::test)]
async fn test_chunks_assemble_across_callbacks() {
    let platform = mock_with_mic();
    let (controller, mut frames) = LifecycleController::with_channel(platform.clone(), 32);

    controller.start_capture(ungated_config()).await.unwrap();

    // 400 samples is less than a chunk; nothing may be emitted yet.
    platform.push_mic(&vec![0.1f32; 400]);
    expect_no_frame(&mut frames).await;

    // 200 more completes exactly one 600-sample chunk.
    platform.push_mic(&vec![0.1f32; 200]);
    let frame = next_frame(&mut frames).await;
    assert_eq!(decode_pcm(&frame.data).unwrap().len(), 600);
    expect_no_frame(&mut frames).await;

    controller.stop_capture().await;
}

#[test_log::test(tokio::test)]
async fn test_large_callback_emits_every_full_chunk() {
    let platform = mock_with_mic();
    let (controller, mut frames) = LifecycleController::with_channel(platform.clone(), 32);

    controller.start_capture(ungated_config()).await.unwrap();
    platform.push_mic(&vec![0.1f32; 4096]);

    for _ in 0..6 {
        next_frame(&mut frames).await;
    }
    // 496-sample remainder stays buffered.
    expect_no_frame(&mut frames).await;

    controller.stop_capture().await;
}

#[test_log::test(tokio::test)]
async fn test_system_audio_becomes_remote_frames() {
    let platform = mock_with_mic();
    let (controller, mut frames) = LifecycleController::with_channel(platform.clone(), 32);

    controller.start_capture(ungated_config()).await.unwrap();
    platform.push_loopback(&vec![0.5f32; 600]);

    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.channel, ChannelLabel::Remote);
    assert_eq!(decode_pcm(&frame.data).unwrap().len(), 600);

    controller.stop_capture().await;
}

#[test_log::test(tokio::test)]
async fn test_vad_gates_silence_and_passes_voice() {
    let platform = mock_with_mic();
    let (controller, mut frames) = LifecycleController::with_channel(platform.clone(), 32);

    let config = CaptureConfig {
        vad_enabled: true,
        // Activate on the first voiced chunk so the test is not timing
        // sensitive.
        voice_threshold_ms: 0,
        silence_threshold_ms: 10_000,
        ..Default::default()
    };
    controller.start_capture(config).await.unwrap();

    platform.push_mic(&vec![0.0f32; 600]);
    expect_no_frame(&mut frames).await;

    let voiced: Vec<f32> = (0..600)
        .map(|n| 0.5 * (2.0 * std::f32::consts::PI * 1_500.0 * n as f32 / 24_000.0).sin())
        .collect();
    platform.push_mic(&voiced);
    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.channel, ChannelLabel::Local);

    let stats = controller.get_performance_stats().await;
    assert_eq!(stats.total_chunks, 2);
    assert_eq!(stats.voice_chunks, 1);
    assert!((stats.traffic_reduction_percent - 50.0).abs() < 0.01);

    controller.stop_capture().await;
}

#[test_log::test(tokio::test)]
async fn test_stats_with_gating_disabled() {
    let platform = mock_with_mic();
    let (controller, _frames) = LifecycleController::with_channel(platform.clone(), 32);

    controller.start_capture(ungated_config()).await.unwrap();
    platform.push_mic(&vec![0.0f32; 1200]);

    let stats = controller.get_performance_stats().await;
    assert_eq!(stats.total_chunks, 2);
    assert_eq!(stats.voice_chunks, 2);
    assert_eq!(stats.traffic_reduction_percent, 0.0);

    controller.stop_capture().await;
}

#[test_log::test(tokio::test)]
async fn test_throttle_hint_tracks_transmitted_chunks() {
    let platform = mock_with_mic();
    let (controller, _frames) = LifecycleController::with_channel(platform.clone(), 32);

    // 25 tokens per 25 ms chunk; 75% of 100 tokens = 3 chunks.
    let config = CaptureConfig {
        vad_enabled: false,
        max_tokens_per_minute: 100,
        throttle_at_percent: 75,
        ..Default::default()
    };
    controller.start_capture(config).await.unwrap();

    platform.push_mic(&vec![0.1f32; 1200]);
    assert!(!controller.should_throttle().await);

    platform.push_mic(&vec![0.1f32; 600]);
    assert!(controller.should_throttle().await);

    controller.stop_capture().await;
}

#[test_log::test(tokio::test)]
async fn test_system_audio_capture_requires_a_session() {
    let platform = mock_with_mic();
    let (controller, _frames) = LifecycleController::with_channel(platform.clone(), 32);

    match controller.start_system_audio_capture().await {
        Err(CaptureError::NoSession) => {}
        other => panic!("expected NoSession, got {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn test_stopping_system_audio_leaves_microphone_running() {
    let platform = mock_with_mic();
    let (controller, mut frames) = LifecycleController::with_channel(platform.clone(), 32);

    controller.start_capture(ungated_config()).await.unwrap();
    assert_eq!(platform.open_stream_count(), 2);

    controller.stop_system_audio_capture().await;
    assert_eq!(platform.open_stream_count(), 1);

    platform.push_loopback(&vec![0.5f32; 600]);
    expect_no_frame(&mut frames).await;

    platform.push_mic(&vec![0.25f32; 600]);
    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.channel, ChannelLabel::Local);

    // And it can come back independently.
    controller.start_system_audio_capture().await.unwrap();
    assert_eq!(platform.open_stream_count(), 2);

    controller.stop_capture().await;
}

#[test_log::test(tokio::test)]
async fn test_debug_wav_records_cleaned_microphone_audio() {
    let platform = mock_with_mic();
    let (controller, _frames) = LifecycleController::with_channel(platform.clone(), 32);

    let dir = tempfile::tempdir().unwrap();
    let wav_path = dir.path().join("cleaned.wav");
    let config = CaptureConfig {
        vad_enabled: false,
        debug_wav_path: Some(wav_path.clone()),
        ..Default::default()
    };
    controller.start_capture(config).await.unwrap();

    platform.push_mic(&vec![0.25f32; 1200]);
    controller.stop_capture().await;

    let reader = hound::WavReader::open(&wav_path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 24_000);
    assert_eq!(reader.len(), 1200);
}
