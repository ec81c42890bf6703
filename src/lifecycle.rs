//! Stream lifecycle controller.
//!
//! Owns the capture session and is the single authority allowed to open
//! or close native audio resources. Control calls are serialized by one
//! async mutex; `stop_capture` preempts an in-flight resume through a
//! cancellation token checked between resume sub-steps.

use crate::aec::{AecEngine, AecParams};
use crate::capture::{CapturePlatform, CaptureStream, DeviceInfo, SampleSink};
use crate::chunker::FrameChunker;
use crate::config::CaptureConfig;
use crate::echo_ref::SharedEchoRef;
use crate::error::{CaptureError, Result};
use crate::frame::{pcm_f32_to_i16, AudioFrame, AudioSource};
use crate::speech_channel::{encode_frame, ChannelSink, FrameStream, SpeechSink};
use crate::tokens::{TokenKind, TokenRateTracker};
use crate::vad::{VadConfig, VadCounters, VoiceGate};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

type SharedRecorder = Arc<StdMutex<Option<hound::WavWriter<BufWriter<File>>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Paused,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "idle"),
            CaptureState::Capturing => write!(f, "capturing"),
            CaptureState::Paused => write!(f, "paused"),
        }
    }
}

/// Overall pipeline health, exposed through state rather than errors.
#[derive(Debug, Clone)]
pub struct CaptureHealth {
    pub state: CaptureState,
    pub mic_active: bool,
    pub system_audio_active: bool,
    pub aec_active: bool,
    /// Why the microphone is missing, when it is.
    pub mic_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceStats {
    pub total_chunks: u64,
    pub voice_chunks: u64,
    pub traffic_reduction_percent: f32,
}

/// Everything owned by one capture run. Never aliased outside the
/// controller; the Arcs inside are shared only with the audio callbacks.
struct Session {
    config: CaptureConfig,
    mic_device: Option<DeviceInfo>,
    mic_stream: Option<Box<dyn CaptureStream>>,
    loopback_stream: Option<Box<dyn CaptureStream>>,
    echo_ref: SharedEchoRef,
    aec: Arc<StdMutex<AecEngine>>,
    gate: Arc<StdMutex<VoiceGate>>,
    counters: Arc<VadCounters>,
    recorder: SharedRecorder,
    paused_at: Option<Instant>,
    mic_error: Option<String>,
}

struct Inner {
    state: CaptureState,
    session: Option<Session>,
}

pub struct LifecycleController {
    platform: Arc<dyn CapturePlatform>,
    sink: Arc<dyn SpeechSink>,
    tokens: Arc<StdMutex<TokenRateTracker>>,
    inner: Mutex<Inner>,
    ops_cancel: StdMutex<CancellationToken>,
}

impl LifecycleController {
    pub fn new(platform: Arc<dyn CapturePlatform>, sink: Arc<dyn SpeechSink>) -> Self {
        Self {
            platform,
            sink,
            tokens: Arc::new(StdMutex::new(TokenRateTracker::new())),
            inner: Mutex::new(Inner {
                state: CaptureState::Idle,
                session: None,
            }),
            ops_cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    /// Controller wired to a bounded frame queue; the returned stream is
    /// the speech channel's subscription.
    pub fn with_channel(
        platform: Arc<dyn CapturePlatform>,
        queue_capacity: usize,
    ) -> (Self, FrameStream) {
        let (sink, stream) = ChannelSink::new(queue_capacity);
        (Self::new(platform, Arc::new(sink)), stream)
    }

    /// Start a capture session. Source acquisition failures degrade the
    /// session instead of failing it: the session reaches `Capturing`
    /// even with no active sources, and health reports what is missing.
    pub async fn start_capture(&self, config: CaptureConfig) -> Result<()> {
        config.validate()?;
        let mut inner = self.inner.lock().await;
        if inner.state != CaptureState::Idle {
            return Err(CaptureError::SessionActive);
        }

        // The token window is process-wide but a new session starts a
        // fresh accounting period.
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.reset();
        }

        let counters = Arc::new(VadCounters::default());
        let gate = VoiceGate::with_counters(VadConfig::from_capture(&config), Arc::clone(&counters));
        let aec = if config.aec_enabled {
            let engine = AecEngine::new(&AecParams::from_capture(&config));
            if !engine.is_active() {
                log::warn!("echo cancellation unavailable, capturing without AEC");
            }
            engine
        } else {
            AecEngine::passthrough(config.aec_subframe_len)
        };

        let mut session = Session {
            echo_ref: SharedEchoRef::new(config.echo_ref_capacity),
            aec: Arc::new(StdMutex::new(aec)),
            gate: Arc::new(StdMutex::new(gate)),
            counters,
            recorder: open_recorder(&config),
            config,
            mic_device: None,
            mic_stream: None,
            loopback_stream: None,
            paused_at: None,
            mic_error: None,
        };

        match self.platform.select_microphone_device() {
            Ok(device) => {
                let sink = self.mic_sample_sink(&session);
                match self
                    .platform
                    .open_microphone(&device, session.config.sample_rate, sink)
                {
                    Ok(stream) => {
                        log::info!("microphone capture started on '{}'", stream.device_label());
                        session.mic_device = Some(device);
                        session.mic_stream = Some(stream);
                    }
                    Err(e) => {
                        log::warn!("microphone unavailable ({e}), continuing without microphone");
                        session.mic_error = Some(e.to_string());
                    }
                }
            }
            Err(e) => {
                log::warn!("no usable microphone ({e}), continuing without microphone");
                session.mic_error = Some(e.to_string());
            }
        }

        match self.open_loopback(&session) {
            Ok(stream) => {
                log::info!(
                    "system audio capture started on '{}'",
                    stream.device_label()
                );
                session.loopback_stream = Some(stream);
            }
            Err(CaptureError::LoopbackUnsupported) => {
                log::info!("system loopback not supported on this platform");
            }
            Err(e) => {
                log::warn!("system audio unavailable ({e}), continuing mic-only");
            }
        }

        log::info!(
            "capture session started: {} Hz, {} ms chunks, aec={}, vad={}",
            session.config.sample_rate,
            session.config.chunk_duration_ms,
            session.config.aec_enabled,
            session.config.vad_enabled
        );
        inner.session = Some(session);
        inner.state = CaptureState::Capturing;
        Ok(())
    }

    /// Tear the session down. Idempotent and infallible: safe from any
    /// state, including after partial failures.
    pub async fn stop_capture(&self) {
        // Preempt an in-flight resume before queueing on the state lock.
        let token = self.current_token();
        token.cancel();

        let mut inner = self.inner.lock().await;
        if let Some(mut session) = inner.session.take() {
            if let Some(stream) = session.mic_stream.take() {
                log::info!("closing microphone stream ('{}')", stream.device_label());
                stream.close();
            } else {
                log::debug!("microphone stream already released");
            }
            if let Some(stream) = session.loopback_stream.take() {
                log::info!("closing system audio stream ('{}')", stream.device_label());
                stream.close();
            }
            if let Ok(mut recorder) = session.recorder.lock() {
                if let Some(writer) = recorder.take() {
                    if let Err(e) = writer.finalize() {
                        log::warn!("failed to finalize debug recording: {e}");
                    }
                }
            }
            log::info!("capture session stopped");
        } else {
            log::debug!("stop requested with no active session");
        }
        inner.state = CaptureState::Idle;

        if let Ok(mut guard) = self.ops_cancel.lock() {
            *guard = CancellationToken::new();
        }
    }

    /// Fully release the microphone's native resources. Suspending the
    /// stream without releasing it still leaks assistant playback into
    /// capture on some platforms, so pause means close.
    pub async fn pause_microphone(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != CaptureState::Capturing {
            log::debug!("pause ignored in state {}", inner.state);
            return;
        }
        let Some(session) = inner.session.as_mut() else {
            return;
        };
        if let Some(stream) = session.mic_stream.take() {
            stream.close();
        }
        session.paused_at = Some(Instant::now());
        inner.state = CaptureState::Paused;
        log::info!("microphone paused");
    }

    /// Re-select and re-open the microphone. The underlying OS resource
    /// was fully released on pause, so selection runs fresh rather than
    /// reusing a cached handle. Audio is not allowed to flow again until
    /// the minimum gap after the pause timestamp has elapsed, to avoid
    /// capturing the tail of the assistant's own playback.
    pub async fn resume_microphone(&self) {
        let token = self.current_token();
        let mut inner = self.inner.lock().await;
        let Inner { state, session } = &mut *inner;
        if *state != CaptureState::Paused {
            log::debug!("resume ignored in state {state}");
            return;
        }
        let Some(session) = session.as_mut() else {
            return;
        };

        if let Some(paused_at) = session.paused_at {
            let min_gap = Duration::from_millis(session.config.min_resume_gap_ms);
            let elapsed = paused_at.elapsed();
            if elapsed < min_gap {
                let wait = min_gap - elapsed;
                log::debug!("delaying resume {} ms to clear playback tail", wait.as_millis());
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = token.cancelled() => {
                        log::info!("resume preempted by stop");
                        return;
                    }
                }
            }
        }
        if token.is_cancelled() {
            log::info!("resume preempted by stop");
            return;
        }

        let device = match self.platform.select_microphone_device() {
            Ok(device) => device,
            Err(e) => {
                log::warn!("resume: no usable microphone ({e}), continuing without microphone");
                session.mic_error = Some(e.to_string());
                session.paused_at = None;
                *state = CaptureState::Capturing;
                return;
            }
        };
        if token.is_cancelled() {
            log::info!("resume preempted by stop");
            return;
        }

        if session
            .mic_device
            .as_ref()
            .map(|previous| previous.device_id != device.device_id)
            .unwrap_or(false)
        {
            log::info!("microphone changed across resume: '{}'", device.label);
        }

        let sink = self.mic_sample_sink(session);
        match self
            .platform
            .open_microphone(&device, session.config.sample_rate, sink)
        {
            Ok(stream) => {
                log::info!("microphone resumed on '{}'", stream.device_label());
                session.mic_device = Some(device);
                session.mic_stream = Some(stream);
                session.mic_error = None;
            }
            Err(e) => {
                log::warn!("resume: microphone re-open failed ({e})");
                session.mic_error = Some(e.to_string());
            }
        }

        if token.is_cancelled() {
            // Stop raced the open; release what was just acquired.
            if let Some(stream) = session.mic_stream.take() {
                stream.close();
            }
            return;
        }
        session.paused_at = None;
        *state = CaptureState::Capturing;
    }

    /// Open the system-loopback path, independent of the microphone
    /// lifecycle. No-op if already running.
    pub async fn start_system_audio_capture(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.session.as_mut() else {
            return Err(CaptureError::NoSession);
        };
        if session.loopback_stream.is_some() {
            return Ok(());
        }
        let stream = self.open_loopback(session)?;
        log::info!(
            "system audio capture started on '{}'",
            stream.device_label()
        );
        session.loopback_stream = Some(stream);
        Ok(())
    }

    /// Close the system-loopback path, leaving the microphone untouched.
    pub async fn stop_system_audio_capture(&self) {
        let mut inner = self.inner.lock().await;
        let Some(session) = inner.session.as_mut() else {
            return;
        };
        if let Some(stream) = session.loopback_stream.take() {
            stream.close();
            // Stale reference frames would subtract audio that is no
            // longer playing.
            session.echo_ref.clear();
            log::info!("system audio capture stopped");
        }
    }

    pub async fn get_performance_stats(&self) -> PerformanceStats {
        let inner = self.inner.lock().await;
        let Some(session) = inner.session.as_ref() else {
            return PerformanceStats {
                total_chunks: 0,
                voice_chunks: 0,
                traffic_reduction_percent: 0.0,
            };
        };
        let total = session.counters.total_chunks();
        let voice = session.counters.voice_chunks();
        let reduction = if total == 0 {
            0.0
        } else {
            100.0 * (1.0 - voice as f32 / total as f32)
        };
        PerformanceStats {
            total_chunks: total,
            voice_chunks: voice,
            traffic_reduction_percent: reduction,
        }
    }

    pub async fn health(&self) -> CaptureHealth {
        let inner = self.inner.lock().await;
        match inner.session.as_ref() {
            Some(session) => CaptureHealth {
                state: inner.state,
                mic_active: session.mic_stream.is_some(),
                system_audio_active: session.loopback_stream.is_some(),
                aec_active: session
                    .aec
                    .lock()
                    .map(|engine| engine.is_active())
                    .unwrap_or(false),
                mic_error: session.mic_error.clone(),
            },
            None => CaptureHealth {
                state: inner.state,
                mic_active: false,
                system_audio_active: false,
                aec_active: false,
                mic_error: None,
            },
        }
    }

    /// Advisory throttle hint from the rolling token window.
    pub async fn should_throttle(&self) -> bool {
        let inner = self.inner.lock().await;
        let Some(session) = inner.session.as_ref() else {
            return false;
        };
        match self.tokens.lock() {
            Ok(mut tokens) => tokens.should_throttle(
                session.config.max_tokens_per_minute,
                session.config.throttle_at_percent,
            ),
            Err(_) => false,
        }
    }

    fn current_token(&self) -> CancellationToken {
        match self.ops_cancel.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => CancellationToken::new(),
        }
    }

    fn open_loopback(&self, session: &Session) -> Result<Box<dyn CaptureStream>> {
        let sink = self.loopback_sample_sink(session);
        self.platform
            .open_system_loopback(session.config.sample_rate, sink)
    }

    /// Microphone processing chain, run inside the audio callback:
    /// chunk → echo-cancel → gate → encode → queue.
    fn mic_sample_sink(&self, session: &Session) -> SampleSink {
        let samples_per_chunk = session.config.samples_per_chunk();
        let sample_rate = session.config.sample_rate;
        let chunk_ms = u64::from(session.config.chunk_duration_ms);
        let mut chunker = FrameChunker::new(samples_per_chunk);
        let echo = session.echo_ref.clone();
        let aec = Arc::clone(&session.aec);
        let gate = Arc::clone(&session.gate);
        let recorder = Arc::clone(&session.recorder);
        let sink = Arc::clone(&self.sink);
        let tokens = Arc::clone(&self.tokens);

        Box::new(move |samples: &[f32]| {
            for chunk in chunker.push(samples) {
                let reference = echo.latest();
                let cleaned = match aec.lock() {
                    Ok(mut engine) => {
                        engine.cancel(&chunk, reference.as_ref().map(|f| f.samples.as_slice()))
                    }
                    Err(_) => chunk,
                };
                let transmit = match gate.lock() {
                    Ok(mut gate) => gate.process(&cleaned, Instant::now()),
                    Err(_) => true,
                };
                if !transmit {
                    continue;
                }

                let frame = match AudioFrame::sized(
                    pcm_f32_to_i16(&cleaned),
                    AudioSource::Microphone,
                    samples_per_chunk,
                ) {
                    Ok(frame) => frame,
                    Err(e) => {
                        // Contract violation: the chunker guarantees the
                        // length, so this is a defect, not an input.
                        log::error!("dropping malformed microphone chunk: {e}");
                        continue;
                    }
                };

                if let Ok(mut recorder) = recorder.lock() {
                    if let Some(writer) = recorder.as_mut() {
                        for &sample in &frame.samples {
                            let _ = writer.write_sample(sample);
                        }
                    }
                }

                if let Err(e) = sink.send_frame(encode_frame(&frame, sample_rate)) {
                    log::debug!("microphone frame not delivered: {e}");
                }
                if let Ok(mut tokens) = tokens.lock() {
                    tokens.add_event(chunk_ms, TokenKind::LocalAudio);
                }
            }
        })
    }

    /// System-audio chain: chunk → echo reference → encode → queue.
    fn loopback_sample_sink(&self, session: &Session) -> SampleSink {
        let samples_per_chunk = session.config.samples_per_chunk();
        let sample_rate = session.config.sample_rate;
        let chunk_ms = u64::from(session.config.chunk_duration_ms);
        let mut chunker = FrameChunker::new(samples_per_chunk);
        let echo = session.echo_ref.clone();
        let sink = Arc::clone(&self.sink);
        let tokens = Arc::clone(&self.tokens);

        Box::new(move |samples: &[f32]| {
            for chunk in chunker.push(samples) {
                let frame = match AudioFrame::sized(
                    pcm_f32_to_i16(&chunk),
                    AudioSource::SystemAudio,
                    samples_per_chunk,
                ) {
                    Ok(frame) => frame,
                    Err(e) => {
                        log::error!("dropping malformed system-audio chunk: {e}");
                        continue;
                    }
                };

                if let Err(e) = sink.send_frame(encode_frame(&frame, sample_rate)) {
                    log::debug!("system-audio frame not delivered: {e}");
                }
                echo.push(frame);
                if let Ok(mut tokens) = tokens.lock() {
                    tokens.add_event(chunk_ms, TokenKind::RemoteAudio);
                }
            }
        })
    }
}

fn open_recorder(config: &CaptureConfig) -> SharedRecorder {
    let writer = config.debug_wav_path.as_ref().and_then(|path| {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: config.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        match hound::WavWriter::create(path, spec) {
            Ok(writer) => {
                log::info!("writing cleaned capture to {}", path.display());
                Some(writer)
            }
            Err(e) => {
                log::warn!("debug recording disabled: {e}");
                None
            }
        }
    });
    Arc::new(StdMutex::new(writer))
}
