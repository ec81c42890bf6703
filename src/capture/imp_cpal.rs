//! CPAL-backed capture for the desktop platforms.
//!
//! cpal streams are not `Send`, so every open spawns a dedicated thread
//! that builds the stream, keeps it alive, and tears it down on close.
//! The returned handle is `Send` and joins that thread when dropped.

use crate::capture::{is_loopback_label, CapturePlatform, CaptureStream, DeviceInfo, DeviceKind, SampleSink};
use crate::error::{CaptureError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use std::sync::mpsc;
use std::thread::JoinHandle;

pub struct CpalPlatform;

impl CpalPlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl CapturePlatform for CpalPlatform {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let mut result = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                result.push(DeviceInfo {
                    device_id: name.clone(),
                    label: name,
                    kind: DeviceKind::Input,
                });
            }
        }
        Ok(result)
    }

    fn open_microphone(
        &self,
        device: &DeviceInfo,
        sample_rate: u32,
        sink: SampleSink,
    ) -> Result<Box<dyn CaptureStream>> {
        let device_id = device.device_id.clone();
        spawn_stream_thread(move |host| {
            let device = host
                .input_devices()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().map(|n| n == device_id).unwrap_or(false))
                .ok_or_else(|| {
                    CaptureError::DeviceUnavailable(format!("device not found: {device_id}"))
                })?;

            let (stream, label) = build_capture_stream(&device, sample_rate, sink)?;

            // The OS may land the open on a different endpoint than the
            // one selected (default rerouting, hot-unplug). Re-check the
            // label it actually resolved to before any audio flows.
            if is_loopback_label(&label) {
                return Err(CaptureError::SystemAudioDetected(label));
            }

            stream
                .play()
                .map_err(|e| CaptureError::Stream(e.to_string()))?;
            Ok((stream, label))
        })
    }

    fn open_system_loopback(
        &self,
        sample_rate: u32,
        sink: SampleSink,
    ) -> Result<Box<dyn CaptureStream>> {
        open_loopback(sample_rate, sink)
    }
}

/// WASAPI opens an output endpoint in loopback mode when an input stream
/// is requested on it.
#[cfg(target_os = "windows")]
fn open_loopback(sample_rate: u32, sink: SampleSink) -> Result<Box<dyn CaptureStream>> {
    spawn_stream_thread(move |host| {
        let device = host
            .default_output_device()
            .ok_or(CaptureError::LoopbackUnsupported)?;
        let (stream, label) = build_capture_stream(&device, sample_rate, sink)?;
        stream
            .play()
            .map_err(|e| CaptureError::Stream(e.to_string()))?;
        Ok((stream, label))
    })
}

/// PulseAudio/PipeWire expose system playback as "Monitor of ..." input
/// devices.
#[cfg(target_os = "linux")]
fn open_loopback(sample_rate: u32, sink: SampleSink) -> Result<Box<dyn CaptureStream>> {
    spawn_stream_thread(move |host| {
        let device = host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| is_loopback_label(&n)).unwrap_or(false))
            .ok_or(CaptureError::LoopbackUnsupported)?;
        let (stream, label) = build_capture_stream(&device, sample_rate, sink)?;
        stream
            .play()
            .map_err(|e| CaptureError::Stream(e.to_string()))?;
        Ok((stream, label))
    })
}

// No native loopback on macOS without a virtual device.
#[cfg(not(any(target_os = "windows", target_os = "linux")))]
fn open_loopback(_sample_rate: u32, _sink: SampleSink) -> Result<Box<dyn CaptureStream>> {
    Err(CaptureError::LoopbackUnsupported)
}

/// Stream handle backed by the thread that owns the cpal stream.
struct ThreadStream {
    label: String,
    shutdown: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl ThreadStream {
    fn release(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl CaptureStream for ThreadStream {
    fn device_label(&self) -> &str {
        &self.label
    }

    fn close(mut self: Box<Self>) {
        self.release();
    }
}

impl Drop for ThreadStream {
    fn drop(&mut self) {
        self.release();
    }
}

fn spawn_stream_thread<F>(build: F) -> Result<Box<dyn CaptureStream>>
where
    F: FnOnce(cpal::Host) -> Result<(cpal::Stream, String)> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel();
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let join = std::thread::Builder::new()
        .name("audio-capture".to_string())
        .spawn(move || {
            let host = cpal::default_host();
            match build(host) {
                Ok((stream, label)) => {
                    let _ = ready_tx.send(Ok(label));
                    // Hold the stream open until close or drop.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })
        .map_err(|e| CaptureError::Stream(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(label)) => Ok(Box::new(ThreadStream {
            label,
            shutdown: shutdown_tx,
            join: Some(join),
        })),
        Ok(Err(e)) => {
            let _ = join.join();
            Err(e)
        }
        Err(_) => Err(CaptureError::Stream(
            "capture thread exited before startup".to_string(),
        )),
    }
}

fn build_capture_stream(
    device: &cpal::Device,
    sample_rate: u32,
    sink: SampleSink,
) -> Result<(cpal::Stream, String)> {
    let label = device
        .name()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    let supported: Vec<_> = device
        .supported_input_configs()
        .map_err(map_config_error)?
        .collect();

    // Prefer the fewest channels that carry the negotiated rate; channel 0
    // is extracted either way, so extra channels are wasted bandwidth.
    let chosen = supported
        .iter()
        .filter(|c| c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate)
        .min_by_key(|c| c.channels())
        .map(|c| c.with_sample_rate(cpal::SampleRate(sample_rate)))
        .ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!(
                "no input config at {sample_rate} Hz on {label}"
            ))
        })?;

    let channels = chosen.channels() as usize;
    let config = cpal::StreamConfig {
        channels: chosen.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    log::info!(
        "opening capture on '{}': {} channels @ {} Hz ({:?})",
        label,
        channels,
        sample_rate,
        chosen.sample_format()
    );

    let stream = match chosen.sample_format() {
        SampleFormat::F32 => build_input::<f32>(device, &config, channels, sink)?,
        SampleFormat::I16 => build_input::<i16>(device, &config, channels, sink)?,
        SampleFormat::U16 => build_input::<u16>(device, &config, channels, sink)?,
        other => {
            return Err(CaptureError::Stream(format!(
                "unsupported sample format {other:?}"
            )))
        }
    };

    Ok((stream, label))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut sink: SampleSink,
) -> Result<cpal::Stream>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    let mut mono: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Extract channel 0 and convert to f32.
                mono.clear();
                mono.reserve(data.len() / channels.max(1) + 1);
                for frame in data.chunks(channels.max(1)) {
                    if let Some(&sample) = frame.first() {
                        mono.push(f32::from_sample(sample));
                    }
                }
                sink(&mono);
            },
            |err| log::error!("audio stream error: {err}"),
            None,
        )
        .map_err(map_build_error)
}

fn map_build_error(e: cpal::BuildStreamError) -> CaptureError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("device disappeared during open".to_string())
        }
        other => {
            let message = other.to_string();
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("permission") || lowered.contains("access denied") {
                CaptureError::PermissionDenied(message)
            } else {
                CaptureError::Stream(message)
            }
        }
    }
}

fn map_config_error(e: cpal::SupportedStreamConfigsError) -> CaptureError {
    match e {
        cpal::SupportedStreamConfigsError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("device disappeared during enumeration".to_string())
        }
        other => CaptureError::Stream(other.to_string()),
    }
}
