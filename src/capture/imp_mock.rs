//! Hardware-free capture backend for tests.
//!
//! Devices are scripted, opens are counted, and tests drive audio by
//! pushing samples straight into whichever sink is attached.

use crate::capture::{CapturePlatform, CaptureStream, DeviceInfo, DeviceKind, SampleSink};
use crate::error::{CaptureError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

type SinkSlot = Arc<Mutex<Option<SampleSink>>>;

pub struct MockPlatform {
    devices: Mutex<Vec<DeviceInfo>>,
    loopback_supported: bool,
    fail_mic_open: AtomicBool,
    mic_sink: SinkSlot,
    loopback_sink: SinkSlot,
    open_streams: Arc<AtomicUsize>,
    mic_opens: Arc<AtomicUsize>,
    last_mic_open: Arc<Mutex<Option<Instant>>>,
}

impl MockPlatform {
    pub fn new(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices: Mutex::new(devices),
            loopback_supported: true,
            fail_mic_open: AtomicBool::new(false),
            mic_sink: Arc::new(Mutex::new(None)),
            loopback_sink: Arc::new(Mutex::new(None)),
            open_streams: Arc::new(AtomicUsize::new(0)),
            mic_opens: Arc::new(AtomicUsize::new(0)),
            last_mic_open: Arc::new(Mutex::new(None)),
        }
    }

    pub fn without_loopback(devices: Vec<DeviceInfo>) -> Self {
        Self {
            loopback_supported: false,
            ..Self::new(devices)
        }
    }

    pub fn input_device(label: &str) -> DeviceInfo {
        DeviceInfo {
            device_id: label.to_string(),
            label: label.to_string(),
            kind: DeviceKind::Input,
        }
    }

    /// Simulate an OS-level open failure on the next microphone open.
    pub fn set_fail_mic_open(&self, fail: bool) {
        self.fail_mic_open.store(fail, Ordering::SeqCst);
    }

    /// Deliver samples as if the microphone driver invoked its callback.
    pub fn push_mic(&self, samples: &[f32]) {
        if let Ok(mut slot) = self.mic_sink.lock() {
            if let Some(sink) = slot.as_mut() {
                sink(samples);
            }
        }
    }

    /// Deliver samples as if the loopback driver invoked its callback.
    pub fn push_loopback(&self, samples: &[f32]) {
        if let Ok(mut slot) = self.loopback_sink.lock() {
            if let Some(sink) = slot.as_mut() {
                sink(samples);
            }
        }
    }

    /// Streams currently open; zero after every resource was released.
    pub fn open_stream_count(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Total microphone opens over the platform's lifetime.
    pub fn mic_open_count(&self) -> usize {
        self.mic_opens.load(Ordering::SeqCst)
    }

    /// When the most recent microphone open happened.
    pub fn last_mic_open(&self) -> Option<Instant> {
        self.last_mic_open.lock().ok().and_then(|guard| *guard)
    }
}

impl CapturePlatform for MockPlatform {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .devices
            .lock()
            .map(|devices| devices.clone())
            .unwrap_or_default())
    }

    fn open_microphone(
        &self,
        device: &DeviceInfo,
        _sample_rate: u32,
        sink: SampleSink,
    ) -> Result<Box<dyn CaptureStream>> {
        if self.fail_mic_open.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceUnavailable(
                "mock microphone open failure".to_string(),
            ));
        }
        if let Ok(mut slot) = self.mic_sink.lock() {
            *slot = Some(sink);
        }
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        self.mic_opens.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_mic_open.lock() {
            *last = Some(Instant::now());
        }
        Ok(Box::new(MockStream {
            label: device.label.clone(),
            slot: Arc::clone(&self.mic_sink),
            open_streams: Arc::clone(&self.open_streams),
        }))
    }

    fn open_system_loopback(
        &self,
        _sample_rate: u32,
        sink: SampleSink,
    ) -> Result<Box<dyn CaptureStream>> {
        if !self.loopback_supported {
            return Err(CaptureError::LoopbackUnsupported);
        }
        if let Ok(mut slot) = self.loopback_sink.lock() {
            *slot = Some(sink);
        }
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            label: "Mock Loopback".to_string(),
            slot: Arc::clone(&self.loopback_sink),
            open_streams: Arc::clone(&self.open_streams),
        }))
    }
}

struct MockStream {
    label: String,
    slot: SinkSlot,
    open_streams: Arc<AtomicUsize>,
}

impl CaptureStream for MockStream {
    fn device_label(&self) -> &str {
        &self.label
    }

    fn close(self: Box<Self>) {
        drop(self);
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}
