//! Device capture manager.
//!
//! Platform dispatch is a capability lookup: every backend implements the
//! same three operations behind `CapturePlatform`, and operations a
//! platform cannot support return a typed error instead of being skipped.

pub mod imp_cpal;
pub mod imp_mock;
pub mod platform;

use crate::error::{CaptureError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

pub use platform::PlatformCapture;

/// Labels that mark a device as replaying system output. Selecting one of
/// these as the microphone feeds the assistant's own audio straight back
/// into capture.
static LOOPBACK_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)stereo\s*mix|what\s*u\s*hear|what\s*you\s*hear|loopback|monitor|speakers|blackhole|soundflower|virtual\s*cable",
    )
    .expect("loopback label pattern")
});

/// OS alias endpoints that silently follow the default/communications
/// device, which may itself be a loopback.
static RESERVED_DEVICE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(default|communications)$").expect("reserved id pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
    pub kind: DeviceKind,
}

/// Receives mono f32 samples from an open stream's callback.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// An open native stream. Dropping it releases the OS resource; `close`
/// makes the release explicit at call sites.
pub trait CaptureStream: Send {
    fn device_label(&self) -> &str;
    fn close(self: Box<Self>);
}

pub trait CapturePlatform: Send + Sync {
    fn input_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Open an exclusive single-channel stream on `device` at the
    /// negotiated rate. Implementations must re-validate the label the OS
    /// actually handed them and fail with `SystemAudioDetected` if a
    /// forbidden device slipped through.
    fn open_microphone(
        &self,
        device: &DeviceInfo,
        sample_rate: u32,
        sink: SampleSink,
    ) -> Result<Box<dyn CaptureStream>>;

    /// Open a capture of system playback. `LoopbackUnsupported` where the
    /// platform has no native loopback; callers treat that as non-fatal.
    fn open_system_loopback(
        &self,
        sample_rate: u32,
        sink: SampleSink,
    ) -> Result<Box<dyn CaptureStream>>;

    /// Enumerate and pick a microphone that will not cause feedback.
    fn select_microphone_device(&self) -> Result<DeviceInfo> {
        let devices = self.input_devices()?;
        pick_microphone(&devices).map(|d| d.clone())
    }
}

pub fn is_loopback_label(label: &str) -> bool {
    LOOPBACK_LABEL.is_match(label)
}

/// First input device that is neither loopback-labeled nor an OS alias.
pub fn pick_microphone(devices: &[DeviceInfo]) -> Result<&DeviceInfo> {
    devices
        .iter()
        .find(|d| {
            d.kind == DeviceKind::Input
                && !is_loopback_label(&d.label)
                && !RESERVED_DEVICE_ID.is_match(&d.device_id)
        })
        .ok_or(CaptureError::NoSuitableDevice)
}
