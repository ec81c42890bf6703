// Platform selection logic for capture backends

// Desktop platforms: CPAL
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub mod imp {
    pub use crate::capture::imp_cpal::CpalPlatform as PlatformCapture;
}

// Fallback for unsupported platforms: every operation reports a typed
// failure instead of crashing.
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub mod imp {
    use crate::capture::{CapturePlatform, CaptureStream, DeviceInfo, SampleSink};
    use crate::error::{CaptureError, Result};

    pub struct PlatformCapture;

    impl PlatformCapture {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for PlatformCapture {
        fn default() -> Self {
            Self::new()
        }
    }

    impl CapturePlatform for PlatformCapture {
        fn input_devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(Vec::new())
        }

        fn open_microphone(
            &self,
            _device: &DeviceInfo,
            _sample_rate: u32,
            _sink: SampleSink,
        ) -> Result<Box<dyn CaptureStream>> {
            Err(CaptureError::DeviceUnavailable(
                "no capture backend for this platform".to_string(),
            ))
        }

        fn open_system_loopback(
            &self,
            _sample_rate: u32,
            _sink: SampleSink,
        ) -> Result<Box<dyn CaptureStream>> {
            Err(CaptureError::LoopbackUnsupported)
        }
    }
}

// Re-export the selected platform implementation
pub use imp::PlatformCapture;
