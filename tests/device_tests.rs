//! Tests that need real audio hardware. Run with
//! `cargo test --features test-audio`.
#![cfg(feature = "test-audio")]

use capture_edge_rs::capture::{is_loopback_label, CapturePlatform, PlatformCapture};
use serial_test::serial;

#[test]
#[serial]
fn test_enumerates_real_input_devices() {
    let platform = PlatformCapture::new();
    let devices = platform.input_devices().expect("device enumeration");
    for device in &devices {
        println!(
            "{} (loopback: {})",
            device.label,
            is_loopback_label(&device.label)
        );
    }
}

#[test]
#[serial]
fn test_selection_skips_loopback_devices() {
    let platform = PlatformCapture::new();
    if let Ok(device) = platform.select_microphone_device() {
        assert!(!is_loopback_label(&device.label));
    }
}
