//! Safe wrapper around the native libaec adaptive filter.
//!
//! The C ABI is three calls: `AecNew`, `AecCancelEcho`, `AecDestroy`.
//! Bound statically at compile time; only available with the `libaec`
//! feature, which links the prebuilt library.

use crate::error::{CaptureError, Result};

/// Opaque type for the native Aec state
#[repr(C)]
pub struct Aec {
    _private: [u8; 0],
}

extern "C" {
    fn AecNew(
        frame_size: usize,
        filter_length: i32,
        sample_rate: u32,
        enable_preprocess: bool,
    ) -> *mut Aec;

    fn AecCancelEcho(
        aec_ptr: *mut Aec,
        rec_buffer: *const i16,
        echo_buffer: *const i16,
        out_buffer: *mut i16,
        buffer_length: usize,
    );

    fn AecDestroy(aec_ptr: *mut Aec);
}

/// Owns one native adaptive-filter instance for the session's lifetime.
pub struct AecHandle {
    state: *mut Aec,
    subframe_len: usize,
}

// The handle is only ever driven from the microphone callback chain.
unsafe impl Send for AecHandle {}

impl AecHandle {
    /// Create a native filter for a fixed subframe size and sample rate.
    pub fn new(
        subframe_len: usize,
        filter_length: i32,
        sample_rate: u32,
        enable_preprocess: bool,
    ) -> Result<Self> {
        let state =
            unsafe { AecNew(subframe_len, filter_length, sample_rate, enable_preprocess) };
        if state.is_null() {
            return Err(CaptureError::AecInitFailed(
                "AecNew returned a null state".to_string(),
            ));
        }
        Ok(Self {
            state,
            subframe_len,
        })
    }

    /// Cancel one subframe of echo. All three buffers must be exactly the
    /// subframe length negotiated at creation.
    pub fn cancel(&mut self, rec: &[i16], echo: &[i16], out: &mut [i16]) -> Result<()> {
        if rec.len() != self.subframe_len
            || echo.len() != self.subframe_len
            || out.len() != self.subframe_len
        {
            return Err(CaptureError::InvalidChunkSize {
                expected: self.subframe_len,
                got: rec.len().max(echo.len()).max(out.len()),
            });
        }
        unsafe {
            AecCancelEcho(
                self.state,
                rec.as_ptr(),
                echo.as_ptr(),
                out.as_mut_ptr(),
                rec.len(),
            );
        }
        Ok(())
    }
}

impl Drop for AecHandle {
    fn drop(&mut self) {
        unsafe {
            AecDestroy(self.state);
        }
    }
}
