//! Acoustic echo cancellation.
//!
//! Wraps the native adaptive filter and drives it in fixed subframes,
//! converting between the pipeline's f32 samples and the filter's i16
//! fixed point at the boundary. AEC is a best-effort enhancement: if the
//! native module is missing or fails, the engine passes audio through
//! unchanged rather than erroring.

#[cfg(feature = "libaec")]
pub mod ffi;

use crate::config::CaptureConfig;
use crate::error::Result;
use dasp_sample::Sample;

/// One native cancel call on a fixed-size subframe. The indirection keeps
/// the subframe loop testable without the native library.
pub trait SubframeCanceller: Send {
    fn cancel(&mut self, rec: &[i16], echo: &[i16], out: &mut [i16]) -> Result<()>;
}

#[cfg(feature = "libaec")]
impl SubframeCanceller for ffi::AecHandle {
    fn cancel(&mut self, rec: &[i16], echo: &[i16], out: &mut [i16]) -> Result<()> {
        ffi::AecHandle::cancel(self, rec, echo, out)
    }
}

/// Parameters the native filter is created with, fixed per session.
#[derive(Debug, Clone)]
pub struct AecParams {
    pub subframe_len: usize,
    pub filter_length: i32,
    pub sample_rate: u32,
    pub enable_preprocess: bool,
}

impl AecParams {
    pub fn from_capture(config: &CaptureConfig) -> Self {
        Self {
            subframe_len: config.aec_subframe_len,
            filter_length: config.aec_filter_length,
            sample_rate: config.sample_rate,
            enable_preprocess: true,
        }
    }
}

#[cfg(feature = "libaec")]
fn native_canceller(params: &AecParams) -> Result<Box<dyn SubframeCanceller>> {
    let handle = ffi::AecHandle::new(
        params.subframe_len,
        params.filter_length,
        params.sample_rate,
        params.enable_preprocess,
    )?;
    Ok(Box::new(handle))
}

#[cfg(not(feature = "libaec"))]
fn native_canceller(_params: &AecParams) -> Result<Box<dyn SubframeCanceller>> {
    Err(crate::error::CaptureError::AecInitFailed(
        "built without the libaec feature".to_string(),
    ))
}

/// Echo-cancellation engine for one capture session.
///
/// Holds at most one native handle; a failed native call latches the
/// engine into pass-through for the rest of the session instead of
/// retrying inside the audio callback deadline.
pub struct AecEngine {
    canceller: Option<Box<dyn SubframeCanceller>>,
    subframe_len: usize,
}

impl AecEngine {
    /// Attempt native initialization; falls back to pass-through on
    /// failure (logged, not raised).
    pub fn new(params: &AecParams) -> Self {
        let mut engine = Self::passthrough(params.subframe_len);
        engine.ensure_canceller(params);
        engine
    }

    /// Engine with no native handle; `cancel` is the identity.
    pub fn passthrough(subframe_len: usize) -> Self {
        Self {
            canceller: None,
            subframe_len,
        }
    }

    /// Engine with an externally supplied canceller.
    pub fn with_canceller(subframe_len: usize, canceller: Box<dyn SubframeCanceller>) -> Self {
        Self {
            canceller: Some(canceller),
            subframe_len,
        }
    }

    /// Create the native handle if one does not exist yet. A second call
    /// reuses the existing handle.
    pub fn ensure_canceller(&mut self, params: &AecParams) {
        if self.canceller.is_some() {
            return;
        }
        match native_canceller(params) {
            Ok(canceller) => self.canceller = Some(canceller),
            Err(e) => log::warn!("echo canceller unavailable: {e}"),
        }
    }

    pub fn is_active(&self) -> bool {
        self.canceller.is_some()
    }

    /// Remove the echo of `echo` from `mic`.
    ///
    /// The chunk is processed in `floor(len / subframe_len)` subframes;
    /// tail samples that do not fill a subframe are copied through. The
    /// echo reference is aligned per subframe: truncated if longer,
    /// zero-padded if shorter or absent. Without a native handle this
    /// returns `mic` unchanged.
    pub fn cancel(&mut self, mic: &[f32], echo: Option<&[i16]>) -> Vec<f32> {
        let sub = self.subframe_len;
        let full_len = (mic.len() / sub) * sub;
        let mut out = Vec::with_capacity(mic.len());
        let mut processed = 0;

        while processed < full_len {
            let Some(canceller) = self.canceller.as_mut() else {
                break;
            };
            // Fresh buffers per subframe; nothing crosses the native
            // boundary twice.
            let rec: Vec<i16> = mic[processed..processed + sub]
                .iter()
                .map(|&s| s.to_sample())
                .collect();
            let reference = align_reference(echo, processed, sub);
            let mut cleaned = vec![0i16; sub];

            match canceller.cancel(&rec, &reference, &mut cleaned) {
                Ok(()) => {
                    out.extend(cleaned.iter().map(|&s| f32::from_sample(s)));
                    processed += sub;
                }
                Err(e) => {
                    log::warn!("native echo cancel failed, disabling for this session: {e}");
                    self.canceller = None;
                }
            }
        }

        // Tail samples that do not fill a subframe, plus everything after
        // a latched failure or with no handle at all, pass through.
        out.extend_from_slice(&mic[processed..]);
        out
    }
}

/// Slice `len` reference samples starting at `offset`, zero-padding
/// whatever the reference cannot cover.
fn align_reference(echo: Option<&[i16]>, offset: usize, len: usize) -> Vec<i16> {
    let mut out = vec![0i16; len];
    if let Some(echo) = echo {
        let available = echo.len().saturating_sub(offset).min(len);
        out[..available].copy_from_slice(&echo[offset..offset + available]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Zeroes every subframe it sees and counts invocations.
    struct ZeroingCanceller {
        calls: Arc<AtomicUsize>,
    }

    impl SubframeCanceller for ZeroingCanceller {
        fn cancel(&mut self, _rec: &[i16], _echo: &[i16], out: &mut [i16]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            out.fill(0);
            Ok(())
        }
    }

    struct FailingCanceller;

    impl SubframeCanceller for FailingCanceller {
        fn cancel(&mut self, _rec: &[i16], _echo: &[i16], _out: &mut [i16]) -> Result<()> {
            Err(CaptureError::NativeCallFailed("boom".to_string()))
        }
    }

    #[test]
    fn test_passthrough_is_identity() {
        let mut engine = AecEngine::passthrough(160);
        let mic: Vec<f32> = (0..500).map(|i| (i as f32 / 500.0) - 0.5).collect();
        let out = engine.cancel(&mic, Some(&[100i16; 500]));
        assert_eq!(out, mic);
        assert!(!engine.is_active());
    }

    #[test]
    fn test_subframe_count_and_tail_passthrough() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = AecEngine::with_canceller(
            160,
            Box::new(ZeroingCanceller {
                calls: Arc::clone(&calls),
            }),
        );

        // 600 samples at a 160-sample subframe: 3 subframes, 120-sample tail.
        let mic = vec![0.5f32; 600];
        let out = engine.cancel(&mic, None);

        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(out.len(), 600);
        assert!(out[..480].iter().all(|&s| s == 0.0));
        assert!(out[480..].iter().all(|&s| s == 0.5));
    }

    #[test]
    fn test_chunk_shorter_than_subframe_is_untouched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = AecEngine::with_canceller(
            160,
            Box::new(ZeroingCanceller {
                calls: Arc::clone(&calls),
            }),
        );
        let mic = vec![0.25f32; 100];
        let out = engine.cancel(&mic, None);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert_eq!(out, mic);
    }

    #[test]
    fn test_failed_native_call_latches_passthrough() {
        let mut engine = AecEngine::with_canceller(160, Box::new(FailingCanceller));
        assert!(engine.is_active());

        let mic = vec![0.5f32; 320];
        let out = engine.cancel(&mic, None);
        // The failing subframe and everything after it pass through.
        assert_eq!(out, mic);
        assert!(!engine.is_active());

        // Subsequent chunks skip the native path entirely.
        let out = engine.cancel(&mic, Some(&[1i16; 320]));
        assert_eq!(out, mic);
    }

    #[test]
    fn test_align_reference_pads_and_truncates() {
        // Absent reference: all zeros.
        assert_eq!(align_reference(None, 0, 4), vec![0; 4]);

        // Shorter than needed: zero-padded tail.
        let reference = [5i16, 6, 7];
        assert_eq!(align_reference(Some(&reference), 0, 5), vec![5, 6, 7, 0, 0]);

        // Offset past the end: all zeros.
        assert_eq!(align_reference(Some(&reference), 10, 3), vec![0; 3]);

        // Longer than needed: truncated to the subframe.
        let reference = [1i16, 2, 3, 4, 5, 6];
        assert_eq!(align_reference(Some(&reference), 2, 2), vec![3, 4]);
    }

    #[test]
    fn test_ensure_canceller_reuses_existing_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut engine = AecEngine::with_canceller(
            160,
            Box::new(ZeroingCanceller {
                calls: Arc::clone(&calls),
            }),
        );
        // Without the native feature this would otherwise clear to
        // pass-through; the existing canceller must survive.
        engine.ensure_canceller(&AecParams::from_capture(&Default::default()));
        assert!(engine.is_active());
    }
}
