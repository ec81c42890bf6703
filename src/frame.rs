use crate::error::{CaptureError, Result};
use dasp_sample::Sample;
use std::fmt;
use std::time::Instant;

/// Which physical source a frame was captured from. Attached at
/// acquisition time; downstream code must never infer the source from a
/// device label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioSource {
    Microphone,
    SystemAudio,
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::Microphone => write!(f, "microphone"),
            AudioSource::SystemAudio => write!(f, "system audio"),
        }
    }
}

/// A fixed-length chunk of 16-bit PCM with its source tag and capture
/// timestamp. The length is negotiated once per session and every frame
/// must match it.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub source: AudioSource,
    pub captured_at: Instant,
}

impl AudioFrame {
    /// Create a frame, enforcing the negotiated chunk length.
    pub fn sized(samples: Vec<i16>, source: AudioSource, expected_len: usize) -> Result<Self> {
        if samples.len() != expected_len {
            return Err(CaptureError::InvalidChunkSize {
                expected: expected_len,
                got: samples.len(),
            });
        }
        Ok(Self {
            samples,
            source,
            captured_at: Instant::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert normalized float samples to 16-bit PCM.
pub fn pcm_f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| s.to_sample()).collect()
}

/// Convert 16-bit PCM to normalized float samples.
pub fn pcm_i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s.to_sample()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sized_accepts_matching_length() {
        let frame = AudioFrame::sized(vec![0i16; 600], AudioSource::Microphone, 600).unwrap();
        assert_eq!(frame.len(), 600);
        assert_eq!(frame.source, AudioSource::Microphone);
    }

    #[test]
    fn test_sized_rejects_mismatched_length() {
        let result = AudioFrame::sized(vec![0i16; 599], AudioSource::SystemAudio, 600);
        match result {
            Err(CaptureError::InvalidChunkSize { expected, got }) => {
                assert_eq!(expected, 600);
                assert_eq!(got, 599);
            }
            other => panic!("expected InvalidChunkSize, got {:?}", other),
        }
    }

    #[test]
    fn test_pcm_conversion_preserves_silence_and_sign() {
        let converted = pcm_f32_to_i16(&[0.0, 0.5, -0.5]);
        assert_eq!(converted[0], 0);
        assert!(converted[1] > 0);
        assert!(converted[2] < 0);

        let back = pcm_i16_to_f32(&converted);
        assert!(back[0].abs() < 1e-6);
        assert!((back[1] - 0.5).abs() < 1e-3);
    }
}
