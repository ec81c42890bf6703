//! Voice-band energy analysis using a Fourier transform.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Lower edge of the band speech energy concentrates in.
pub const VOICE_BAND_LOW_HZ: f32 = 300.0;
/// Upper edge; telephone-band ceiling.
pub const VOICE_BAND_HIGH_HZ: f32 = 3_400.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandEnergy {
    /// Mean bin magnitude across the voice band.
    pub average: f32,
    /// Largest single-bin magnitude in the voice band.
    pub peak: f32,
}

/// Computes average and peak magnitude over the voice band of a fixed
/// analysis window. Input shorter than the window is zero-padded; input
/// longer is truncated to the window.
pub struct BandEnergyAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window_size: usize,
    low_bin: usize,
    high_bin: usize,
    input: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl BandEnergyAnalyzer {
    pub fn new(window_size: usize, sample_rate: u32) -> Self {
        assert!(window_size > 0, "window size must be positive");
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);

        let hz_per_bin = sample_rate as f32 / window_size as f32;
        let high_bin =
            ((VOICE_BAND_HIGH_HZ / hz_per_bin).floor() as usize).min(window_size / 2);
        let low_bin = ((VOICE_BAND_LOW_HZ / hz_per_bin).ceil() as usize).min(high_bin);

        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            fft,
            window_size,
            low_bin,
            high_bin,
            input: Vec::with_capacity(window_size),
            scratch,
        }
    }

    pub fn band_energy(&mut self, samples: &[f32]) -> BandEnergy {
        self.input.clear();
        self.input.extend(
            samples
                .iter()
                .take(self.window_size)
                .map(|&s| Complex::new(s, 0.0)),
        );
        self.input.resize(self.window_size, Complex::new(0.0, 0.0));

        self.fft
            .process_with_scratch(&mut self.input, &mut self.scratch);

        let norm = 1.0 / self.window_size as f32;
        let mut sum = 0.0f32;
        let mut peak = 0.0f32;
        for bin in &self.input[self.low_bin..=self.high_bin] {
            let magnitude = bin.norm() * norm;
            sum += magnitude;
            if magnitude > peak {
                peak = magnitude;
            }
        }
        let bins = (self.high_bin - self.low_bin + 1) as f32;
        BandEnergy {
            average: sum / bins,
            peak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| {
                amplitude
                    * (2.0 * std::f32::consts::PI * freq_hz * n as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn test_silence_has_no_energy() {
        let mut analyzer = BandEnergyAnalyzer::new(512, 24_000);
        let energy = analyzer.band_energy(&[0.0; 512]);
        assert_eq!(energy.average, 0.0);
        assert_eq!(energy.peak, 0.0);
    }

    #[test]
    fn test_in_band_tone_shows_up_as_peak() {
        let mut analyzer = BandEnergyAnalyzer::new(512, 24_000);
        // 1500 Hz sits exactly on bin 32 at 24 kHz / 512, so a 0.5
        // amplitude tone yields a 0.25 peak with no leakage.
        let tone = sine(1_500.0, 0.5, 24_000, 512);
        let energy = analyzer.band_energy(&tone);
        assert!((energy.peak - 0.25).abs() < 0.01, "peak {}", energy.peak);
        assert!(energy.average > 0.0);
    }

    #[test]
    fn test_out_of_band_tone_barely_registers() {
        let mut analyzer = BandEnergyAnalyzer::new(512, 24_000);
        // Bin 128 = 6 kHz, well above the voice band.
        let tone = sine(6_000.0, 0.5, 24_000, 512);
        let energy = analyzer.band_energy(&tone);
        assert!(energy.peak < 0.01, "peak {}", energy.peak);
    }

    #[test]
    fn test_short_input_is_zero_padded() {
        let mut analyzer = BandEnergyAnalyzer::new(512, 24_000);
        let energy = analyzer.band_energy(&[0.0; 100]);
        assert_eq!(energy.peak, 0.0);
    }
}
