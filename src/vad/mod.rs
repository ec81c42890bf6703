//! Voice Activity Detection (VAD)
//!
//! Frequency-domain energy gate with debounced hysteresis. A chunk is
//! transmitted only while the gate is active; activation requires
//! sustained voice-band energy and deactivation requires sustained
//! silence, so a noisy signal cannot chatter the gate on and off.

pub mod spectrum;

use crate::config::CaptureConfig;
use spectrum::BandEnergyAnalyzer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct VadConfig {
    pub enabled: bool,
    pub sample_rate: u32,
    /// Analysis window in samples (transform size).
    pub window_size: usize,
    pub energy_threshold: f32,
    pub peak_threshold: f32,
    /// Sustained voice required to activate.
    pub voice_threshold_ms: u64,
    /// Sustained silence required to deactivate.
    pub silence_threshold_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 24_000,
            window_size: 512,
            energy_threshold: 0.005,
            peak_threshold: 0.02,
            voice_threshold_ms: 150,
            silence_threshold_ms: 1_000,
        }
    }
}

impl VadConfig {
    pub fn from_capture(config: &CaptureConfig) -> Self {
        Self {
            enabled: config.vad_enabled,
            sample_rate: config.sample_rate,
            window_size: 512,
            energy_threshold: config.energy_threshold,
            peak_threshold: config.peak_threshold,
            voice_threshold_ms: config.voice_threshold_ms,
            silence_threshold_ms: config.silence_threshold_ms,
        }
    }
}

/// Monotonic per-session counters, shared with whoever reports stats.
#[derive(Debug, Default)]
pub struct VadCounters {
    total: AtomicU64,
    voice: AtomicU64,
}

impl VadCounters {
    pub fn total_chunks(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn voice_chunks(&self) -> u64 {
        self.voice.load(Ordering::Relaxed)
    }
}

/// The gate itself. `process` is the only mutation point; timestamps are
/// passed in explicitly so the state machine is deterministic under test.
pub struct VoiceGate {
    config: VadConfig,
    analyzer: BandEnergyAnalyzer,
    active: bool,
    last_voice: Option<Instant>,
    last_silence: Option<Instant>,
    voice_run_start: Option<Instant>,
    silence_run_start: Option<Instant>,
    counters: Arc<VadCounters>,
}

impl VoiceGate {
    pub fn new(config: VadConfig) -> Self {
        Self::with_counters(config, Arc::new(VadCounters::default()))
    }

    pub fn with_counters(config: VadConfig, counters: Arc<VadCounters>) -> Self {
        let analyzer = BandEnergyAnalyzer::new(config.window_size, config.sample_rate);
        Self {
            config,
            analyzer,
            active: false,
            last_voice: None,
            last_silence: None,
            voice_run_start: None,
            silence_run_start: None,
            counters,
        }
    }

    pub fn counters(&self) -> Arc<VadCounters> {
        Arc::clone(&self.counters)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_voice(&self) -> Option<Instant> {
        self.last_voice
    }

    pub fn last_silence(&self) -> Option<Instant> {
        self.last_silence
    }

    /// Clear hysteresis state. Counters survive; they are monotonic for
    /// the session's lifetime.
    pub fn reset(&mut self) {
        self.active = false;
        self.last_voice = None;
        self.last_silence = None;
        self.voice_run_start = None;
        self.silence_run_start = None;
    }

    /// Analyze one chunk; returns whether it should be transmitted.
    pub fn process(&mut self, samples: &[f32], now: Instant) -> bool {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        if !self.config.enabled {
            // Fail-open: a disabled gate passes everything.
            self.counters.voice.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let energy = self.analyzer.band_energy(samples);
        let raw_voice = energy.average > self.config.energy_threshold
            || energy.peak > self.config.peak_threshold;

        if raw_voice {
            self.last_voice = Some(now);
            self.silence_run_start = None;
            if !self.active {
                let run_start = *self.voice_run_start.get_or_insert(now);
                if now.duration_since(run_start)
                    >= Duration::from_millis(self.config.voice_threshold_ms)
                {
                    self.active = true;
                    log::debug!("voice gate opened");
                }
            }
        } else {
            self.last_silence = Some(now);
            self.voice_run_start = None;
            if self.active {
                let run_start = *self.silence_run_start.get_or_insert(now);
                if now.duration_since(run_start)
                    >= Duration::from_millis(self.config.silence_threshold_ms)
                {
                    self.active = false;
                    log::debug!("voice gate closed");
                }
            }
        }

        if self.active {
            self.counters.voice.fetch_add(1, Ordering::Relaxed);
        }
        self.active
    }
}
