use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Capture pipeline configuration. The sample rate and chunk duration are
/// fixed for the lifetime of a session once `start_capture` has accepted
/// them.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub chunk_duration_ms: u32,
    /// Echo cancellation; auto-disables if the native engine fails to
    /// initialize.
    pub aec_enabled: bool,
    pub vad_enabled: bool,
    /// Average voice-band magnitude above which a chunk counts as raw voice.
    pub energy_threshold: f32,
    /// Single-bin magnitude above which a chunk counts as raw voice.
    pub peak_threshold: f32,
    pub voice_threshold_ms: u64,
    pub silence_threshold_ms: u64,
    pub max_tokens_per_minute: u64,
    pub throttle_at_percent: u8,
    /// Samples per native echo-cancel call.
    pub aec_subframe_len: usize,
    pub aec_filter_length: i32,
    /// How many recent system-audio frames to keep as echo reference.
    pub echo_ref_capacity: usize,
    /// Minimum delay between pausing the microphone and audio flowing
    /// again on resume.
    pub min_resume_gap_ms: u64,
    pub frame_queue_capacity: usize,
    /// Write cleaned microphone audio to this WAV file for diagnosis.
    pub debug_wav_path: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            chunk_duration_ms: 25,
            aec_enabled: true,
            vad_enabled: true,
            energy_threshold: 0.005,
            peak_threshold: 0.02,
            voice_threshold_ms: 150,
            silence_threshold_ms: 1_000,
            max_tokens_per_minute: 12_000,
            throttle_at_percent: 80,
            aec_subframe_len: 160,
            aec_filter_length: 1_600,
            echo_ref_capacity: 10,
            min_resume_gap_ms: 100,
            frame_queue_capacity: 32,
            debug_wav_path: None,
        }
    }
}

impl CaptureConfig {
    pub fn samples_per_chunk(&self) -> usize {
        (self.sample_rate as usize * self.chunk_duration_ms as usize) / 1000
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate", "must be positive"));
        }
        if self.chunk_duration_ms == 0 || self.chunk_duration_ms > 500 {
            return Err(invalid("chunk_duration_ms", "must be in 1..=500"));
        }
        if self.samples_per_chunk() == 0 {
            return Err(invalid(
                "chunk_duration_ms",
                "yields zero samples per chunk at this sample rate",
            ));
        }
        if self.aec_subframe_len == 0 {
            return Err(invalid("aec_subframe_len", "must be positive"));
        }
        if self.aec_filter_length <= 0 {
            return Err(invalid("aec_filter_length", "must be positive"));
        }
        if self.throttle_at_percent > 100 {
            return Err(invalid("throttle_at_percent", "must be in 0..=100"));
        }
        if self.echo_ref_capacity == 0 {
            return Err(invalid("echo_ref_capacity", "must be positive"));
        }
        if self.frame_queue_capacity == 0 {
            return Err(invalid("frame_queue_capacity", "must be positive"));
        }
        Ok(())
    }

    /// Load defaults, then apply `CAPTURE_*` environment overrides. A
    /// `.env` file in the working directory is honored for development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Some(v) = read_env("CAPTURE_SAMPLE_RATE")? {
            config.sample_rate = v;
        }
        if let Some(v) = read_env("CAPTURE_CHUNK_DURATION_MS")? {
            config.chunk_duration_ms = v;
        }
        if let Some(v) = read_env_bool("CAPTURE_AEC_ENABLED")? {
            config.aec_enabled = v;
        }
        if let Some(v) = read_env_bool("CAPTURE_VAD_ENABLED")? {
            config.vad_enabled = v;
        }
        if let Some(v) = read_env("CAPTURE_ENERGY_THRESHOLD")? {
            config.energy_threshold = v;
        }
        if let Some(v) = read_env("CAPTURE_PEAK_THRESHOLD")? {
            config.peak_threshold = v;
        }
        if let Some(v) = read_env("CAPTURE_VOICE_THRESHOLD_MS")? {
            config.voice_threshold_ms = v;
        }
        if let Some(v) = read_env("CAPTURE_SILENCE_THRESHOLD_MS")? {
            config.silence_threshold_ms = v;
        }
        if let Some(v) = read_env("CAPTURE_MAX_TOKENS_PER_MINUTE")? {
            config.max_tokens_per_minute = v;
        }
        if let Some(v) = read_env("CAPTURE_THROTTLE_AT_PERCENT")? {
            config.throttle_at_percent = v;
        }
        if let Ok(path) = env::var("CAPTURE_DEBUG_WAV") {
            if !path.trim().is_empty() {
                config.debug_wav_path = Some(PathBuf::from(path));
            }
        }
        config.validate()?;
        Ok(config)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn read_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &e.to_string())),
        Err(_) => Ok(None),
    }
}

fn read_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            other => Err(invalid(key, &format!("expected a boolean, got '{other}'"))),
        },
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.samples_per_chunk(), 600);
    }

    #[test]
    fn test_validate_rejects_zero_chunk_duration() {
        let config = CaptureConfig {
            chunk_duration_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_throttle_over_100() {
        let config = CaptureConfig {
            throttle_at_percent: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("CAPTURE_SAMPLE_RATE", "16000");
        env::set_var("CAPTURE_VAD_ENABLED", "false");
        let config = CaptureConfig::from_env().unwrap();
        assert_eq!(config.sample_rate, 16_000);
        assert!(!config.vad_enabled);
        env::remove_var("CAPTURE_SAMPLE_RATE");
        env::remove_var("CAPTURE_VAD_ENABLED");
    }

    #[test]
    #[serial]
    fn test_env_rejects_garbage() {
        env::set_var("CAPTURE_SAMPLE_RATE", "not-a-number");
        assert!(CaptureConfig::from_env().is_err());
        env::remove_var("CAPTURE_SAMPLE_RATE");
    }
}
