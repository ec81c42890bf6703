use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no suitable microphone device")]
    NoSuitableDevice,

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("forbidden loopback device selected: {0}")]
    SystemAudioDetected(String),

    #[error("system loopback capture is not supported on this platform")]
    LoopbackUnsupported,

    #[error("echo canceller failed to initialize: {0}")]
    AecInitFailed(String),

    #[error("audio permission denied: {0}")]
    PermissionDenied(String),

    #[error("native echo-cancel call failed: {0}")]
    NativeCallFailed(String),

    #[error("invalid chunk size: expected {expected}, got {got}")]
    InvalidChunkSize { expected: usize, got: usize },

    #[error("a capture session is already active")]
    SessionActive,

    #[error("no active capture session")]
    NoSession,

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}
