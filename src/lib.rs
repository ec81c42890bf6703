pub mod aec;
pub mod capture;
pub mod chunker;
pub mod config;
pub mod echo_ref;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod speech_channel;
pub mod tokens;
pub mod vad;

pub use config::CaptureConfig;
pub use error::{CaptureError, Result};
pub use lifecycle::{CaptureHealth, CaptureState, LifecycleController, PerformanceStats};
