//! Outbound interface to the speech channel.
//!
//! The core is the sole producer on this interface: fixed-size PCM16
//! frames, base64-encoded, tagged "local" (microphone) or "remote"
//! (system audio). Delivery out of the audio callback is non-blocking; a
//! full queue drops the frame and bumps a counter instead of risking the
//! callback deadline.

use crate::error::{CaptureError, Result};
use crate::frame::{AudioFrame, AudioSource};
use base64::{engine::general_purpose, Engine as _};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLabel {
    Local,
    Remote,
}

impl From<AudioSource> for ChannelLabel {
    fn from(source: AudioSource) -> Self {
        match source {
            AudioSource::Microphone => ChannelLabel::Local,
            AudioSource::SystemAudio => ChannelLabel::Remote,
        }
    }
}

/// One encoded frame as the speech channel expects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechFrame {
    /// base64 PCM16 little-endian mono
    pub data: String,
    pub sample_rate: u32,
    pub channel: ChannelLabel,
}

/// Encode a captured frame for transmission.
pub fn encode_frame(frame: &AudioFrame, sample_rate: u32) -> SpeechFrame {
    let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
    for &sample in &frame.samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    SpeechFrame {
        data: general_purpose::STANDARD.encode(&bytes),
        sample_rate,
        channel: frame.source.into(),
    }
}

/// Decode a frame payload back to PCM16 samples.
pub fn decode_pcm(data: &str) -> Result<Vec<i16>> {
    let bytes = general_purpose::STANDARD
        .decode(data)
        .map_err(|e| CaptureError::Stream(format!("invalid frame payload: {e}")))?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Where encoded frames go. Implementations must not block: this is
/// called from the audio callback.
pub trait SpeechSink: Send + Sync {
    fn send_frame(&self, frame: SpeechFrame) -> Result<()>;
}

/// Bounded-queue sink; the subscriber side is a [`FrameStream`].
pub struct ChannelSink {
    tx: mpsc::Sender<SpeechFrame>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, FrameStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            FrameStream { rx },
        )
    }

    /// Frames dropped because the subscriber fell behind.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SpeechSink for ChannelSink {
    fn send_frame(&self, frame: SpeechFrame) -> Result<()> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("frame queue full, dropping frame");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                Err(CaptureError::Stream("speech channel closed".to_string()))
            }
        }
    }
}

/// Subscriber end of a [`ChannelSink`].
pub struct FrameStream {
    rx: mpsc::Receiver<SpeechFrame>,
}

impl FrameStream {
    pub async fn recv(&mut self) -> Option<SpeechFrame> {
        self.rx.recv().await
    }
}

impl Stream for FrameStream {
    type Item = SpeechFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
