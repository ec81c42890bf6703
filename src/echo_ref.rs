//! Echo-reference ring buffer.
//!
//! Holds the most recent system-audio frames so the microphone path can
//! subtract the assistant's own playback. Written by the system-audio
//! callback, read by the microphone callback; the shared wrapper keeps
//! the lock hold time to a push or a clone.

use crate::frame::AudioFrame;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Bounded FIFO of the most recent system-audio frames. Pushing beyond
/// capacity evicts the oldest entry; reads always see the newest.
pub struct EchoReferenceBuffer {
    frames: VecDeque<AudioFrame>,
    capacity: usize,
}

impl EchoReferenceBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "echo reference capacity must be positive");
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: AudioFrame) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn latest(&self) -> Option<&AudioFrame> {
        self.frames.back()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

/// Cloneable handle sharing one ring buffer between the system-audio
/// writer and the microphone reader.
#[derive(Clone)]
pub struct SharedEchoRef(Arc<Mutex<EchoReferenceBuffer>>);

impl SharedEchoRef {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(EchoReferenceBuffer::new(capacity))))
    }

    pub fn push(&self, frame: AudioFrame) {
        if let Ok(mut buffer) = self.0.lock() {
            buffer.push(frame);
        }
    }

    /// Clone of the newest frame, if any.
    pub fn latest(&self) -> Option<AudioFrame> {
        match self.0.lock() {
            Ok(buffer) => buffer.latest().cloned(),
            Err(_) => None,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut buffer) = self.0.lock() {
            buffer.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|buffer| buffer.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
