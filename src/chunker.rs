//! Fixed-size chunk accumulation.
//!
//! OS audio callbacks deliver buffers of whatever size the driver feels
//! like; downstream stages require exactly `samples_per_chunk` samples.

/// Accumulates arbitrarily sized sample batches and emits fixed-size
/// chunks. One chunker per audio source; the remainder carries over
/// between pushes so no sample is ever dropped or padded.
pub struct FrameChunker {
    samples_per_chunk: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(samples_per_chunk: usize) -> Self {
        assert!(samples_per_chunk > 0, "chunk size must be positive");
        Self {
            samples_per_chunk,
            pending: Vec::with_capacity(samples_per_chunk * 2),
        }
    }

    /// Append samples and return every complete chunk now available.
    ///
    /// Chunk boundaries depend only on the total number of samples pushed
    /// so far, not on how the pushes were batched.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let full = self.pending.len() / self.samples_per_chunk;
        let mut chunks = Vec::with_capacity(full);
        for _ in 0..full {
            let rest = self.pending.split_off(self.samples_per_chunk);
            chunks.push(std::mem::replace(&mut self.pending, rest));
        }
        chunks
    }

    /// Samples currently buffered awaiting a full chunk.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
