//! Fixed-capacity multi-channel window over the most recent samples.
//!
//! The observable behaviour is "shift left by `k`, append the new `k`
//! samples on the right": after any sequence of folds the window holds the
//! last `capacity` samples of every channel in chronological order, with the
//! matching timestamps `(sample_index) / sample_rate`. Before warm-up the
//! leading slots keep their zero fill.
//!
//! Internally the window is a ring with a write cursor, so a fold costs
//! `O(channels × k)` instead of `O(channels × capacity)`. The ring is
//! linearized only when a [`WindowSnapshot`] is taken.

use crate::data::block::SampleBlock;
use crate::error::{AppResult, DaqError};

/// Immutable copy of the window handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    /// Monotonic publish counter, starting at 1 for each run
    pub sequence: u64,
    /// Samples per channel folded since the run started
    pub total_samples: u64,
    /// Chronological timestamps in seconds, `capacity` long
    pub timestamps: Vec<f64>,
    /// Per-channel samples aligned with `timestamps`
    pub samples: Vec<Vec<f64>>,
}

impl WindowSnapshot {
    /// Timestamp of the newest sample.
    pub fn latest_time(&self) -> Option<f64> {
        self.timestamps.last().copied()
    }

    /// Newest sample of each channel.
    pub fn latest_values(&self) -> Vec<f64> {
        self.samples
            .iter()
            .map(|ch| ch.last().copied().unwrap_or(0.0))
            .collect()
    }
}

/// Sliding window of `capacity` samples per channel.
#[derive(Debug, Clone)]
pub struct SlidingBuffer {
    sample_rate: f64,
    capacity: usize,
    /// Next slot to overwrite; also the oldest slot.
    head: usize,
    timestamps: Vec<f64>,
    samples: Vec<Vec<f64>>,
    total_samples: u64,
}

impl SlidingBuffer {
    /// Zero-filled window.
    pub fn new(n_channels: usize, capacity: usize, sample_rate: f64) -> AppResult<Self> {
        if n_channels == 0 {
            return Err(DaqError::Configuration(
                "Sliding buffer needs at least one channel".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(DaqError::Configuration(
                "Sliding buffer capacity must be non-zero".to_string(),
            ));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid sample rate {sample_rate}"
            )));
        }

        Ok(Self {
            sample_rate,
            capacity,
            head: 0,
            timestamps: vec![0.0; capacity],
            samples: vec![vec![0.0; capacity]; n_channels],
            total_samples: 0,
        })
    }

    /// Window length in samples per channel.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.samples.len()
    }

    /// Samples per channel folded since the last reset.
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Zero every slot and forget the sample count.
    pub fn reset(&mut self) {
        self.head = 0;
        self.total_samples = 0;
        self.timestamps.fill(0.0);
        for ch in &mut self.samples {
            ch.fill(0.0);
        }
    }

    /// Append `block` (channels × k) whose first sample has absolute index
    /// `elapsed_index`. Only the trailing `capacity` samples of an oversized
    /// block survive. A zero-length block changes nothing.
    pub fn fold(&mut self, block: &SampleBlock, elapsed_index: u64) -> AppResult<()> {
        if block.n_channels() != self.samples.len() {
            return Err(DaqError::Processing(format!(
                "Block has {} channels, buffer has {}",
                block.n_channels(),
                self.samples.len()
            )));
        }
        if !block.is_rectangular() {
            return Err(DaqError::Processing(
                "Block channels have unequal lengths".to_string(),
            ));
        }

        let k = block.len();
        if k == 0 {
            return Ok(());
        }

        let skip = k.saturating_sub(self.capacity);
        let kept = k - skip;
        // Overwriting the whole ring starts over at slot 0.
        let start = if kept == self.capacity { 0 } else { self.head };

        for i in 0..kept {
            let slot = (start + i) % self.capacity;
            let index = elapsed_index + (skip + i) as u64;
            self.timestamps[slot] = index as f64 / self.sample_rate;
        }
        for (dst, src) in self.samples.iter_mut().zip(block.channels()) {
            for (i, &value) in src[skip..].iter().enumerate() {
                dst[(start + i) % self.capacity] = value;
            }
        }

        self.head = (start + kept) % self.capacity;
        self.total_samples += k as u64;
        Ok(())
    }

    /// Chronological copy of the window.
    pub fn snapshot(&self, sequence: u64) -> WindowSnapshot {
        WindowSnapshot {
            sequence,
            total_samples: self.total_samples,
            timestamps: self.linearize(&self.timestamps),
            samples: self.samples.iter().map(|ch| self.linearize(ch)).collect(),
        }
    }

    fn linearize(&self, ring: &[f64]) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.capacity);
        out.extend_from_slice(&ring[self.head..]);
        out.extend_from_slice(&ring[..self.head]);
        out
    }
}
