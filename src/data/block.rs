//! Channel-major sample block exchanged between a data source and the buffer.

/// `channels × len` samples, one vector per channel.
///
/// Reused across reads: [`SampleBlock::reset`] keeps the allocations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBlock {
    channels: Vec<Vec<f64>>,
}

impl SampleBlock {
    /// Empty block for `n_channels` channels.
    pub fn new(n_channels: usize) -> Self {
        Self {
            channels: vec![Vec::new(); n_channels],
        }
    }

    /// Build from per-channel vectors.
    pub fn from_channels(channels: Vec<Vec<f64>>) -> Self {
        Self { channels }
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel. Channels of unequal length report the shortest.
    pub fn len(&self) -> usize {
        self.channels.iter().map(Vec::len).min().unwrap_or(0)
    }

    /// True when no channel holds a sample.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every channel holds the same number of samples.
    pub fn is_rectangular(&self) -> bool {
        self.channels
            .windows(2)
            .all(|pair| pair[0].len() == pair[1].len())
    }

    /// Zero-fill every channel to `len` samples.
    pub fn reset(&mut self, len: usize) {
        for ch in &mut self.channels {
            ch.clear();
            ch.resize(len, 0.0);
        }
    }

    /// Drop samples beyond `len` in every channel.
    pub fn truncate(&mut self, len: usize) {
        for ch in &mut self.channels {
            ch.truncate(len);
        }
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> &[f64] {
        self.channels.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mutable samples of one channel.
    pub fn channel_mut(&mut self, index: usize) -> Option<&mut Vec<f64>> {
        self.channels.get_mut(index)
    }

    /// All channels.
    pub fn channels(&self) -> &[Vec<f64>] {
        &self.channels
    }

    /// All channels, mutably.
    pub fn channels_mut(&mut self) -> &mut [Vec<f64>] {
        &mut self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_and_truncate() {
        let mut block = SampleBlock::new(2);
        assert!(block.is_empty());
        block.reset(4);
        assert_eq!(block.len(), 4);
        block.truncate(3);
        assert_eq!(block.channel(1), &[0.0, 0.0, 0.0]);
        assert!(block.is_rectangular());
        assert_eq!(block.channel(7), &[] as &[f64]);
    }

    #[test]
    fn ragged_blocks_are_detected() {
        let block = SampleBlock::from_channels(vec![vec![1.0, 2.0], vec![1.0]]);
        assert!(!block.is_rectangular());
        assert_eq!(block.len(), 1);
    }
}
