//! Random unaligned offset generation

use super::OffsetGenerator;
use crate::error::ConfigError;
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Draws offsets uniformly from `[start, start + len - block_size]`. The
/// amount of data is bounded by the configured random amount divided by the
/// number of dataset threads, not by the range length.
#[derive(Debug)]
pub struct OffsetGenRandom {
    rng: Xoshiro256PlusPlus,
    range_start: u64,
    range_end: u64, // inclusive
    bytes_total: u64,
    bytes_left: u64,
    block_size: usize,
}

impl OffsetGenRandom {
    pub fn new(
        bytes_total: u64,
        rng: Xoshiro256PlusPlus,
        len: u64,
        offset: u64,
        block_size: usize,
    ) -> Result<Self, ConfigError> {
        if len < block_size as u64 {
            return Err(ConfigError::new(format!(
                "range too small for random offsets. Range length: {len}; Block size: {block_size}"
            )));
        }

        if bytes_total == 0 && len > 0 {
            return Err(ConfigError::new(
                "random amount per thread is zero. \
                 Hint: random amount is divided by the number of dataset threads",
            ));
        }

        Ok(Self {
            rng,
            range_start: offset,
            range_end: offset + len - block_size as u64,
            bytes_total,
            bytes_left: bytes_total,
            block_size,
        })
    }
}

impl OffsetGenerator for OffsetGenRandom {
    fn reset(&mut self) {
        self.bytes_left = self.bytes_total;
    }

    fn reset_range(&mut self, len: u64, offset: u64) {
        self.bytes_total = len;
        self.bytes_left = len;

        self.range_start = offset;
        self.range_end = offset + len.saturating_sub(self.block_size as u64);
    }

    fn next_offset(&mut self) -> u64 {
        self.rng.gen_range(self.range_start..=self.range_end)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn next_submit_size(&self) -> usize {
        self.bytes_left.min(self.block_size as u64) as usize
    }

    fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    fn bytes_left_to_submit(&self) -> u64 {
        self.bytes_left
    }

    fn add_bytes_submitted(&mut self, num_bytes: usize) {
        self.bytes_left -= num_bytes as u64;
    }
}
