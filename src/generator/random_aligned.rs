//! Random block-aligned offset generation

use super::OffsetGenerator;
use crate::error::ConfigError;
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;

/// Draws a block index from `[0, (len - block_size) / block_size]` and
/// scales by the block size, so every offset is block-aligned. The total
/// amount is truncated to a multiple of the block size at construction, so
/// partial blocks are never submitted.
#[derive(Debug)]
pub struct OffsetGenRandomAligned {
    rng: Xoshiro256PlusPlus,
    max_block_index: u64, // inclusive
    start_offset: u64,
    bytes_total: u64,
    bytes_left: u64,
    block_size: usize,
}

impl OffsetGenRandomAligned {
    pub fn new(
        bytes_total: u64,
        rng: Xoshiro256PlusPlus,
        len: u64,
        offset: u64,
        block_size: usize,
    ) -> Result<Self, ConfigError> {
        if len < block_size as u64 {
            return Err(ConfigError::new(format!(
                "range too small for aligned random offsets. \
                 Range length: {len}; Block size: {block_size}"
            )));
        }

        if bytes_total == 0 && len > 0 {
            return Err(ConfigError::new(
                "random amount per thread is zero. \
                 Hint: random amount is divided by the number of dataset threads",
            ));
        }

        // never submit a partial block
        let truncated_total = bytes_total - (bytes_total % block_size as u64);

        Ok(Self {
            rng,
            max_block_index: (len - block_size as u64) / block_size as u64,
            start_offset: offset,
            bytes_total: truncated_total,
            bytes_left: truncated_total,
            block_size,
        })
    }
}

impl OffsetGenerator for OffsetGenRandomAligned {
    fn reset(&mut self) {
        self.bytes_left = self.bytes_total;
    }

    fn reset_range(&mut self, len: u64, offset: u64) {
        self.bytes_total = len - (len % self.block_size as u64);
        self.bytes_left = self.bytes_total;

        self.start_offset = offset;
        self.max_block_index = len.saturating_sub(self.block_size as u64) / self.block_size as u64;
    }

    fn next_offset(&mut self) -> u64 {
        let block_index = self.rng.gen_range(0..=self.max_block_index);
        self.start_offset + block_index * self.block_size as u64
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
