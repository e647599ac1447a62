//! Reverse sequential offset generation

use super::OffsetGenerator;

/// Emits block-aligned offsets from the end of the range backwards to
/// `start`. When the range length is not a block multiple, the first
/// emitted block is the short tail block.
#[derive(Debug)]
pub struct OffsetGenReverseSeq {
    bytes_total: u64,
    bytes_left: u64,
    start_offset: u64,
    current_offset: u64,
    block_size: usize,
}

impl OffsetGenReverseSeq {
    pub fn new(len: u64, offset: u64, block_size: usize) -> Self {
        let mut generator = Self {
            bytes_total: len,
            bytes_left: len,
            start_offset: offset,
            current_offset: offset,
            block_size,
        };
        generator.reset();
        generator
    }
}

impl OffsetGenerator for OffsetGenReverseSeq {
    fn reset(&mut self) {
        self.bytes_left = self.bytes_total;

        // avoid division by zero for the block size
        if self.bytes_total == 0 {
            self.current_offset = 0;
            return;
        }

        // start at the last block, which may be a partial block
        let last_block_remainder = self.bytes_total % self.block_size as u64;

        self.current_offset = if last_block_remainder != 0 {
            self.start_offset + self.bytes_total - last_block_remainder
        } else {
            self.start_offset + self.bytes_total - self.block_size as u64
        };
    }

    fn reset_range(&mut self, len: u64, offset: u64) {
        self.bytes_total = len;
        self.start_offset = offset;

        self.reset();
    }

    fn next_offset(&mut self) -> u64 {
        self.current_offset
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn next_submit_size(&self) -> usize {
        (self.start_offset + self.bytes_total - self.current_offset)
            .min(self.block_size as u64) as usize
    }

    fn bytes_total(&self) -> u64 {
        self.bytes_total
    }

    fn bytes_left_to_submit(&self) -> u64 {
        self.bytes_left
    }

    fn add_bytes_submitted(&mut self, num_bytes: usize) {
        self.bytes_left -= num_bytes as u64;
        self.current_offset = self.current_offset.saturating_sub(self.block_size as u64);
    }
}
