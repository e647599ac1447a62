//! Offset generation for file read/write loops
//!
//! A generator produces the finite sequence of (offset, submit size) pairs
//! for one file range. Three variants exist: sequential, random unaligned,
//! and random block-aligned. The inner I/O loops only ever talk to the
//! trait: ask for the next offset and submit size, then report how many
//! bytes were actually submitted.
//!
//! For the random variants the range given at construction defines where
//! offsets are drawn from, while the amount of data comes from the
//! configured random amount divided by the number of dataset threads.

pub mod random;
pub mod random_aligned;
pub mod reverse_seq;
pub mod sequential;

pub use random::OffsetGenRandom;
pub use random_aligned::OffsetGenRandomAligned;
pub use reverse_seq::OffsetGenReverseSeq;
pub use sequential::OffsetGenSequential;

/// Stateful producer of (offset, submit size) pairs for one file range.
///
/// Invariant: after `add_bytes_submitted(n)`, `bytes_left_to_submit()` has
/// decreased by exactly n; the generator is exhausted when it reaches 0.
pub trait OffsetGenerator: Send {
    /// Reset for reuse with the next file of the same geometry.
    fn reset(&mut self);

    /// Re-scope to a new range. For random generators the amount is set to
    /// the range length.
    fn reset_range(&mut self, len: u64, offset: u64);

    fn next_offset(&mut self) -> u64;

    fn block_size(&self) -> usize;

    /// Size of the next submission: the block size, or the remaining bytes
    /// when the final block is partial.
    fn next_submit_size(&self) -> usize;

    fn bytes_total(&self) -> u64;

    fn bytes_left_to_submit(&self) -> u64;

    fn add_bytes_submitted(&mut self, num_bytes: usize);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn rng() -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(42)
    }

    /// Drain a generator the way the sync inner loop does and return the
    /// emitted (offset, size) pairs.
    fn drain(generator: &mut dyn OffsetGenerator) -> Vec<(u64, usize)> {
        let mut pairs = Vec::new();

        while generator.bytes_left_to_submit() > 0 {
            let offset = generator.next_offset();
            let size = generator.next_submit_size();
            generator.add_bytes_submitted(size);
            pairs.push((offset, size));
        }

        pairs
    }

    #[test]
    fn test_sequential_emits_arithmetic_sequence() {
        // ceil(len/block) blocks; offsets start, start+block, ...
        let mut generator = OffsetGenSequential::new(1000, 50, 256);
        let pairs = drain(&mut generator);

        assert_eq!(pairs.len(), 4); // ceil(1000/256)
        assert_eq!(
            pairs.iter().map(|p| p.0).collect::<Vec<_>>(),
            vec![50, 306, 562, 818]
        );
        // last block is the remainder
        assert_eq!(pairs.last().unwrap().1, 1000 % 256);
        assert_eq!(pairs.iter().map(|p| p.1 as u64).sum::<u64>(), 1000);
    }

    #[test]
    fn test_sequential_exact_multiple_has_no_partial_block() {
        let mut generator = OffsetGenSequential::new(1024, 0, 256);
        let pairs = drain(&mut generator);

        assert_eq!(pairs.len(), 4);
        assert!(pairs.iter().all(|p| p.1 == 256));
    }

    #[test]
    fn test_sequential_reset() {
        let mut generator = OffsetGenSequential::new(512, 100, 256);
        drain(&mut generator);
        assert_eq!(generator.bytes_left_to_submit(), 0);

        generator.reset();
        assert_eq!(generator.bytes_left_to_submit(), 512);
        assert_eq!(generator.next_offset(), 100);
    }

    #[test]
    fn test_sequential_reset_range() {
        let mut generator = OffsetGenSequential::new(512, 0, 128);
        generator.reset_range(256, 4096);

        assert_eq!(generator.bytes_total(), 256);
        assert_eq!(generator.next_offset(), 4096);
    }

    #[test]
    fn test_reverse_seq_walks_backwards() {
        let mut generator = OffsetGenReverseSeq::new(1024, 0, 256);
        let pairs = drain(&mut generator);

        assert_eq!(
            pairs.iter().map(|p| p.0).collect::<Vec<_>>(),
            vec![768, 512, 256, 0]
        );
        assert!(pairs.iter().all(|p| p.1 == 256));
    }

    #[test]
    fn test_reverse_seq_partial_tail_first() {
        // 1000 bytes in 256-byte blocks: the short tail block comes first
        let mut generator = OffsetGenReverseSeq::new(1000, 0, 256);
        let pairs = drain(&mut generator);

        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0], (768, 1000 % 256));
        assert_eq!(pairs[1], (512, 256));
        assert_eq!(pairs.last().unwrap(), &(0, 256));
        assert_eq!(pairs.iter().map(|p| p.1 as u64).sum::<u64>(), 1000);
    }

    #[test]
    fn test_reverse_seq_reset() {
        let mut generator = OffsetGenReverseSeq::new(512, 100, 256);
        drain(&mut generator);

        generator.reset();
        assert_eq!(generator.bytes_left_to_submit(), 512);
        assert_eq!(generator.next_offset(), 100 + 256);
    }

    #[test]
    fn test_random_offsets_within_range() {
        let len = 1 << 20;
        let block = 4096;
        let mut generator = OffsetGenRandom::new(64 * 1024, rng(), len, 0, block).unwrap();

        let pairs = drain(&mut generator);
        assert_eq!(pairs.iter().map(|p| p.1 as u64).sum::<u64>(), 64 * 1024);

        for (offset, _) in pairs {
            assert!(offset <= len - block as u64);
        }
    }

    #[test]
    fn test_random_rejects_len_smaller_than_block() {
        let result = OffsetGenRandom::new(4096, rng(), 100, 0, 4096);
        assert!(matches!(result, Err(ConfigError(_))));
    }

    #[test]
    fn test_random_rejects_zero_amount() {
        let result = OffsetGenRandom::new(0, rng(), 1 << 20, 0, 4096);
        assert!(result.is_err());
    }

    #[test]
    fn test_random_aligned_offsets_are_block_multiples() {
        let len = 1 << 30;
        let block = 4096usize;
        let amount = 64 << 20;
        let mut generator =
            OffsetGenRandomAligned::new(amount, rng(), len, 0, block).unwrap();

        let pairs = drain(&mut generator);

        // no partial blocks, total truncated to a block multiple
        let total: u64 = pairs.iter().map(|p| p.1 as u64).sum();
        assert_eq!(total, amount - (amount % block as u64));
        assert!(pairs.iter().all(|p| p.1 == block));

        for (offset, _) in &pairs {
            assert_eq!(offset % block as u64, 0);
            assert!(*offset <= len - block as u64);
        }
    }

    #[test]
    fn test_random_aligned_truncates_total_to_block_multiple() {
        let generator =
            OffsetGenRandomAligned::new(10_000, rng(), 1 << 20, 0, 4096).unwrap();
        assert_eq!(generator.bytes_total(), 8192);
    }

    #[test]
    fn test_random_aligned_respects_start_offset() {
        let start = 1 << 20;
        let mut generator =
            OffsetGenRandomAligned::new(32 * 4096, rng(), 1 << 20, start, 4096).unwrap();

        for (offset, _) in drain(&mut generator) {
            assert!(offset >= start);
            assert_eq!((offset - start) % 4096, 0);
        }
    }

    #[test]
    fn test_bytes_left_decreases_by_submitted() {
        let mut generator = OffsetGenSequential::new(1 << 20, 0, 128 << 10);

        let before = generator.bytes_left_to_submit();
        generator.add_bytes_submitted(1234);
        assert_eq!(generator.bytes_left_to_submit(), before - 1234);
    }
}
