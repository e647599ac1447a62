//! Live operation counters
//!
//! Each worker exposes a triple of atomic 64-bit counters (entries done,
//! bytes done, I/O ops done) that live-stats readers and the phase
//! aggregation sum across workers without taking any lock. A second triple
//! exists for the reads issued inside a write phase when an rw-mix
//! percentage is configured.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicU64, Ordering};

/// Plain (non-atomic) counter triple, used for snapshots and aggregation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveOps {
    /// Number of dirs/files done.
    pub entries_done: u64,
    /// Number of bytes written/read.
    pub bytes_done: u64,
    /// Number of write/read ops done.
    pub iops_done: u64,
}

impl LiveOps {
    pub fn is_zero(&self) -> bool {
        self.entries_done == 0 && self.bytes_done == 0 && self.iops_done == 0
    }

    /// Per-second values for a given elapsed time.
    pub fn per_sec_from_usec(&self, elapsed_usec: u64) -> LiveOps {
        if elapsed_usec == 0 {
            return LiveOps::default();
        }

        let scale = |v: u64| ((v as u128 * 1_000_000) / elapsed_usec as u128) as u64;

        LiveOps {
            entries_done: scale(self.entries_done),
            bytes_done: scale(self.bytes_done),
            iops_done: scale(self.iops_done),
        }
    }
}

impl Add for LiveOps {
    type Output = LiveOps;

    fn add(self, rhs: LiveOps) -> LiveOps {
        LiveOps {
            entries_done: self.entries_done + rhs.entries_done,
            bytes_done: self.bytes_done + rhs.bytes_done,
            iops_done: self.iops_done + rhs.iops_done,
        }
    }
}

impl AddAssign for LiveOps {
    fn add_assign(&mut self, rhs: LiveOps) {
        self.entries_done += rhs.entries_done;
        self.bytes_done += rhs.bytes_done;
        self.iops_done += rhs.iops_done;
    }
}

impl Sub for LiveOps {
    type Output = LiveOps;

    fn sub(self, rhs: LiveOps) -> LiveOps {
        LiveOps {
            entries_done: self.entries_done - rhs.entries_done,
            bytes_done: self.bytes_done - rhs.bytes_done,
            iops_done: self.iops_done - rhs.iops_done,
        }
    }
}

/// Atomic counter triple. Written by the owning worker in its hot loop,
/// read concurrently by live stats and the stonewall snapshot.
#[derive(Debug, Default)]
pub struct AtomicLiveOps {
    entries_done: AtomicU64,
    bytes_done: AtomicU64,
    iops_done: AtomicU64,
}

impl AtomicLiveOps {
    #[inline]
    pub fn add_entries(&self, n: u64) {
        self.entries_done.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_iops(&self) {
        self.iops_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_to_zero(&self) {
        self.entries_done.store(0, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
        self.iops_done.store(0, Ordering::Relaxed);
    }

    /// Overwrite with the given values. Remote workers use this to mirror
    /// the counters reported by their service host.
    pub fn store(&self, ops: LiveOps) {
        self.entries_done.store(ops.entries_done, Ordering::Relaxed);
        self.bytes_done.store(ops.bytes_done, Ordering::Relaxed);
        self.iops_done.store(ops.iops_done, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LiveOps {
        LiveOps {
            entries_done: self.entries_done.load(Ordering::Relaxed),
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            iops_done: self.iops_done.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_sub() {
        let a = LiveOps { entries_done: 2, bytes_done: 100, iops_done: 10 };
        let b = LiveOps { entries_done: 1, bytes_done: 50, iops_done: 5 };

        assert_eq!(a + b, LiveOps { entries_done: 3, bytes_done: 150, iops_done: 15 });
        assert_eq!(a - b, b);
    }

    #[test]
    fn test_per_sec() {
        let ops = LiveOps { entries_done: 10, bytes_done: 1_000_000, iops_done: 100 };

        // half a second elapsed => rates double
        let per_sec = ops.per_sec_from_usec(500_000);
        assert_eq!(per_sec.entries_done, 20);
        assert_eq!(per_sec.bytes_done, 2_000_000);
        assert_eq!(per_sec.iops_done, 200);

        assert_eq!(ops.per_sec_from_usec(0), LiveOps::default());
    }

    #[test]
    fn test_atomic_snapshot_matches_increments() {
        let atomic = AtomicLiveOps::default();

        atomic.add_entries(1);
        atomic.add_bytes(4096);
        atomic.inc_iops();
        atomic.inc_iops();

        let snap = atomic.snapshot();
        assert_eq!(snap.entries_done, 1);
        assert_eq!(snap.bytes_done, 4096);
        assert_eq!(snap.iops_done, 2);

        atomic.set_to_zero();
        assert!(atomic.snapshot().is_zero());
    }

    #[test]
    fn test_atomic_store_overwrites() {
        let atomic = AtomicLiveOps::default();
        atomic.add_bytes(1);

        let reported = LiveOps { entries_done: 7, bytes_done: 70, iops_done: 700 };
        atomic.store(reported);
        assert_eq!(atomic.snapshot(), reported);
    }
}
