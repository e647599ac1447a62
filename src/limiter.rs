//! Per-thread throughput limiting
//!
//! A worker with a read or write limit accounts each submission against a
//! per-second budget and sleeps for the remainder of the second once the
//! next submission would exceed it. The unit is whatever the caller
//! accounts (bytes here).

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimiter {
    limit_per_sec: u64,
    num_done_this_sec: u64,
    second_start: Instant,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limit_per_sec: 0,
            num_done_this_sec: 0,
            second_start: Instant::now(),
        }
    }

    /// Arm the limiter for a new phase.
    pub fn init_start(&mut self, limit_per_sec: u64) {
        self.limit_per_sec = limit_per_sec;
        self.num_done_this_sec = 0;
        self.second_start = Instant::now();
    }

    /// Sleep if the rate limit is exceeded, otherwise return immediately.
    ///
    /// `next_size` is the size of the upcoming submission in the rate
    /// limited unit.
    pub fn wait(&mut self, next_size: usize) {
        let elapsed = self.second_start.elapsed();

        if elapsed >= Duration::from_secs(1) {
            // a second elapsed without exceeding the limit: fresh budget
            self.num_done_this_sec = next_size as u64;
            self.second_start = Instant::now();
            return;
        }

        if self.num_done_this_sec + next_size as u64 > self.limit_per_sec {
            // the next op would exceed the limit: wait out the second
            std::thread::sleep(Duration::from_secs(1) - elapsed);

            self.num_done_this_sec = next_size as u64;
            self.second_start = Instant::now();
            return;
        }

        self.num_done_this_sec += next_size as u64;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_budget_does_not_sleep() {
        let mut limiter = RateLimiter::new();
        limiter.init_start(1_000_000);

        let start = Instant::now();
        for _ in 0..10 {
            limiter.wait(1000);
        }

        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_exceeding_budget_sleeps_to_second_boundary() {
        let mut limiter = RateLimiter::new();
        limiter.init_start(4096);

        let start = Instant::now();
        limiter.wait(4096); // uses the whole budget
        limiter.wait(4096); // must wait for the next second

        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn test_budget_resets_after_a_second() {
        let mut limiter = RateLimiter::new();
        limiter.init_start(4096);

        limiter.wait(2048);
        std::thread::sleep(Duration::from_millis(1100));

        // new second: full budget again, no sleep
        let start = Instant::now();
        limiter.wait(4096);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
