//! iosurge - distributed storage benchmark
//!
//! iosurge drives configurable workloads against POSIX file systems, large
//! shared files, and block devices, and measures throughput, IOPS, and
//! per-operation latency. Work is spread across threads on one host and,
//! optionally, across many hosts driven by a single master process talking
//! to service processes over a small HTTP/JSON protocol.
//!
//! # Architecture
//!
//! - **Workload engine**: per-thread phase loop with sync and io_uring inner
//!   loops, offset generators, and optional data-integrity checking
//! - **Phase coordination**: mutex/condvar shared state with stonewall
//!   ("first finisher") statistics
//! - **Remote control**: thin HTTP clients driving service processes that run
//!   the same workload engine locally

pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod generator;
pub mod limiter;
pub mod phase;
pub mod service;
pub mod stats;
pub mod verify;
pub mod worker;

pub use config::BenchConfig;
pub use phase::BenchPhase;

/// Result type used at binary boundaries.
pub type Result<T> = anyhow::Result<T>;
