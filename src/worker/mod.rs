//! Workers
//!
//! A worker is a single unit of phase work. `LocalWorker` is a thread
//! performing I/O on this host; `RemoteWorker` is a thread acting as HTTP
//! client to one service host, mirroring the service's progress into the
//! same per-worker state a local worker would fill.
//!
//! `WorkerHandle` is the part of a worker that outlives the phase and is
//! shared with the manager: atomic live counters, the stonewall snapshot,
//! the interrupt flag, and the published phase results. The worker thread
//! owns everything else (buffers, offset generators, histograms) privately
//! and publishes into the handle when it finishes a phase.

pub mod coordination;
pub mod local;
pub mod manager;
pub mod remote;

pub use coordination::PhaseCoordination;
pub use local::LocalWorker;
pub use manager::WorkerManager;
pub use remote::RemoteWorker;

use crate::config::BenchPathType;
use crate::error::{WorkerError, WorkerResult};
use crate::stats::{AtomicLiveOps, LatencyHistogram, LiveOps};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Non-atomic copy of a worker's live counters taken when the first worker
/// finishes the phase. Set once per phase, reset between phases.
#[derive(Debug, Default, Clone, Copy)]
pub struct StonewallSnapshot {
    pub ops: LiveOps,
    pub rwmix_read_ops: LiveOps,
}

/// Per-worker results published at phase completion.
#[derive(Debug, Default, Clone)]
pub struct WorkerPhaseResults {
    /// One entry for a local worker; one entry per service-side thread for
    /// a remote worker, so the master can report fastest and slowest.
    pub elapsed_usec: Vec<u64>,
    pub iops_latency: LatencyHistogram,
    pub entries_latency: LatencyHistogram,
    /// CPU utilization reported by the service host (remote workers only;
    /// local mode reads the coordination's own snapshots instead).
    pub cpu_util_stonewall_percent: u32,
    pub cpu_util_last_percent: u32,
}

/// Shared per-worker state: owned by the manager, referenced by the worker
/// thread, live-stats readers, and the stonewall trigger.
#[derive(Debug)]
pub struct WorkerHandle {
    rank: usize,
    pub live_ops: AtomicLiveOps,
    /// Read ops done inside a write phase with an rw-mix percentage.
    pub live_rwmix_read_ops: AtomicLiveOps,
    interrupt_requested: AtomicBool,
    /// True from phase finish until the next stats reset; prevents a
    /// double done-increment when the wait for the next phase is
    /// interrupted during the end game of the previous one.
    phase_finished: AtomicBool,
    stonewall_triggered: AtomicBool,
    got_phase_work: AtomicBool,
    stonewall: Mutex<StonewallSnapshot>,
    results: Mutex<WorkerPhaseResults>,
    /// Path type reported by the service host (remote workers only).
    remote_path_type: Mutex<Option<BenchPathType>>,
}

impl WorkerHandle {
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            live_ops: AtomicLiveOps::default(),
            live_rwmix_read_ops: AtomicLiveOps::default(),
            interrupt_requested: AtomicBool::new(false),
            phase_finished: AtomicBool::new(false),
            stonewall_triggered: AtomicBool::new(false),
            got_phase_work: AtomicBool::new(false),
            stonewall: Mutex::new(StonewallSnapshot::default()),
            results: Mutex::new(WorkerPhaseResults::default()),
            remote_path_type: Mutex::new(None),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Friendly ask for the worker to terminate itself. Workers check this
    /// in regular intervals.
    pub fn interrupt(&self) {
        self.interrupt_requested.store(true, Ordering::Relaxed);
    }

    pub fn is_interrupt_requested(&self) -> bool {
        self.interrupt_requested.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn check_interrupt(&self) -> WorkerResult<()> {
        if self.is_interrupt_requested() {
            return Err(WorkerError::Interrupted);
        }
        Ok(())
    }

    pub fn set_phase_finished(&self) {
        self.phase_finished.store(true, Ordering::Relaxed);
    }

    pub fn phase_finished(&self) -> bool {
        self.phase_finished.load(Ordering::Relaxed)
    }

    /// Flag that this worker actually performed work in the current phase,
    /// making it eligible to trigger the stonewall when it finishes first.
    pub fn mark_got_phase_work(&self) {
        self.got_phase_work.store(true, Ordering::Relaxed);
    }

    pub fn got_phase_work(&self) -> bool {
        self.got_phase_work.load(Ordering::Relaxed)
    }

    pub fn stonewall_triggered(&self) -> bool {
        self.stonewall_triggered.load(Ordering::Relaxed)
    }

    /// Copy the current live counters into the stonewall snapshot. Called
    /// for every worker the moment the first finisher completes.
    pub fn create_stonewall_stats(&self) {
        self.stonewall_triggered.store(true, Ordering::Relaxed);

        *self.stonewall.lock() = StonewallSnapshot {
            ops: self.live_ops.snapshot(),
            rwmix_read_ops: self.live_rwmix_read_ops.snapshot(),
        };
    }

    pub fn stonewall_snapshot(&self) -> StonewallSnapshot {
        *self.stonewall.lock()
    }

    /// Store the phase results. Called once by the worker when it finishes
    /// a phase (local), or when the final service results arrive (remote).
    pub fn publish_results(&self, results: WorkerPhaseResults) {
        *self.results.lock() = results;
    }

    pub fn results(&self) -> WorkerPhaseResults {
        self.results.lock().clone()
    }

    pub fn set_remote_path_type(&self, path_type: BenchPathType) {
        *self.remote_path_type.lock() = Some(path_type);
    }

    pub fn remote_path_type(&self) -> Option<BenchPathType> {
        *self.remote_path_type.lock()
    }

    /// Reset all per-phase statistics. Only the manager calls this, under
    /// the phase-coordination lock, between phases.
    pub fn reset_stats(&self) {
        self.phase_finished.store(false, Ordering::Relaxed);
        self.got_phase_work.store(false, Ordering::Relaxed);
        self.stonewall_triggered.store(false, Ordering::Relaxed);
        self.live_ops.set_to_zero();
        self.live_rwmix_read_ops.set_to_zero();
        *self.stonewall.lock() = StonewallSnapshot::default();
        *self.results.lock() = WorkerPhaseResults::default();
    }
}
