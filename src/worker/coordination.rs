//! Shared phase coordination
//!
//! One `PhaseCoordination` exists per worker-manager instance. It holds the
//! mutex/condvar-protected phase state (current phase, bench ID, done
//! counts, first/last-finisher CPU snapshots) and the flags that are read
//! without the lock (phase time expired, user interrupt).
//!
//! The pair (phase, bench ID) is advanced only by the manager under the
//! lock; workers detect a phase change by observing a bench ID different
//! from the one they last saw.

use super::WorkerHandle;
use crate::error::{WorkerError, WorkerResult};
use crate::phase::BenchPhase;
use crate::stats::{CpuUtil, LiveOps};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How often the manager's wait wakes up to check the time limit and the
/// user-interrupt flag.
const MANAGER_WAIT_INTERVAL: Duration = Duration::from_millis(500);

/// Mutable phase state, protected by the coordination mutex.
#[derive(Debug)]
pub struct PhaseState {
    pub phase: BenchPhase,
    /// Changed together with the phase; a new ID tells workers to start.
    pub bench_id: Uuid,
    /// Workers that finished the current phase successfully.
    pub num_done: usize,
    /// Workers that failed the current phase.
    pub num_done_with_error: usize,
    /// First update at phase start, second by the first finisher.
    pub cpu_util_first_done: CpuUtil,
    /// First update at phase start, second by the last finisher.
    pub cpu_util_last_done: CpuUtil,
    /// Live CPU sampling for status responses.
    pub cpu_util_live: CpuUtil,
    pub phase_start: Instant,
}

/// Common data for all workers of one manager.
pub struct PhaseCoordination {
    state: Mutex<PhaseState>,
    cond: Condvar,
    workers: Vec<Arc<WorkerHandle>>,
    run_as_service: bool,
    time_expired: AtomicBool,
    user_interrupt: Arc<AtomicBool>,
}

impl PhaseCoordination {
    pub fn new(
        workers: Vec<Arc<WorkerHandle>>,
        run_as_service: bool,
        user_interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state: Mutex::new(PhaseState {
                phase: BenchPhase::Idle,
                bench_id: Uuid::nil(),
                num_done: 0,
                num_done_with_error: 0,
                cpu_util_first_done: CpuUtil::default(),
                cpu_util_last_done: CpuUtil::default(),
                cpu_util_live: CpuUtil::default(),
                phase_start: Instant::now(),
            }),
            cond: Condvar::new(),
            workers,
            run_as_service,
            time_expired: AtomicBool::new(false),
            user_interrupt,
        }
    }

    pub fn workers(&self) -> &[Arc<WorkerHandle>] {
        &self.workers
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_time_expired(&self) -> bool {
        self.time_expired.load(Ordering::Relaxed)
    }

    pub fn is_user_interrupted(&self) -> bool {
        self.user_interrupt.load(Ordering::Relaxed)
    }

    /// Set each worker's interrupt flag and wake all waiters. The notify
    /// happens under the state lock so a worker can never slip between its
    /// interrupt check and the condvar wait.
    pub fn interrupt_and_notify_workers(&self) {
        for worker in &self.workers {
            worker.interrupt();
        }

        let _state = self.state.lock();
        self.cond.notify_all();
    }

    /// Reset done counters and per-worker stats, set the new phase and
    /// bench ID (random unless provided), snapshot CPU and start time, and
    /// wake all workers.
    pub fn start_phase(&self, phase: BenchPhase, bench_id: Option<Uuid>) {
        tracing::debug!(phase = phase.name(), "starting benchmark phase");

        let mut state = self.state.lock();

        state.num_done = 0;
        state.num_done_with_error = 0;

        for worker in &self.workers {
            worker.reset_stats();
        }

        state.bench_id = bench_id.unwrap_or_else(Uuid::new_v4);
        state.phase = phase;

        state.cpu_util_first_done.update();
        state.cpu_util_last_done.update();
        state.cpu_util_live.update();
        state.phase_start = Instant::now();

        self.cond.notify_all();
    }

    /// Block until the manager advances to a phase with a bench ID other
    /// than `last_id`. Raises `WorkerError::Interrupted` promptly when the
    /// worker's interrupt flag is set.
    pub fn wait_for_phase_change(
        &self,
        last_id: Uuid,
        worker: &WorkerHandle,
    ) -> WorkerResult<(BenchPhase, Uuid)> {
        let mut state = self.state.lock();

        worker.check_interrupt()?;

        while state.bench_id == last_id {
            self.cond.wait(&mut state);
            worker.check_interrupt()?;
        }

        Ok((state.phase, state.bench_id))
    }

    /// Report a worker done with the current phase. Updates first/last
    /// finisher CPU snapshots and triggers the stonewall snapshots when
    /// this is the first finisher that actually got phase work (or the
    /// last finisher as fallback, never on a service process, where the
    /// master drives the stonewall instead).
    pub fn inc_workers_done(&self, finisher: &WorkerHandle) {
        let mut state = self.state.lock();

        let total = self.workers.len();
        let last_finisher_trigger = !self.run_as_service && (state.num_done + 1 == total);
        let trigger_stonewall =
            !finisher.stonewall_triggered() && (finisher.got_phase_work() || last_finisher_trigger);

        state.num_done += 1;

        if state.num_done == 1 {
            state.cpu_util_first_done.update();
        }
        if state.num_done == total {
            state.cpu_util_last_done.update();
        }

        if trigger_stonewall {
            // the lock guarantees no other worker advances the done
            // counter while the snapshots are taken
            for worker in &self.workers {
                worker.create_stonewall_stats();
            }
        }

        self.cond.notify_all();
    }

    /// Report a worker that finished or cancelled the phase with an error.
    pub fn inc_workers_done_with_error(&self) {
        let mut state = self.state.lock();
        state.num_done_with_error += 1;
        self.cond.notify_all();
    }

    /// Take stonewall snapshots of all workers. The master calls this when
    /// the first service reports any worker done.
    pub fn trigger_stonewall_all(&self) {
        let _state = self.state.lock();

        for worker in &self.workers {
            worker.create_stonewall_stats();
        }
    }

    /// Wait until every worker reported done (with or without error).
    ///
    /// The wait wakes every 500 ms to enforce the time limit and observe
    /// user interrupts. A worker error interrupts the remaining workers
    /// and surfaces immediately as an aggregate failure.
    pub fn wait_for_workers_done(&self, time_limit: Option<Duration>) -> WorkerResult<()> {
        let mut state = self.state.lock();

        loop {
            if state.num_done_with_error > 0 {
                self.interrupt_workers_flags_only();
                return Err(WorkerError::failed("worker encountered error"));
            }

            if self.is_user_interrupted() {
                self.interrupt_workers_flags_only();
            }

            if state.num_done + state.num_done_with_error == self.workers.len() {
                return Ok(());
            }

            if let Some(limit) = time_limit {
                if state.phase_start.elapsed() >= limit {
                    if !self.time_expired.swap(true, Ordering::Relaxed) {
                        tracing::debug!("phase time limit expired, interrupting workers");
                    }
                    self.interrupt_workers_flags_only();
                }
            }

            self.cond.wait_for(&mut state, MANAGER_WAIT_INTERVAL);
        }
    }

    // Flag-setting variant for use while the state lock is already held;
    // waiters re-check the flags on their next timed wake.
    fn interrupt_workers_flags_only(&self) {
        for worker in &self.workers {
            worker.interrupt();
        }

        self.cond.notify_all();
    }

    /// Snapshot for status responses and result building.
    pub fn phase_snapshot(&self) -> PhaseSnapshot {
        let mut state = self.state.lock();

        state.cpu_util_live.update();

        PhaseSnapshot {
            phase: state.phase,
            bench_id: state.bench_id,
            num_done: state.num_done,
            num_done_with_error: state.num_done_with_error,
            cpu_util_live_percent: state.cpu_util_live.percent(),
            cpu_util_first_done_percent: state.cpu_util_first_done.percent(),
            cpu_util_last_done_percent: state.cpu_util_last_done.percent(),
            elapsed: state.phase_start.elapsed(),
        }
    }

    /// Elapsed microseconds since the current phase started.
    pub fn phase_elapsed_usec(&self) -> u64 {
        self.state.lock().phase_start.elapsed().as_micros() as u64
    }

    /// Sum of all workers' live counters.
    pub fn live_ops_sum(&self) -> (LiveOps, LiveOps) {
        let mut ops = LiveOps::default();
        let mut rwmix_read_ops = LiveOps::default();

        for worker in &self.workers {
            ops += worker.live_ops.snapshot();
            rwmix_read_ops += worker.live_rwmix_read_ops.snapshot();
        }

        (ops, rwmix_read_ops)
    }
}

/// Copy of the phase state for readers outside the lock.
#[derive(Debug, Clone)]
pub struct PhaseSnapshot {
    pub phase: BenchPhase,
    pub bench_id: Uuid,
    pub num_done: usize,
    pub num_done_with_error: usize,
    pub cpu_util_live_percent: u32,
    pub cpu_util_first_done_percent: u32,
    pub cpu_util_last_done_percent: u32,
    pub elapsed: Duration,
}
