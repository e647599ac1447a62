//! Benchmark coordinator
//!
//! Top-level sequencer: prepares the worker threads, runs the configured
//! phases in order (create-dirs, write, read, stat, delete-files,
//! delete-dirs), optionally interleaving sync and drop-caches phases
//! between them, aggregates and prints the results, and maps interrupts
//! and worker failures to exit codes.

use crate::config::BenchConfig;
use crate::device::Capabilities;
use crate::error::WorkerError;
use crate::phase::BenchPhase;
use crate::stats;
use crate::worker::WorkerManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Exit code on user interrupt (SIGINT/SIGTERM).
pub const EXIT_CODE_INTERRUPTED: i32 = 3;
/// Exit code on worker failure.
pub const EXIT_CODE_WORKER_FAILED: i32 = 1;

static USER_INTERRUPT: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// The process-wide user-interrupt flag, set by the signal handler.
pub fn user_interrupt_flag() -> Arc<AtomicBool> {
    USER_INTERRUPT
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone()
}

extern "C" fn handle_interrupt_signal(_signal: libc::c_int) {
    if let Some(flag) = USER_INTERRUPT.get() {
        // second signal: the user is serious, stop immediately
        if flag.swap(true, Ordering::Relaxed) {
            unsafe { libc::_exit(EXIT_CODE_INTERRUPTED) };
        }
    }
}

fn register_interrupt_signal_handlers() {
    // initialize the flag before the handler can fire
    let _ = user_interrupt_flag();

    unsafe {
        libc::signal(libc::SIGINT, handle_interrupt_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_interrupt_signal as libc::sighandler_t);
    }
}

pub struct Coordinator {
    config: Arc<BenchConfig>,
    manager: WorkerManager,
}

impl Coordinator {
    pub fn new(config: BenchConfig, capabilities: Capabilities) -> Self {
        let config = Arc::new(config);
        let manager = WorkerManager::new(config.clone(), capabilities, user_interrupt_flag());

        Self { config, manager }
    }

    /// Run the whole benchmark. Returns the process exit code.
    pub fn run(&mut self) -> crate::Result<i32> {
        register_interrupt_signal_handlers();

        if let Err(err) = self.manager.prepare_threads() {
            self.shut_down_workers();
            anyhow::bail!("worker preparation failed: {err}");
        }

        if self.config.is_master() {
            if let Err(err) = self.manager.check_service_path_types() {
                self.shut_down_workers();
                anyhow::bail!("{err}");
            }
        }

        stats::print_results_table_header();

        let mut exit_code = 0;
        let mut first_phase = true;

        for phase in self.config.phase_sequence() {
            if self.check_interrupted_between_phases() {
                exit_code = EXIT_CODE_INTERRUPTED;
                break;
            }

            if self.manager.coordination().is_time_expired() {
                // a time-limited phase ended normally with partial
                // counters; further phases are skipped
                tracing::warn!("phase time limit expired, skipping remaining phases");
                break;
            }

            if !first_phase {
                if let Err(code) = self.run_sync_and_drop_caches() {
                    exit_code = code;
                    break;
                }
            }
            first_phase = false;

            if let Err(code) = self.run_benchmark_phase(phase) {
                exit_code = code;
                break;
            }
        }

        self.shut_down_workers();

        if exit_code == 0 && self.manager.coordination().is_user_interrupted() {
            exit_code = EXIT_CODE_INTERRUPTED;
        }

        Ok(exit_code)
    }

    fn check_interrupted_between_phases(&self) -> bool {
        self.manager.coordination().is_user_interrupted()
    }

    /// Run one benchmark phase to completion and print its results. An
    /// error return carries the process exit code.
    fn run_benchmark_phase(&mut self, phase: BenchPhase) -> Result<(), i32> {
        self.manager.start_next_phase(phase, None);

        match self.manager.wait_for_workers_done() {
            Ok(()) => {}
            Err(WorkerError::Interrupted) => return Err(EXIT_CODE_INTERRUPTED),
            Err(WorkerError::Failed(msg)) => {
                eprintln!("ERROR: {msg}");

                let history = crate::service::error_history::get();
                if !history.is_empty() {
                    eprintln!("{history}");
                }

                self.manager.interrupt_and_notify_workers();
                return Err(EXIT_CODE_WORKER_FAILED);
            }
        }

        let results = self.manager.phase_results();

        // a phase that did work but finished below timer granularity makes
        // per-second numbers meaningless
        if results.first_elapsed_usec == 0
            && !results.total_ops.is_zero()
            && !self.config.ignore_zero_usec_errors
        {
            eprintln!(
                "ERROR: phase {} finished in 0 microseconds; results are not meaningful \
                 (use a larger workload or enable the zero-elapsed tolerance)",
                results.phase.name()
            );
            return Err(EXIT_CODE_WORKER_FAILED);
        }

        stats::print_phase_results(&results);

        Ok(())
    }

    /// The optional sync and drop-caches phases between benchmark phases.
    fn run_sync_and_drop_caches(&mut self) -> Result<(), i32> {
        if self.config.run_sync_phase {
            self.run_utility_phase(BenchPhase::Sync)?;
        }

        if self.config.run_drop_caches {
            self.run_utility_phase(BenchPhase::DropCaches)?;
        }

        Ok(())
    }

    fn run_utility_phase(&mut self, phase: BenchPhase) -> Result<(), i32> {
        self.manager.start_next_phase(phase, None);

        match self.manager.wait_for_workers_done() {
            Ok(()) => Ok(()),
            Err(WorkerError::Interrupted) => Err(EXIT_CODE_INTERRUPTED),
            Err(WorkerError::Failed(msg)) => {
                eprintln!("ERROR: {msg}");
                self.manager.interrupt_and_notify_workers();
                Err(EXIT_CODE_WORKER_FAILED)
            }
        }
    }

    /// Terminate the worker threads and join them. On a clean run the
    /// workers are advanced to the terminate phase; after an interrupt,
    /// time-limit expiry, or worker error, the remaining workers exit on
    /// their interrupt flags instead (some threads are already gone then,
    /// so waiting on a terminate phase could block forever).
    fn shut_down_workers(&mut self) {
        let all_done = self.manager.check_workers_done();
        let snapshot = self.manager.coordination().phase_snapshot();
        let clean = all_done
            && snapshot.num_done_with_error == 0
            && !self.manager.coordination().is_time_expired()
            && !self.manager.coordination().is_user_interrupted();

        if clean {
            self.manager.start_next_phase(BenchPhase::Terminate, None);

            if let Err(err) = self.manager.wait_for_workers_done() {
                tracing::debug!("worker termination reported: {err}");
            }
        } else {
            self.manager.interrupt_and_notify_workers();
        }

        self.manager.join_all_threads();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_full_local_run() {
        let dir = tempfile::tempdir().unwrap();

        let mut config = BenchConfig {
            path: dir.path().display().to_string(),
            threads: 2,
            dirs: 2,
            files: 2,
            size: 32 << 10,
            block: 16 << 10,
            run_create_dirs: true,
            run_create_files: true,
            run_read_files: true,
            run_delete_files: true,
            run_delete_dirs: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut coordinator = Coordinator::new(config, Capabilities::none());
        let exit_code = coordinator.run().unwrap();

        assert_eq!(exit_code, 0);
        // the full cycle leaves the benchmark dir empty again
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_coordinator_propagates_worker_failure() {
        let dir = tempfile::tempdir().unwrap();

        // reading files that were never created must fail the run
        let mut config = BenchConfig {
            path: dir.path().display().to_string(),
            threads: 1,
            dirs: 1,
            files: 1,
            size: 4 << 10,
            block: 4 << 10,
            run_read_files: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut coordinator = Coordinator::new(config, Capabilities::none());
        let exit_code = coordinator.run().unwrap();

        assert_eq!(exit_code, EXIT_CODE_WORKER_FAILED);
    }
}
