//! Worker manager
//!
//! Creates and joins worker threads (one `LocalWorker` per thread, or one
//! `RemoteWorker` per host in master mode), broadcasts phase transitions
//! through the shared coordination, enforces the phase time limit, and
//! aggregates per-worker counters and histograms into phase results and
//! protocol responses.

use super::coordination::PhaseCoordination;
use super::local::LocalWorker;
use super::remote::RemoteWorker;
use crate::config::{BenchConfig, BenchPathType};
use crate::device::Capabilities;
use crate::error::{WorkerError, WorkerResult};
use crate::phase::BenchPhase;
use crate::service::protocol::{BenchResultXfer, HistogramXfer, StatusXfer};
use crate::stats::{LatencyHistogram, LiveOps, PhaseResults};
use crate::worker::WorkerHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

pub struct WorkerManager {
    config: Arc<BenchConfig>,
    capabilities: Capabilities,
    coord: Arc<PhaseCoordination>,
    threads: Vec<JoinHandle<()>>,
    /// Path type agreed on by the services (master mode only).
    service_path_type: Option<BenchPathType>,
}

impl WorkerManager {
    pub fn new(
        config: Arc<BenchConfig>,
        capabilities: Capabilities,
        user_interrupt: Arc<AtomicBool>,
    ) -> Self {
        // local/service mode: one worker per thread;
        // master mode: one remote worker per service host
        let num_workers = if config.is_master() {
            config.hosts.len()
        } else {
            config.threads
        };

        let handles: Vec<_> = (0..num_workers)
            .map(|index| Arc::new(WorkerHandle::new(config.rank_offset as usize + index)))
            .collect();

        let coord = Arc::new(PhaseCoordination::new(
            handles,
            config.run_as_service,
            user_interrupt,
        ));

        Self {
            config,
            capabilities,
            coord,
            threads: Vec::new(),
            service_path_type: None,
        }
    }

    pub fn coordination(&self) -> &Arc<PhaseCoordination> {
        &self.coord
    }

    pub fn config(&self) -> &Arc<BenchConfig> {
        &self.config
    }

    /// Start one thread per worker and wait until every worker reported
    /// its preparation done. The phase time limit does not apply to the
    /// preparation phase.
    pub fn prepare_threads(&mut self) -> WorkerResult<()> {
        for (index, handle) in self.coord.workers().iter().enumerate() {
            let handle = handle.clone();
            let coord = self.coord.clone();
            let config = self.config.clone();
            let capabilities = self.capabilities.clone();
            let is_master = self.config.is_master();

            let thread = std::thread::Builder::new()
                .name(format!("worker-{}", handle.rank()))
                .spawn(move || {
                    if is_master {
                        let host = config.hosts[index].clone();
                        let mut worker = RemoteWorker::new(handle, coord, config, host, index);
                        worker.run();
                    } else {
                        match LocalWorker::new(handle, coord.clone(), config, &capabilities) {
                            Ok(mut worker) => worker.run(),
                            Err(err) => {
                                tracing::error!("worker preparation failed: {err}");
                                crate::service::error_history::append(&err.to_string());
                                coord.inc_workers_done_with_error();
                            }
                        }
                    }
                })
                .map_err(|err| {
                    WorkerError::failed(format!("spawning worker thread failed: {err}"))
                })?;

            self.threads.push(thread);
        }

        self.coord.wait_for_workers_done(None)
    }

    /// Flip phase and bench ID under the lock and wake all workers.
    pub fn start_next_phase(&self, phase: BenchPhase, bench_id: Option<Uuid>) {
        self.coord.start_phase(phase, bench_id);
    }

    /// Wait for all workers to finish the current phase, enforcing the
    /// configured time limit.
    pub fn wait_for_workers_done(&self) -> WorkerResult<()> {
        let time_limit =
            (self.config.time_limit_secs > 0).then(|| Duration::from_secs(self.config.time_limit_secs));

        self.coord.wait_for_workers_done(time_limit)
    }

    pub fn interrupt_and_notify_workers(&self) {
        self.coord.interrupt_and_notify_workers();
    }

    /// True when every worker reported done (with or without error).
    pub fn check_workers_done(&self) -> bool {
        let snapshot = self.coord.phase_snapshot();
        snapshot.num_done + snapshot.num_done_with_error == self.coord.num_workers()
    }

    pub fn join_all_threads(&mut self) {
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }

    /// Verify that all services reported the same benchmark path type.
    /// Only valid after `prepare_threads()` in master mode.
    pub fn check_service_path_types(&mut self) -> WorkerResult<BenchPathType> {
        let mut agreed: Option<BenchPathType> = None;

        for (worker, host) in self.coord.workers().iter().zip(&self.config.hosts) {
            let path_type = worker.remote_path_type().ok_or_else(|| {
                WorkerError::failed(format!("service did not report a path type. Server: {host}"))
            })?;

            match agreed {
                None => agreed = Some(path_type),
                Some(previous) if previous != path_type => {
                    return Err(WorkerError::failed(format!(
                        "conflicting benchmark path types across services: \
                         {previous} vs {path_type} (Server: {host})"
                    )));
                }
                Some(_) => {}
            }
        }

        let path_type = agreed
            .ok_or_else(|| WorkerError::failed("no services configured"))?;

        self.service_path_type = Some(path_type);

        Ok(path_type)
    }

    fn effective_path_type(&self) -> BenchPathType {
        self.service_path_type
            .unwrap_or_else(|| self.config.bench_path_type())
    }

    /// Aggregate the completed phase into a `PhaseResults`: counters and
    /// histograms summed across workers, first column from the stonewall
    /// snapshots with the fastest finisher's elapsed time, last column
    /// from the final counters with the slowest.
    pub fn phase_results(&self) -> PhaseResults {
        let snapshot = self.coord.phase_snapshot();
        let (total_ops, total_rwmix_read_ops) = self.coord.live_ops_sum();

        let mut stonewall_ops = LiveOps::default();
        let mut stonewall_rwmix_read_ops = LiveOps::default();
        let mut first_elapsed_usec = u64::MAX;
        let mut last_elapsed_usec = 0u64;
        let mut iops_latency = LatencyHistogram::new();
        let mut entries_latency = LatencyHistogram::new();
        let mut cpu_stonewall_sum = 0u64;
        let mut cpu_last_sum = 0u64;
        let mut num_remote_cpu = 0u64;

        for worker in self.coord.workers() {
            let stonewall = worker.stonewall_snapshot();
            stonewall_ops += stonewall.ops;
            stonewall_rwmix_read_ops += stonewall.rwmix_read_ops;

            let results = worker.results();
            for &elapsed in &results.elapsed_usec {
                first_elapsed_usec = first_elapsed_usec.min(elapsed);
                last_elapsed_usec = last_elapsed_usec.max(elapsed);
            }

            iops_latency += &results.iops_latency;
            entries_latency += &results.entries_latency;

            if self.config.is_master() {
                cpu_stonewall_sum += results.cpu_util_stonewall_percent as u64;
                cpu_last_sum += results.cpu_util_last_percent as u64;
                num_remote_cpu += 1;
            }
        }

        if first_elapsed_usec == u64::MAX {
            first_elapsed_usec = 0;
        }

        // master mode: average the services' CPU utilization
        let (cpu_util_stonewall, cpu_util_last) = if num_remote_cpu > 0 {
            (
                (cpu_stonewall_sum / num_remote_cpu) as u32,
                (cpu_last_sum / num_remote_cpu) as u32,
            )
        } else {
            (
                snapshot.cpu_util_first_done_percent,
                snapshot.cpu_util_last_done_percent,
            )
        };

        let (entries_per_worker, bytes_per_worker) =
            phase_num_entries_and_bytes(&self.config, snapshot.phase, self.effective_path_type());
        let num_workers = self.coord.num_workers() as u64;

        PhaseResults {
            phase: snapshot.phase,
            total_ops,
            total_rwmix_read_ops,
            stonewall_ops,
            stonewall_rwmix_read_ops,
            first_elapsed_usec,
            last_elapsed_usec,
            iops_latency,
            entries_latency,
            cpu_util_stonewall,
            cpu_util_last,
            expected_ops: LiveOps {
                entries_done: entries_per_worker * num_workers,
                bytes_done: bytes_per_worker * num_workers,
                iops_done: 0,
            },
        }
    }

    /// Live status document for the service's `/status` endpoint.
    pub fn live_status(&self) -> StatusXfer {
        let snapshot = self.coord.phase_snapshot();
        let (ops, rwmix_read_ops) = self.coord.live_ops_sum();

        let rwmix_active =
            snapshot.phase == BenchPhase::CreateFiles && self.config.rwmix_percent > 0;

        StatusXfer {
            bench_id: snapshot.bench_id.to_string(),
            phase_name: snapshot.phase.name().to_string(),
            phase_code: snapshot.phase.code(),
            num_workers_done: snapshot.num_done,
            num_workers_done_with_err: snapshot.num_done_with_error,
            num_entries_done: ops.entries_done,
            num_bytes_done: ops.bytes_done,
            num_iops_done: ops.iops_done,
            cpu_util: snapshot.cpu_util_live_percent,
            elapsed_secs: snapshot.elapsed.as_secs(),
            rwmix_read_bytes_done: rwmix_active.then_some(rwmix_read_ops.bytes_done),
            rwmix_read_iops_done: rwmix_active.then_some(rwmix_read_ops.iops_done),
            error_history: crate::service::error_history::get(),
        }
    }

    /// Final result document for the service's `/benchresult` endpoint.
    pub fn bench_result(&self) -> BenchResultXfer {
        let snapshot = self.coord.phase_snapshot();
        let (ops, rwmix_read_ops) = self.coord.live_ops_sum();

        let mut elapsed_usec_list = Vec::new();
        let mut iops_latency = LatencyHistogram::new();
        let mut entries_latency = LatencyHistogram::new();

        for worker in self.coord.workers() {
            let results = worker.results();
            elapsed_usec_list.extend_from_slice(&results.elapsed_usec);
            iops_latency += &results.iops_latency;
            entries_latency += &results.entries_latency;
        }

        let rwmix_active =
            snapshot.phase == BenchPhase::CreateFiles && self.config.rwmix_percent > 0;

        BenchResultXfer {
            bench_id: snapshot.bench_id.to_string(),
            phase_name: snapshot.phase.name().to_string(),
            phase_code: snapshot.phase.code(),
            num_workers_done: snapshot.num_done,
            num_workers_done_with_err: snapshot.num_done_with_error,
            num_entries_done: ops.entries_done,
            num_bytes_done: ops.bytes_done,
            num_iops_done: ops.iops_done,
            cpu_util_stonewall: snapshot.cpu_util_first_done_percent,
            cpu_util: snapshot.cpu_util_last_done_percent,
            elapsed_usec_list,
            iops_latency: HistogramXfer::from(&iops_latency),
            entries_latency: HistogramXfer::from(&entries_latency),
            rwmix_read_bytes_done: rwmix_active.then_some(rwmix_read_ops.bytes_done),
            rwmix_read_iops_done: rwmix_active.then_some(rwmix_read_ops.iops_done),
            error_history: crate::service::error_history::get(),
        }
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.coord.interrupt_and_notify_workers();
            self.join_all_threads();
        }
    }
}

/// Expected per-worker totals for a phase, used by the final progress
/// percentage (and by live-stats rendering).
pub fn phase_num_entries_and_bytes(
    config: &BenchConfig,
    phase: BenchPhase,
    path_type: BenchPathType,
) -> (u64, u64) {
    let (mut entries, mut bytes) = if path_type == BenchPathType::Dir {
        match phase {
            BenchPhase::CreateDirs | BenchPhase::DeleteDirs => (config.dirs, 0),
            BenchPhase::CreateFiles | BenchPhase::ReadFiles => {
                let num_dirs = config.dirs.max(1);
                let num_entries = num_dirs * config.files;
                (num_entries, num_entries * config.size)
            }
            BenchPhase::DeleteFiles | BenchPhase::StatFiles => {
                (config.dirs.max(1) * config.files, 0)
            }
            _ => (0, 0),
        }
    } else {
        let num_paths = config.path.split(',').filter(|p| !p.trim().is_empty()).count() as u64;

        let bytes = match phase {
            BenchPhase::CreateFiles | BenchPhase::ReadFiles => {
                let total = if config.use_random_offsets {
                    config.random_amount // total, not per file
                } else {
                    num_paths * config.size
                };
                total / config.num_dataset_threads() as u64
            }
            _ => 0,
        };

        (num_paths, bytes)
    };

    // remote workers stand for all threads of their service host
    if config.is_master() {
        entries *= config.threads as u64;
        bytes *= config.threads as u64;
    }

    (entries, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_manager(config: BenchConfig) -> WorkerManager {
        WorkerManager::new(
            Arc::new(config),
            Capabilities::none(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn dir_tree_config(dir: &tempfile::TempDir, threads: usize) -> BenchConfig {
        let mut config = BenchConfig {
            path: dir.path().display().to_string(),
            threads,
            dirs: 2,
            files: 3,
            size: 64 << 10,
            block: 16 << 10,
            run_create_dirs: true,
            run_create_files: true,
            run_read_files: true,
            run_stat_files: true,
            run_delete_files: true,
            run_delete_dirs: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();
        config
    }

    fn run_one_phase(manager: &mut WorkerManager, phase: BenchPhase) -> PhaseResults {
        manager.start_next_phase(phase, None);
        manager.wait_for_workers_done().unwrap();
        manager.phase_results()
    }

    #[test]
    fn test_phase_totals_dir_mode() {
        let config = BenchConfig {
            path: "/x".into(),
            dirs: 3,
            files: 4,
            size: 1 << 20,
            ..Default::default()
        };

        assert_eq!(
            phase_num_entries_and_bytes(&config, BenchPhase::CreateDirs, BenchPathType::Dir),
            (3, 0)
        );
        assert_eq!(
            phase_num_entries_and_bytes(&config, BenchPhase::CreateFiles, BenchPathType::Dir),
            (12, 12 << 20)
        );
        assert_eq!(
            phase_num_entries_and_bytes(&config, BenchPhase::StatFiles, BenchPathType::Dir),
            (12, 0)
        );
        assert_eq!(
            phase_num_entries_and_bytes(&config, BenchPhase::Sync, BenchPathType::Dir),
            (0, 0)
        );
    }

    #[test]
    fn test_phase_totals_file_mode() {
        let config = BenchConfig {
            path: "/a,/b".into(),
            threads: 4,
            size: 1 << 30,
            ..Default::default()
        };

        // sequential: bytes = paths * size / dataset threads
        assert_eq!(
            phase_num_entries_and_bytes(&config, BenchPhase::CreateFiles, BenchPathType::File),
            (2, (2u64 << 30) / 4)
        );
        assert_eq!(
            phase_num_entries_and_bytes(&config, BenchPhase::DeleteFiles, BenchPathType::File),
            (2, 0)
        );

        // random: bytes come from the random amount
        let config = BenchConfig {
            path: "/a".into(),
            threads: 2,
            size: 1 << 30,
            use_random_offsets: true,
            random_amount: 64 << 20,
            ..Default::default()
        };
        assert_eq!(
            phase_num_entries_and_bytes(&config, BenchPhase::ReadFiles, BenchPathType::BlockDev),
            (1, (64 << 20) / 2)
        );
    }

    #[test]
    fn test_phase_totals_master_multiplies_by_threads() {
        let config = BenchConfig {
            path: "/x".into(),
            threads: 8,
            dirs: 2,
            files: 5,
            size: 1024,
            hosts: vec!["h1:1611".into()],
            ..Default::default()
        };

        let (entries, bytes) =
            phase_num_entries_and_bytes(&config, BenchPhase::CreateFiles, BenchPathType::Dir);
        assert_eq!(entries, 2 * 5 * 8);
        assert_eq!(bytes, 2 * 5 * 1024 * 8);
    }

    // end-to-end: run the full directory phase sequence on a temp dir
    #[test]
    fn test_dir_mode_full_phase_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir_tree_config(&dir, 2);
        let mut manager = local_manager(config);

        manager.prepare_threads().unwrap();

        // create dirs
        let results = run_one_phase(&mut manager, BenchPhase::CreateDirs);
        assert_eq!(results.total_ops.entries_done, 2 * 2); // threads x dirs
        for rank in 0..2 {
            for dir_idx in 0..2 {
                assert!(dir.path().join(format!("r{rank}/d{dir_idx}")).is_dir());
            }
        }

        // create files: threads x dirs x files entries, each of file size
        let results = run_one_phase(&mut manager, BenchPhase::CreateFiles);
        assert_eq!(results.total_ops.entries_done, 2 * 2 * 3);
        assert_eq!(results.total_ops.bytes_done, 2 * 2 * 3 * (64 << 10));
        assert_eq!(results.total_ops.iops_done, 2 * 2 * 3 * 4); // 4 blocks/file
        assert_eq!(results.percent_done(), 100);

        let sample = dir.path().join("r0/d1/f2");
        assert_eq!(std::fs::metadata(&sample).unwrap().len(), 64 << 10);

        // read files
        let results = run_one_phase(&mut manager, BenchPhase::ReadFiles);
        assert_eq!(results.total_ops.bytes_done, 2 * 2 * 3 * (64 << 10));
        assert!(results.iops_latency.num_values() > 0);
        assert!(results.entries_latency.num_values() > 0);

        // stat files
        let results = run_one_phase(&mut manager, BenchPhase::StatFiles);
        assert_eq!(results.total_ops.entries_done, 12);
        assert_eq!(results.total_ops.bytes_done, 0);

        // delete files and dirs leave the tree empty
        run_one_phase(&mut manager, BenchPhase::DeleteFiles);
        run_one_phase(&mut manager, BenchPhase::DeleteDirs);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();
    }

    #[test]
    fn test_integrity_round_trip_and_mismatch() {
        let dir = tempfile::tempdir().unwrap();

        // write with salt 1
        let mut config = BenchConfig {
            path: dir.path().display().to_string(),
            threads: 1,
            dirs: 1,
            files: 1,
            size: 1 << 20,
            block: 1 << 10,
            integrity_check_salt: 1,
            run_create_files: true,
            run_read_files: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut manager = local_manager(config);
        manager.prepare_threads().unwrap();
        run_one_phase(&mut manager, BenchPhase::CreateFiles);

        // read back with the same salt verifies cleanly
        let results = run_one_phase(&mut manager, BenchPhase::ReadFiles);
        assert_eq!(results.total_ops.bytes_done, 1 << 20);

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();

        // a second reader with a different salt must fail at offset 0
        let mut config = BenchConfig {
            path: dir.path().display().to_string(),
            threads: 1,
            dirs: 1,
            files: 1,
            size: 1 << 20,
            block: 1 << 10,
            integrity_check_salt: 2,
            run_read_files: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut manager = local_manager(config);
        manager.prepare_threads().unwrap();
        manager.start_next_phase(BenchPhase::ReadFiles, None);
        assert!(manager.wait_for_workers_done().is_err());
        manager.join_all_threads();
    }

    #[test]
    fn test_delete_phases_idempotent_with_nodelerr() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchConfig {
            path: dir.path().display().to_string(),
            threads: 1,
            dirs: 2,
            files: 2,
            size: 0,
            block: 0,
            ignore_del_errors: true,
            run_delete_files: true,
            run_delete_dirs: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut manager = local_manager(config);
        manager.prepare_threads().unwrap();

        // nothing exists, both delete phases still succeed, twice
        for _ in 0..2 {
            let results = run_one_phase(&mut manager, BenchPhase::DeleteFiles);
            assert_eq!(results.total_ops.entries_done, 4);

            let results = run_one_phase(&mut manager, BenchPhase::DeleteDirs);
            assert_eq!(results.total_ops.entries_done, 2);
        }

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();
    }

    #[test]
    fn test_file_mode_sequential_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("bench.dat");

        let mut config = BenchConfig {
            path: file_path.display().to_string(),
            threads: 2,
            size: 256 << 10,
            block: 32 << 10,
            run_create_files: true,
            run_read_files: true,
            trunc_to_size: false,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut manager = local_manager(config);
        manager.prepare_threads().unwrap();

        let results = run_one_phase(&mut manager, BenchPhase::CreateFiles);
        assert_eq!(results.total_ops.bytes_done, 256 << 10);
        assert_eq!(std::fs::metadata(&file_path).unwrap().len(), 256 << 10);

        let results = run_one_phase(&mut manager, BenchPhase::ReadFiles);
        assert_eq!(results.total_ops.bytes_done, 256 << 10);

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();
    }

    #[test]
    fn test_file_mode_random_aligned_bounded_amount() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("rand.dat");

        let mut config = BenchConfig {
            path: file_path.display().to_string(),
            threads: 2,
            size: 1 << 20,
            block: 4 << 10,
            use_random_offsets: true,
            use_random_aligned: true,
            random_amount: 128 << 10,
            run_create_files: true,
            trunc_to_size: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut manager = local_manager(config);
        manager.prepare_threads().unwrap();

        let results = run_one_phase(&mut manager, BenchPhase::CreateFiles);
        // every worker writes random_amount / dataset threads
        assert_eq!(results.total_ops.bytes_done, 128 << 10);
        // aligned mode never submits partial blocks
        assert_eq!(results.total_ops.iops_done, (128 << 10) / (4 << 10));

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();
    }

    #[test]
    fn test_dir_sharing_uses_rank0_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchConfig {
            path: dir.path().display().to_string(),
            threads: 2,
            dirs: 2,
            files: 2,
            size: 4 << 10,
            block: 4 << 10,
            do_dir_sharing: true,
            run_create_dirs: true,
            run_create_files: true,
            run_delete_files: true,
            run_delete_dirs: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut manager = local_manager(config);
        manager.prepare_threads().unwrap();

        run_one_phase(&mut manager, BenchPhase::CreateDirs);
        run_one_phase(&mut manager, BenchPhase::CreateFiles);

        // everything lives under the rank-0 tree, file leaves carry the
        // owner's rank
        assert!(dir.path().join("r0/d0").is_dir());
        assert!(!dir.path().join("r1").exists());
        for rank in 0..2 {
            assert!(dir.path().join(format!("r0/d1/r{rank}-f1")).is_file());
        }

        run_one_phase(&mut manager, BenchPhase::DeleteFiles);
        // all workers delete the shared dirs; duplicate deletes tolerated
        run_one_phase(&mut manager, BenchPhase::DeleteDirs);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();
    }

    #[test]
    fn test_backward_sequential_writes_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("rev.dat");

        let mut config = BenchConfig {
            path: file_path.display().to_string(),
            threads: 1,
            size: 128 << 10,
            block: 32 << 10,
            use_reverse_seq_offsets: true,
            run_create_files: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut manager = local_manager(config);
        manager.prepare_threads().unwrap();

        let results = run_one_phase(&mut manager, BenchPhase::CreateFiles);
        assert_eq!(results.total_ops.bytes_done, 128 << 10);
        assert_eq!(std::fs::metadata(&file_path).unwrap().len(), 128 << 10);

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();
    }

    #[test]
    fn test_rwmix_counters_populated() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchConfig {
            path: dir.path().display().to_string(),
            threads: 1,
            dirs: 1,
            files: 4,
            size: 64 << 10,
            block: 4 << 10,
            rwmix_percent: 50,
            trunc_to_size: true,
            run_create_files: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        let mut manager = local_manager(config);
        manager.prepare_threads().unwrap();

        let results = run_one_phase(&mut manager, BenchPhase::CreateFiles);
        // around half of the 64 block ops are reads
        assert!(results.total_rwmix_read_ops.iops_done > 0);
        assert!(results.total_rwmix_read_ops.iops_done < results.total_ops.iops_done);

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();
    }

    #[test]
    fn test_stonewall_snapshots_at_first_finisher() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir_tree_config(&dir, 3);
        let mut manager = local_manager(config);

        manager.prepare_threads().unwrap();

        run_one_phase(&mut manager, BenchPhase::CreateDirs);
        let results = run_one_phase(&mut manager, BenchPhase::CreateFiles);

        // snapshots exist and never exceed the final counters
        assert!(results.stonewall_ops.entries_done > 0);
        assert!(results.stonewall_ops.entries_done <= results.total_ops.entries_done);
        assert!(results.stonewall_ops.bytes_done <= results.total_ops.bytes_done);
        assert!(results.first_elapsed_usec <= results.last_elapsed_usec);

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();
    }

    #[test]
    fn test_bench_result_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir_tree_config(&dir, 1);
        let mut manager = local_manager(config);

        manager.prepare_threads().unwrap();
        run_one_phase(&mut manager, BenchPhase::CreateDirs);
        run_one_phase(&mut manager, BenchPhase::CreateFiles);

        let result = manager.bench_result();
        assert_eq!(result.phase_code, BenchPhase::CreateFiles.code());
        assert_eq!(result.num_workers_done, 1);
        assert_eq!(result.elapsed_usec_list.len(), 1);
        assert_eq!(result.num_entries_done, 6);
        assert_eq!(result.iops_latency.count, 6 * 4);

        let status = manager.live_status();
        assert_eq!(status.phase_code, BenchPhase::CreateFiles.code());
        assert_eq!(status.num_workers_done, 1);

        manager.start_next_phase(BenchPhase::Terminate, None);
        manager.wait_for_workers_done().unwrap();
        manager.join_all_threads();
    }

    #[test]
    fn test_time_limit_interrupts_phase() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchConfig {
            path: dir.path().display().to_string(),
            threads: 2,
            dirs: 1,
            files: 100_000,
            size: 4 << 10,
            block: 4 << 10,
            time_limit_secs: 1,
            run_create_files: true,
            ..Default::default()
        };
        config.validate().unwrap();
        config.open_bench_paths().unwrap();

        // the phase needs its rank dirs
        std::fs::create_dir_all(dir.path().join("r0/d0")).unwrap();
        std::fs::create_dir_all(dir.path().join("r1/d0")).unwrap();

        let mut manager = local_manager(config);
        manager.prepare_threads().unwrap();

        let start = std::time::Instant::now();
        manager.start_next_phase(BenchPhase::CreateFiles, None);
        // interrupted workers count as done, not as failed
        manager.wait_for_workers_done().unwrap();
        let elapsed = start.elapsed();

        assert!(manager.coordination().is_time_expired());
        assert!(elapsed < Duration::from_secs(5));

        let results = manager.phase_results();
        // partial progress, strictly less than the planned total
        assert!(results.total_ops.entries_done < 2 * 100_000);

        manager.join_all_threads();
    }
}
