//! Local worker: the per-thread workload engine
//!
//! Each local worker is one thread performing I/O. It blocks on the shared
//! phase coordination, and for every phase it selects a strategy (a struct
//! of plain function pointers, chosen once at phase entry so the hot loop
//! stays branch-free), iterates directories/files/block ranges, and runs
//! the sync or async inner loop feeding the live counters and latency
//! histograms.
//!
//! Failure semantics: a partial read/write, an async ring error, or an
//! integrity mismatch is fatal for the worker; ENOENT on delete is
//! tolerated when configured; interruption is cooperative and checked at
//! least every 128 files and in every inner-loop pass.

use super::coordination::PhaseCoordination;
use super::{WorkerHandle, WorkerPhaseResults};
use crate::buffer::IoBufferPool;
use crate::config::{BenchConfig, BenchPathType};
use crate::device::{Capabilities, DeviceStaging, DmaHandle, DmaRegistrar};
use crate::error::{WorkerError, WorkerResult};
use crate::generator::{
    OffsetGenRandom, OffsetGenRandomAligned, OffsetGenReverseSeq, OffsetGenSequential,
    OffsetGenerator,
};
use crate::limiter::RateLimiter;
use crate::phase::BenchPhase;
use crate::stats::LatencyHistogram;
use crate::verify::{fill_integrity_buf, verify_integrity_buf, IntegrityMismatch};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Interrupt-flag check cadence in file/dir iteration loops.
const INTERRUPTION_CHECK_INTERVAL: u64 = 128;

/// Short completion-wait timeout of the async inner loop, so interruption
/// is observed promptly.
#[cfg(feature = "io_uring")]
const AIO_MAX_WAIT_SECS: u64 = 5;

const MKDIR_MODE: libc::mode_t = 0o755;
const MKFILE_MODE: libc::mode_t = 0o644;

/// Error inside the inner loops, before path context is attached.
#[derive(Debug)]
pub(crate) enum InnerError {
    Interrupted,
    Sys(std::io::Error),
    Verify(IntegrityMismatch),
    Ring(String),
    Capability(String),
}

impl From<WorkerError> for InnerError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Interrupted => InnerError::Interrupted,
            WorkerError::Failed(msg) => InnerError::Capability(msg),
        }
    }
}

type RwInnerFn = fn(&mut LocalWorker) -> Result<u64, InnerError>;
type PositionalRwFn = fn(&mut LocalWorker, fd_idx: usize, slot: usize, len: usize, offset: u64) -> isize;
type BlockModifierFn = fn(&mut LocalWorker, slot: usize, len: usize, offset: u64) -> Result<(), InnerError>;
type StagingCopyFn = fn(&mut LocalWorker, slot: usize, len: usize) -> Result<(), InnerError>;
type HandleRegFn = fn(&mut LocalWorker, fd: RawFd) -> Result<(), InnerError>;
type HandleDeregFn = fn(&mut LocalWorker) -> Result<(), InnerError>;
type RateLimitFn = fn(&mut LocalWorker, rw_size: usize);
#[cfg(feature = "io_uring")]
type AioPrepFn = fn(&mut LocalWorker, fd: RawFd, slot: usize, len: usize, offset: u64)
    -> (io_uring::squeue::Entry, bool);

/// The per-phase strategy: every alternative is selected exactly once at
/// phase entry, never re-evaluated per I/O.
struct PhaseFuncs {
    rw_inner: RwInnerFn,
    positional_rw: PositionalRwFn,
    pre_write_modifier: BlockModifierFn,
    post_read_checker: BlockModifierFn,
    pre_write_staging: StagingCopyFn,
    post_read_staging: StagingCopyFn,
    handle_reg: HandleRegFn,
    handle_dereg: HandleDeregFn,
    rate_limit: RateLimitFn,
    #[cfg(feature = "io_uring")]
    aio_prep: AioPrepFn,
}

impl PhaseFuncs {
    fn noop() -> Self {
        Self {
            rw_inner: LocalWorker::rw_block_sized,
            positional_rw: LocalWorker::pread_wrapper,
            pre_write_modifier: LocalWorker::noop_block_modifier,
            post_read_checker: LocalWorker::noop_block_modifier,
            pre_write_staging: LocalWorker::noop_staging_copy,
            post_read_staging: LocalWorker::noop_staging_copy,
            handle_reg: LocalWorker::noop_handle_reg,
            handle_dereg: LocalWorker::noop_handle_dereg,
            rate_limit: LocalWorker::noop_rate_limit,
            #[cfg(feature = "io_uring")]
            aio_prep: LocalWorker::aio_write_prepper,
        }
    }
}

/// A single thread performing local I/O.
pub struct LocalWorker {
    handle: Arc<WorkerHandle>,
    coord: Arc<PhaseCoordination>,
    config: Arc<BenchConfig>,
    buf_pool: IoBufferPool,
    staging: Option<Box<dyn DeviceStaging>>,
    dma: Option<Box<dyn DmaRegistrar>>,
    block_var_rng: Xoshiro256PlusPlus,
    rate_limiter: RateLimiter,

    /// Monotonic submission counter, deliberately not reset between phases
    /// so percentage decisions stay stable across many small files.
    iops_submitted: u64,

    phase: BenchPhase,
    funcs: PhaseFuncs,
    offset_gen: Option<Box<dyn OffsetGenerator>>,

    /// FD of the current file in dir mode and sequential file mode.
    cur_fd: RawFd,
    /// Random file/bdev mode: use all config FDs round-robin per I/O.
    use_config_fds: bool,
    /// Config FD index a failing I/O used, for the error message.
    error_fd_idx: Option<usize>,
    cur_dma_handle: Option<DmaHandle>,

    iops_latency: LatencyHistogram,
    entries_latency: LatencyHistogram,
}

impl LocalWorker {
    /// Construct the worker and run its preparation phase: allocate the
    /// I/O buffers (and device buffers where configured).
    pub fn new(
        handle: Arc<WorkerHandle>,
        coord: Arc<PhaseCoordination>,
        config: Arc<BenchConfig>,
        capabilities: &Capabilities,
    ) -> WorkerResult<Self> {
        let mut prefill_rng = Xoshiro256PlusPlus::from_entropy();
        let buf_pool = IoBufferPool::new(
            config.io_depth as usize,
            config.block as usize,
            &mut prefill_rng,
        )?;

        let (staging, dma) = if config.use_device_staging {
            let mut staging = capabilities.open_staging(
                handle.rank(),
                buf_pool.count(),
                buf_pool.block_size(),
            )?;
            let mut dma = capabilities.open_dma(handle.rank())?;

            if config.use_host_buf_reg {
                for slot in 0..buf_pool.count() {
                    let buffer = buf_pool.buffer(slot);
                    dma.register_buffer(buffer.as_ptr(), buffer.len())?;
                }
            }

            // initialize device buffers so they are not sparse either
            for slot in 0..buf_pool.count() {
                staging.copy_to_device(slot, buf_pool.buffer(slot).as_slice())?;
            }

            (Some(staging), Some(dma))
        } else {
            (None, None)
        };

        Ok(Self {
            handle,
            coord,
            config,
            buf_pool,
            staging,
            dma,
            block_var_rng: Xoshiro256PlusPlus::from_entropy(),
            rate_limiter: RateLimiter::new(),
            iops_submitted: 0,
            phase: BenchPhase::Idle,
            funcs: PhaseFuncs::noop(),
            offset_gen: None,
            cur_fd: -1,
            use_config_fds: false,
            error_fd_idx: None,
            cur_dma_handle: None,
            iops_latency: LatencyHistogram::new(),
            entries_latency: LatencyHistogram::new(),
        })
    }

    /// Thread entry point: serve successive phases until the terminate
    /// phase, interruption, or a fatal error.
    pub fn run(&mut self) {
        let rank = self.handle.rank();

        match self.run_phases() {
            Ok(()) => {}
            Err(WorkerError::Interrupted) => {
                // whoever interrupted us has a reason, so debug level only
                tracing::debug!(rank, "worker interrupted");

                // the finish may already have happened when the interrupt
                // arrived while waiting for the next phase
                if !self.handle.phase_finished() {
                    self.finish_phase();
                }
            }
            Err(WorkerError::Failed(msg)) => {
                tracing::error!(rank, "{msg}");
                crate::service::error_history::append(&format!("Rank {rank}: {msg}"));
                self.coord.inc_workers_done_with_error();
            }
        }

        self.cleanup();
    }

    fn run_phases(&mut self) -> WorkerResult<()> {
        let mut current_bench_id = Uuid::nil();

        // buffers were allocated in new(); report preparation done
        self.handle.set_phase_finished();
        self.coord.inc_workers_done(&self.handle);

        loop {
            let (phase, bench_id) = self
                .coord
                .wait_for_phase_change(current_bench_id, &self.handle)?;
            current_bench_id = bench_id;
            self.phase = phase;

            self.init_phase_fds();
            self.init_phase_offset_gen()?;
            self.init_phase_funcs()?;

            match phase {
                BenchPhase::Terminate => {
                    tracing::debug!(rank = self.handle.rank(), "terminating as requested");
                    self.handle.set_phase_finished();
                    self.coord.inc_workers_done(&self.handle);
                    return Ok(());
                }
                BenchPhase::Idle => {}
                BenchPhase::CreateDirs | BenchPhase::DeleteDirs => {
                    if self.config.bench_path_type() != BenchPathType::Dir {
                        return Err(WorkerError::failed(
                            "Directory creation and deletion are not available in file and \
                             block device mode.",
                        ));
                    }

                    self.dir_mode_iterate_dirs()?;
                }
                BenchPhase::CreateFiles | BenchPhase::ReadFiles => {
                    if self.config.bench_path_type() == BenchPathType::Dir {
                        self.dir_mode_iterate_files()?;
                    } else if !self.config.use_random_offsets {
                        self.file_mode_iterate_files_seq()?;
                    } else {
                        self.file_mode_iterate_files_rand()?;
                    }
                }
                BenchPhase::StatFiles => {
                    if self.config.bench_path_type() != BenchPathType::Dir {
                        return Err(WorkerError::failed(
                            "File stat operation not available in file and block device mode.",
                        ));
                    }

                    self.dir_mode_iterate_files()?;
                }
                BenchPhase::DeleteFiles => {
                    if self.config.bench_path_type() == BenchPathType::Dir {
                        self.dir_mode_iterate_files()?;
                    } else {
                        self.file_mode_delete_files()?;
                    }
                }
                BenchPhase::Sync => self.any_mode_sync()?,
                BenchPhase::DropCaches => self.any_mode_drop_caches()?,
            }

            self.finish_phase();
        }
    }

    /// Publish elapsed time and histograms, then report done.
    fn finish_phase(&mut self) {
        let elapsed_usec = self.coord.phase_elapsed_usec();

        self.handle.publish_results(WorkerPhaseResults {
            elapsed_usec: vec![elapsed_usec],
            iops_latency: self.iops_latency.clone(),
            entries_latency: self.entries_latency.clone(),
            cpu_util_stonewall_percent: 0,
            cpu_util_last_percent: 0,
        });

        // before the done increment, because the manager may reset stats
        // for the next phase right after the increment
        self.handle.set_phase_finished();

        self.coord.inc_workers_done(&self.handle);
    }

    /// Release device registrations. Called when run() ends; the handle
    /// must stay alive afterwards so the service can still query results.
    fn cleanup(&mut self) {
        if self.config.use_host_buf_reg {
            if let Some(dma) = self.dma.as_mut() {
                for slot in 0..self.buf_pool.count() {
                    let ptr = self.buf_pool.buffer(slot).as_ptr();
                    if let Err(err) = dma.deregister_buffer(ptr) {
                        tracing::error!("host buffer deregistration failed: {err}");
                    }
                }
            }
        }

        self.staging = None;
        self.dma = None;
        self.offset_gen = None;
    }

    // ---- phase initialization ----

    fn init_phase_fds(&mut self) {
        self.error_fd_idx = None;
        self.cur_fd = -1;
        self.use_config_fds = self.config.bench_path_type() != BenchPathType::Dir
            && self.config.use_random_offsets;
    }

    fn init_phase_offset_gen(&mut self) -> WorkerResult<()> {
        let block_size = self.config.block as usize;
        let file_size = self.config.size;

        // note: sequential file/bdev mode re-scopes its generator per file
        // range inside the iteration
        let generator: Box<dyn OffsetGenerator> =
            if !self.phase.is_rw_phase() || !self.config.use_random_offsets {
                if self.config.use_reverse_seq_offsets && self.phase.is_rw_phase() {
                    Box::new(OffsetGenReverseSeq::new(file_size, 0, block_size))
                } else {
                    Box::new(OffsetGenSequential::new(file_size, 0, block_size))
                }
            } else {
                let per_thread_amount =
                    self.config.random_amount / self.config.num_dataset_threads() as u64;
                let rng = Xoshiro256PlusPlus::from_entropy();

                if self.config.use_random_aligned {
                    Box::new(OffsetGenRandomAligned::new(
                        per_thread_amount,
                        rng,
                        file_size,
                        0,
                        block_size,
                    )?)
                } else {
                    Box::new(OffsetGenRandom::new(
                        per_thread_amount,
                        rng,
                        file_size,
                        0,
                        block_size,
                    )?)
                }
            };

        self.offset_gen = Some(generator);

        Ok(())
    }

    fn init_phase_funcs(&mut self) -> WorkerResult<()> {
        self.iops_latency.reset();
        self.entries_latency.reset();

        let io_depth = self.config.io_depth;
        let integrity_check = self.config.integrity_check_salt != 0;
        let block_variance = self.config.block_variance_percent != 0;
        let rwmix = self.config.rwmix_percent != 0;
        let staged = self.staging.is_some();
        let direct_verify = self.config.verify_direct && integrity_check;

        let mut funcs = PhaseFuncs::noop();

        if io_depth > 1 {
            #[cfg(feature = "io_uring")]
            {
                funcs.rw_inner = Self::aio_block_sized;
            }
            #[cfg(not(feature = "io_uring"))]
            return Err(WorkerError::failed(
                "Async IO requested, but this executable was built without io_uring support.",
            ));
        }

        if self.phase == BenchPhase::CreateFiles {
            funcs.positional_rw = if rwmix {
                Self::pwrite_rwmix_wrapper
            } else if direct_verify {
                Self::pwrite_and_read_wrapper
            } else {
                Self::pwrite_wrapper
            };

            #[cfg(feature = "io_uring")]
            {
                funcs.aio_prep = if rwmix {
                    Self::aio_rwmix_prepper
                } else {
                    Self::aio_write_prepper
                };
            }

            funcs.pre_write_modifier = if integrity_check {
                Self::integrity_fill_modifier
            } else if block_variance {
                Self::rand_refill_modifier
            } else {
                Self::noop_block_modifier
            };

            funcs.pre_write_staging = if staged {
                Self::copy_to_device_staging
            } else {
                Self::noop_staging_copy
            };

            funcs.post_read_checker = if direct_verify {
                Self::verify_block_checker
            } else {
                Self::noop_block_modifier
            };
        } else {
            // read phase (and the other phases, which never call these)
            funcs.positional_rw = Self::pread_wrapper;

            #[cfg(feature = "io_uring")]
            {
                funcs.aio_prep = Self::aio_read_prepper;
            }

            funcs.post_read_staging = if staged {
                Self::copy_from_device_staging
            } else {
                Self::noop_staging_copy
            };

            funcs.post_read_checker = if integrity_check {
                Self::verify_block_checker
            } else {
                Self::noop_block_modifier
            };
        }

        // per-file DMA handle registration only exists in dir mode, where
        // this worker opens its own files
        if staged && self.config.bench_path_type() == BenchPathType::Dir {
            funcs.handle_reg = Self::dma_handle_reg;
            funcs.handle_dereg = Self::dma_handle_dereg;
        }

        // per-thread throughput limit, armed freshly for each phase
        let rate_limit_bps = match self.phase {
            BenchPhase::CreateFiles => self.config.limit_write_bps,
            BenchPhase::ReadFiles => self.config.limit_read_bps,
            _ => 0,
        };
        if rate_limit_bps > 0 {
            self.rate_limiter.init_start(rate_limit_bps);
            funcs.rate_limit = Self::pre_rw_rate_limit;
        }

        self.funcs = funcs;

        Ok(())
    }

    // ---- offset generator access ----

    #[inline]
    fn gen_bytes_left(&self) -> u64 {
        self.offset_gen
            .as_ref()
            .map(|g| g.bytes_left_to_submit())
            .unwrap_or(0)
    }

    #[inline]
    fn gen_bytes_total(&self) -> u64 {
        self.offset_gen.as_ref().map(|g| g.bytes_total()).unwrap_or(0)
    }

    // ---- file handle access ----

    fn file_handle_count(&self) -> usize {
        if self.use_config_fds {
            self.config.bench_path_fds().len()
        } else {
            1
        }
    }

    fn target_fd(&self, fd_idx: usize) -> RawFd {
        if self.use_config_fds {
            self.config.bench_path_fds()[fd_idx].as_raw_fd()
        } else {
            self.cur_fd
        }
    }

    #[inline]
    fn check_interrupt_inner(&self) -> Result<(), InnerError> {
        if self.handle.is_interrupt_requested() {
            return Err(InnerError::Interrupted);
        }
        Ok(())
    }

    // ---- sync inner loop ----

    /// Loop around positional read/write in block-sized submissions, using
    /// the offset generator for next offset and size. Returns the number of
    /// bytes completed, which is less than the generator's total on a
    /// partial transfer.
    fn rw_block_sized(&mut self) -> Result<u64, InnerError> {
        while self.gen_bytes_left() > 0 {
            let (offset, len) = {
                let generator = self.offset_gen.as_mut().expect("offset generator set per phase");
                let offset = generator.next_offset();
                (offset, generator.next_submit_size())
            };
            let fd_idx = (self.iops_submitted % self.file_handle_count() as u64) as usize;

            let io_start = Instant::now();

            let rate_limit = self.funcs.rate_limit;
            let pre_write_modifier = self.funcs.pre_write_modifier;
            let pre_write_staging = self.funcs.pre_write_staging;
            let positional_rw = self.funcs.positional_rw;

            rate_limit(self, len);

            pre_write_modifier(self, 0, len, offset)?;
            pre_write_staging(self, 0, len)?;

            let rw_res = positional_rw(self, fd_idx, 0, len, offset);

            if rw_res <= 0 {
                if self.use_config_fds {
                    self.error_fd_idx = Some(fd_idx);
                }

                if rw_res < 0 {
                    return Err(InnerError::Sys(std::io::Error::last_os_error()));
                }

                // zero-byte result: report completed bytes as a short transfer
                return Ok(self.gen_bytes_total() - self.gen_bytes_left());
            }

            let done = rw_res as usize;

            let post_read_staging = self.funcs.post_read_staging;
            let post_read_checker = self.funcs.post_read_checker;

            post_read_staging(self, 0, done)?;
            post_read_checker(self, 0, done, offset)?;

            self.iops_latency
                .add_latency(io_start.elapsed().as_micros() as u64);

            // a short positive transfer is not an error: the generator
            // advances by the actual byte count and the loop retries the
            // remainder
            self.iops_submitted += 1;
            if let Some(generator) = self.offset_gen.as_mut() {
                generator.add_bytes_submitted(done);
            }
            self.handle.live_ops.add_bytes(done as u64);
            self.handle.live_ops.inc_iops();

            self.check_interrupt_inner()?;
        }

        Ok(self.gen_bytes_total())
    }

    // ---- async inner loop ----

    /// Ring-based inner loop: seed submissions up to the I/O depth, then
    /// wait for completions with a short timeout (so interruption is
    /// observed promptly) and refill completed slots while bytes remain.
    /// Completion latency is measured from the submit point of each slot.
    #[cfg(feature = "io_uring")]
    fn aio_block_sized(&mut self) -> Result<u64, InnerError> {
        use io_uring::{types, IoUring};

        let depth = self.config.io_depth as usize;

        let mut ring = IoUring::new(depth as u32).map_err(|err| {
            InnerError::Ring(format!("Initializing async IO ring failed. SysErr: {err}"))
        })?;

        let mut start_times = vec![Instant::now(); depth];
        let mut slot_lens = vec![0usize; depth];
        let mut slot_offsets = vec![0u64; depth];
        let mut slot_is_read = vec![false; depth];

        let mut num_pending = 0usize;
        let mut bytes_done = 0u64;

        // initial seed of submissions up to the full ring depth
        while self.gen_bytes_left() > 0 && num_pending < depth {
            let slot = num_pending;
            self.aio_submit_slot(
                &mut ring,
                slot,
                &mut start_times,
                &mut slot_lens,
                &mut slot_offsets,
                &mut slot_is_read,
            )?;
            num_pending += 1;
        }

        let wait_timeout = types::Timespec::new().sec(AIO_MAX_WAIT_SECS);

        // wait for completions and refill slots while bytes remain
        while num_pending > 0 {
            let args = types::SubmitArgs::new().timespec(&wait_timeout);

            match ring.submitter().submit_with_args(1, &args) {
                Ok(_) => {}
                // timeout expired: fine, it exists to observe interruption
                Err(err) if err.raw_os_error() == Some(libc::ETIME) => {
                    self.check_interrupt_inner()?;
                }
                Err(err) if err.raw_os_error() == Some(libc::EINTR) => {}
                Err(err) => {
                    return Err(InnerError::Ring(format!(
                        "Waiting for async IO events failed. \
                         NumPending: {num_pending}; SysErr: {err}"
                    )));
                }
            }

            loop {
                let Some(cqe) = ring.completion().next() else {
                    break;
                };

                let slot = cqe.user_data() as usize;
                let result = cqe.result();

                if result < 0 {
                    return Err(InnerError::Sys(std::io::Error::from_raw_os_error(-result)));
                }

                if result as usize != slot_lens[slot] {
                    // mismatched event byte count: report as short transfer
                    return Ok(bytes_done + result as u64);
                }

                let done = result as usize;

                let post_read_staging = self.funcs.post_read_staging;
                let post_read_checker = self.funcs.post_read_checker;

                post_read_staging(self, slot, done)?;
                post_read_checker(self, slot, done, slot_offsets[slot])?;

                self.iops_latency
                    .add_latency(start_times[slot].elapsed().as_micros() as u64);

                bytes_done += done as u64;
                self.handle.live_ops.add_bytes(done as u64);
                self.handle.live_ops.inc_iops();

                if slot_is_read[slot] {
                    self.handle.live_rwmix_read_ops.add_bytes(done as u64);
                    self.handle.live_rwmix_read_ops.inc_iops();
                }

                self.check_interrupt_inner()?;

                if self.gen_bytes_left() == 0 {
                    num_pending -= 1;
                    continue;
                }

                // request complete, reuse the slot for the next request
                self.aio_submit_slot(
                    &mut ring,
                    slot,
                    &mut start_times,
                    &mut slot_lens,
                    &mut slot_offsets,
                    &mut slot_is_read,
                )?;
            }
        }

        Ok(self.gen_bytes_total())
    }

    #[cfg(feature = "io_uring")]
    #[allow(clippy::too_many_arguments)]
    fn aio_submit_slot(
        &mut self,
        ring: &mut io_uring::IoUring,
        slot: usize,
        start_times: &mut [Instant],
        slot_lens: &mut [usize],
        slot_offsets: &mut [u64],
        slot_is_read: &mut [bool],
    ) -> Result<(), InnerError> {
        let (offset, len) = {
            let generator = self.offset_gen.as_mut().expect("offset generator set per phase");
            let offset = generator.next_offset();
            (offset, generator.next_submit_size())
        };
        let fd_idx = (self.iops_submitted % self.file_handle_count() as u64) as usize;
        let fd = self.target_fd(fd_idx);

        let rate_limit = self.funcs.rate_limit;
        rate_limit(self, len);

        start_times[slot] = Instant::now();

        let pre_write_modifier = self.funcs.pre_write_modifier;
        let pre_write_staging = self.funcs.pre_write_staging;
        let aio_prep = self.funcs.aio_prep;

        pre_write_modifier(self, slot, len, offset)?;
        pre_write_staging(self, slot, len)?;

        let (entry, is_read) = aio_prep(self, fd, slot, len, offset);

        slot_lens[slot] = len;
        slot_offsets[slot] = offset;
        slot_is_read[slot] = is_read;

        // SAFETY: the buffer belongs to this worker's pool and outlives the
        // ring, which is dropped before the pool can be touched again
        unsafe {
            ring.submission()
                .push(&entry)
                .map_err(|_| InnerError::Ring("Async IO submission queue full".to_string()))?;
        }

        ring.submit().map_err(|err| {
            InnerError::Ring(format!("Async IO submission failed. SysErr: {err}"))
        })?;

        self.iops_submitted += 1;
        if let Some(generator) = self.offset_gen.as_mut() {
            generator.add_bytes_submitted(len);
        }

        Ok(())
    }

    // ---- positional read/write alternatives ----

    fn pread_wrapper(&mut self, fd_idx: usize, slot: usize, len: usize, offset: u64) -> isize {
        let fd = self.target_fd(fd_idx);
        let buf = self.buf_pool.buffer_mut(slot).as_mut_ptr();

        unsafe { libc::pread(fd, buf as *mut libc::c_void, len, offset as libc::off_t) as isize }
    }

    fn pwrite_wrapper(&mut self, fd_idx: usize, slot: usize, len: usize, offset: u64) -> isize {
        let fd = self.target_fd(fd_idx);
        let buf = self.buf_pool.buffer_mut(slot).as_mut_ptr();

        unsafe {
            libc::pwrite(fd, buf as *const libc::c_void, len, offset as libc::off_t) as isize
        }
    }

    /// Positional write followed by an immediate read-back of the same
    /// block, for direct post-write verification.
    fn pwrite_and_read_wrapper(
        &mut self,
        fd_idx: usize,
        slot: usize,
        len: usize,
        offset: u64,
    ) -> isize {
        let write_res = self.pwrite_wrapper(fd_idx, slot, len, offset);

        if write_res <= 0 {
            return write_res;
        }

        self.pread_wrapper(fd_idx, slot, write_res as usize, offset)
    }

    /// Within a write phase, issue the configured percentage of block
    /// reads for mixed r/w. The rank skews the decision sequence between
    /// worker threads; the monotonic submit counter keeps the percentage
    /// stable across many small files.
    fn pwrite_rwmix_wrapper(
        &mut self,
        fd_idx: usize,
        slot: usize,
        len: usize,
        offset: u64,
    ) -> isize {
        let roll = (self.handle.rank() as u64 + self.iops_submitted) % 100;

        if roll >= self.config.rwmix_percent {
            return self.pwrite_wrapper(fd_idx, slot, len, offset);
        }

        let read_res = self.pread_wrapper(fd_idx, slot, len, offset);

        if read_res > 0 {
            self.handle.live_rwmix_read_ops.add_bytes(read_res as u64);
            self.handle.live_rwmix_read_ops.inc_iops();
        }

        read_res
    }

    // ---- async preppers ----

    #[cfg(feature = "io_uring")]
    fn aio_write_prepper(
        &mut self,
        fd: RawFd,
        slot: usize,
        len: usize,
        offset: u64,
    ) -> (io_uring::squeue::Entry, bool) {
        use io_uring::{opcode, types};

        let buf = self.buf_pool.buffer_mut(slot).as_mut_ptr();

        let entry = opcode::Write::new(types::Fd(fd), buf as *const u8, len as u32)
            .offset(offset)
            .build()
            .user_data(slot as u64);

        (entry, false)
    }

    #[cfg(feature = "io_uring")]
    fn aio_read_prepper(
        &mut self,
        fd: RawFd,
        slot: usize,
        len: usize,
        offset: u64,
    ) -> (io_uring::squeue::Entry, bool) {
        use io_uring::{opcode, types};

        let buf = self.buf_pool.buffer_mut(slot).as_mut_ptr();

        let entry = opcode::Read::new(types::Fd(fd), buf, len as u32)
            .offset(offset)
            .build()
            .user_data(slot as u64);

        (entry, true)
    }

    #[cfg(feature = "io_uring")]
    fn aio_rwmix_prepper(
        &mut self,
        fd: RawFd,
        slot: usize,
        len: usize,
        offset: u64,
    ) -> (io_uring::squeue::Entry, bool) {
        let roll = (self.handle.rank() as u64 + self.iops_submitted) % 100;

        if roll >= self.config.rwmix_percent {
            self.aio_write_prepper(fd, slot, len, offset)
        } else {
            self.aio_read_prepper(fd, slot, len, offset)
        }
    }

    // ---- block modifiers and checkers ----

    fn noop_block_modifier(
        &mut self,
        _slot: usize,
        _len: usize,
        _offset: u64,
    ) -> Result<(), InnerError> {
        Ok(())
    }

    fn integrity_fill_modifier(
        &mut self,
        slot: usize,
        len: usize,
        offset: u64,
    ) -> Result<(), InnerError> {
        let salt = self.config.integrity_check_salt;
        let buf = &mut self.buf_pool.buffer_mut(slot).as_mut_slice()[..len];

        fill_integrity_buf(buf, offset, salt);

        Ok(())
    }

    /// Refill the configured percentage of buffers with fresh random data
    /// before submission, keyed on the rank-skewed submit counter so the
    /// share of unique buffers stays stable across files.
    fn rand_refill_modifier(
        &mut self,
        slot: usize,
        len: usize,
        _offset: u64,
    ) -> Result<(), InnerError> {
        let roll = (self.handle.rank() as u64 + self.iops_submitted) % 100;
        if roll >= self.config.block_variance_percent {
            return Ok(());
        }

        let Self {
            buf_pool,
            block_var_rng,
            ..
        } = self;

        block_var_rng.fill_bytes(&mut buf_pool.buffer_mut(slot).as_mut_slice()[..len]);

        Ok(())
    }

    fn verify_block_checker(
        &mut self,
        slot: usize,
        len: usize,
        offset: u64,
    ) -> Result<(), InnerError> {
        let salt = self.config.integrity_check_salt;
        let buf = &self.buf_pool.buffer(slot).as_slice()[..len];

        verify_integrity_buf(buf, offset, salt).map_err(InnerError::Verify)
    }

    // ---- device staging copies ----

    fn noop_staging_copy(&mut self, _slot: usize, _len: usize) -> Result<(), InnerError> {
        Ok(())
    }

    fn copy_to_device_staging(&mut self, slot: usize, len: usize) -> Result<(), InnerError> {
        let Self {
            buf_pool, staging, ..
        } = self;

        if let Some(staging) = staging.as_mut() {
            staging
                .copy_to_device(slot, &buf_pool.buffer(slot).as_slice()[..len])
                .map_err(InnerError::from)?;
        }

        Ok(())
    }

    fn copy_from_device_staging(&mut self, slot: usize, len: usize) -> Result<(), InnerError> {
        let Self {
            buf_pool, staging, ..
        } = self;

        if let Some(staging) = staging.as_mut() {
            staging
                .copy_from_device(slot, &mut buf_pool.buffer_mut(slot).as_mut_slice()[..len])
                .map_err(InnerError::from)?;
        }

        Ok(())
    }

    // ---- throughput limiting ----

    fn noop_rate_limit(&mut self, _rw_size: usize) {}

    fn pre_rw_rate_limit(&mut self, rw_size: usize) {
        self.rate_limiter.wait(rw_size);
    }

    // ---- per-file DMA handle registration ----

    fn noop_handle_reg(&mut self, _fd: RawFd) -> Result<(), InnerError> {
        Ok(())
    }

    fn noop_handle_dereg(&mut self) -> Result<(), InnerError> {
        Ok(())
    }

    fn dma_handle_reg(&mut self, fd: RawFd) -> Result<(), InnerError> {
        if let Some(dma) = self.dma.as_mut() {
            self.cur_dma_handle = Some(dma.register_handle(fd).map_err(InnerError::from)?);
        }

        Ok(())
    }

    fn dma_handle_dereg(&mut self) -> Result<(), InnerError> {
        if let Some(handle) = self.cur_dma_handle.take() {
            if let Some(dma) = self.dma.as_mut() {
                dma.deregister_handle(handle).map_err(InnerError::from)?;
            }
        }

        Ok(())
    }

    // ---- directory mode ----

    /// Create (or remove) this worker's per-rank dir inside each benchmark
    /// path, then iterate the configured number of dirs round-robin across
    /// the benchmark paths. Existing dirs on create are not an error;
    /// missing dirs on delete follow the ignore-delete-errors flag.
    fn dir_mode_iterate_dirs(&mut self) -> WorkerResult<()> {
        let phase = self.phase;
        let rank = self.handle.rank();
        let num_dirs = self.config.dirs;
        let num_paths = self.config.bench_path_fds().len();
        // in dir sharing mode, all workers create/delete the same dirs
        let ignore_del_errors = self.config.do_dir_sharing || self.config.ignore_del_errors;
        let worker_dir_rank = if self.config.do_dir_sharing { 0 } else { rank };

        self.handle.mark_got_phase_work();

        // create the rank dir inside each benchmark path
        if phase == BenchPhase::CreateDirs {
            for path_idx in 0..num_paths {
                self.handle.check_interrupt()?;
                self.make_dir_at(path_idx, &format!("r{worker_dir_rank}"), true)?;
            }
        }

        for dir_idx in 0..num_dirs {
            if dir_idx % INTERRUPTION_CHECK_INTERVAL == 0 {
                self.handle.check_interrupt()?;
            }

            let rel_path = format!("r{worker_dir_rank}/d{dir_idx}");
            let path_idx = (rank + dir_idx as usize) % num_paths;

            let io_start = Instant::now();

            match phase {
                BenchPhase::CreateDirs => self.make_dir_at(path_idx, &rel_path, true)?,
                BenchPhase::DeleteDirs => {
                    self.remove_dir_at(path_idx, &rel_path, ignore_del_errors)?
                }
                _ => {}
            }

            self.entries_latency
                .add_latency(io_start.elapsed().as_micros() as u64);

            self.handle.live_ops.add_entries(1);
        }

        // delete the rank dir inside each benchmark path
        if phase == BenchPhase::DeleteDirs {
            for path_idx in 0..num_paths {
                self.handle.check_interrupt()?;
                self.remove_dir_at(path_idx, &format!("r{worker_dir_rank}"), ignore_del_errors)?;
            }
        }

        Ok(())
    }

    /// Iterate this worker's dirs, filling each dir with all files before
    /// moving on. For create and read, each file is opened, run through
    /// the block-sized inner loop, checked for the expected byte count,
    /// and closed; the whole entry is timed into the entries histogram.
    fn dir_mode_iterate_files(&mut self) -> WorkerResult<()> {
        let phase = self.phase;
        let rank = self.handle.rank();
        let num_dirs = self.config.dirs;
        let num_files = self.config.files;
        let num_paths = self.config.bench_path_fds().len();
        let open_flags = self.dir_mode_open_flags(phase);
        let worker_dir_rank = if self.config.do_dir_sharing { 0 } else { rank };

        if num_dirs * num_files > 0 {
            self.handle.mark_got_phase_work();
        }

        for dir_idx in 0..num_dirs {
            if dir_idx % INTERRUPTION_CHECK_INTERVAL == 0 {
                self.handle.check_interrupt()?;
            }

            for file_idx in 0..num_files {
                if file_idx % INTERRUPTION_CHECK_INTERVAL == 0 {
                    self.handle.check_interrupt()?;
                }

                // shared dirs carry the owner's rank in the file leaf to
                // stay collision-free
                let rel_path = if self.config.do_dir_sharing {
                    format!("r{worker_dir_rank}/d{dir_idx}/r{rank}-f{file_idx}")
                } else {
                    format!("r{rank}/d{dir_idx}/f{file_idx}")
                };
                let path_idx = (rank + dir_idx as usize) % num_paths;

                if let Some(generator) = self.offset_gen.as_mut() {
                    generator.reset(); // reset for the next file
                }

                let io_start = Instant::now();

                match phase {
                    BenchPhase::CreateFiles | BenchPhase::ReadFiles => {
                        self.dir_mode_rw_file(phase, path_idx, &rel_path, open_flags)?;
                    }
                    BenchPhase::StatFiles => {
                        self.stat_file_at(path_idx, &rel_path)?;
                    }
                    BenchPhase::DeleteFiles => {
                        self.unlink_file_at(path_idx, &rel_path, self.config.ignore_del_errors)?;
                    }
                    _ => {}
                }

                // entry latency includes open, block-sized rw, and close
                self.entries_latency
                    .add_latency(io_start.elapsed().as_micros() as u64);

                self.handle.live_ops.add_entries(1);
            }
        }

        Ok(())
    }

    /// Open one file, run the inner rw loop against it, verify the byte
    /// count, and close it. The FD is guaranteed to be closed on error.
    fn dir_mode_rw_file(
        &mut self,
        phase: BenchPhase,
        path_idx: usize,
        rel_path: &str,
        open_flags: libc::c_int,
    ) -> WorkerResult<()> {
        let fd = self.dir_mode_open_and_prep_file(phase, path_idx, rel_path, open_flags)?;
        self.cur_fd = fd;

        let expected = self.gen_bytes_total();

        let handle_reg = self.funcs.handle_reg;
        let handle_dereg = self.funcs.handle_dereg;
        let rw_inner = self.funcs.rw_inner;

        let rw_result = (|| -> WorkerResult<()> {
            handle_reg(self, fd)
                .map_err(|err| self.map_inner_error(err, path_idx, rel_path, phase))?;

            let inner_result = rw_inner(self);
            self.map_rw_result(inner_result, expected, path_idx, rel_path, phase)?;

            handle_dereg(self)
                .map_err(|err| self.map_inner_error(err, path_idx, rel_path, phase))?;

            Ok(())
        })();

        self.cur_fd = -1;

        let close_res = unsafe { libc::close(fd) };

        rw_result?;

        if close_res == -1 {
            return Err(WorkerError::failed(format!(
                "File close failed. Path: {}; FD: {fd}; SysErr: {}",
                self.full_path_str(path_idx, rel_path),
                std::io::Error::last_os_error()
            )));
        }

        Ok(())
    }

    fn dir_mode_open_flags(&self, phase: BenchPhase) -> libc::c_int {
        let mut flags = if phase == BenchPhase::CreateFiles {
            let mut flags = libc::O_CREAT | libc::O_RDWR;
            if self.config.trunc {
                flags |= libc::O_TRUNC;
            }
            flags
        } else {
            libc::O_RDONLY
        };

        if self.config.direct {
            flags |= libc::O_DIRECT;
        }

        flags
    }

    /// Open a file relative to a benchmark path FD and prepare it for I/O
    /// (truncate/preallocate to the requested size). The FD is closed on
    /// preparation error.
    fn dir_mode_open_and_prep_file(
        &mut self,
        phase: BenchPhase,
        path_idx: usize,
        rel_path: &str,
        open_flags: libc::c_int,
    ) -> WorkerResult<RawFd> {
        let dir_fd = self.config.bench_path_fds()[path_idx].as_raw_fd();
        let c_path = rel_cstring(rel_path)?;

        let fd = unsafe { libc::openat(dir_fd, c_path.as_ptr(), open_flags, MKFILE_MODE as libc::c_uint) };

        if fd == -1 {
            return Err(WorkerError::failed(format!(
                "File open failed. Path: {}; SysErr: {}",
                self.full_path_str(path_idx, rel_path),
                std::io::Error::last_os_error()
            )));
        }

        let prep_result = (|| -> WorkerResult<()> {
            if phase != BenchPhase::CreateFiles {
                return Ok(());
            }

            if self.config.trunc_to_size {
                let res = unsafe { libc::ftruncate(fd, self.config.size as libc::off_t) };
                if res == -1 {
                    return Err(WorkerError::failed(format!(
                        "Unable to set file size through ftruncate. Path: {}; Size: {}; SysErr: {}",
                        self.full_path_str(path_idx, rel_path),
                        self.config.size,
                        std::io::Error::last_os_error()
                    )));
                }
            }

            if self.config.prealloc_file {
                // posix_fallocate returns the error instead of setting errno
                let res =
                    unsafe { libc::posix_fallocate(fd, 0, self.config.size as libc::off_t) };
                if res != 0 {
                    return Err(WorkerError::failed(format!(
                        "Unable to preallocate file through posix_fallocate. \
                         Path: {}; Size: {}; SysErr: {}",
                        self.full_path_str(path_idx, rel_path),
                        self.config.size,
                        std::io::Error::from_raw_os_error(res)
                    )));
                }
            }

            Ok(())
        })();

        if let Err(err) = prep_result {
            let close_res = unsafe { libc::close(fd) };
            if close_res == -1 {
                tracing::error!(
                    "File close failed. Path: {}; SysErr: {}",
                    self.full_path_str(path_idx, rel_path),
                    std::io::Error::last_os_error()
                );
            }

            return Err(err);
        }

        Ok(fd)
    }

    // ---- file/bdev mode ----

    /// Sequential file/bdev mode: this worker claims a contiguous,
    /// block-aligned range of the global blocks across all files (the last
    /// dataset thread absorbs the remainder) and drives a fresh sequential
    /// offset generator over the portion of each file in its range.
    fn file_mode_iterate_files_seq(&mut self) -> WorkerResult<()> {
        let phase = self.phase;
        let rank = self.handle.rank() as u64;
        let num_files = self.config.bench_path_fds().len() as u64;
        let file_size = self.config.size;
        let block_size = self.config.block;
        let num_threads = self.config.num_dataset_threads() as u64;

        if block_size == 0 || file_size == 0 {
            return Ok(());
        }

        let num_blocks_per_file = file_size / block_size + u64::from(file_size % block_size != 0);
        let num_blocks_total = num_blocks_per_file * num_files;
        let standard_worker_num_blocks = num_blocks_total / num_threads;

        // the last worker takes the remainder blocks on top
        let this_worker_num_blocks = if rank == num_threads - 1 && num_blocks_total % num_threads != 0
        {
            num_blocks_total - standard_worker_num_blocks * (num_threads - 1)
        } else {
            standard_worker_num_blocks
        };

        let start_block = rank * standard_worker_num_blocks;
        let end_block = start_block + this_worker_num_blocks;

        tracing::debug!(
            rank,
            num_files,
            num_blocks_total,
            start_block,
            end_block,
            "sequential file mode range"
        );

        if this_worker_num_blocks > 0 {
            self.handle.mark_got_phase_work();
        }

        let mut current_block = start_block;

        while current_block < end_block {
            let file_idx = (current_block / num_blocks_per_file) as usize;
            self.cur_fd = self.config.bench_path_fds()[file_idx].as_raw_fd();

            let block_in_file = current_block % num_blocks_per_file;
            let io_start_offset = block_in_file * block_size;

            let remaining_worker_len = (end_block - current_block) * block_size;
            let remaining_file_len = file_size - io_start_offset;
            let io_len = remaining_worker_len.min(remaining_file_len);

            // fresh generator scoped to this worker's portion of the file
            self.offset_gen = if self.config.use_reverse_seq_offsets {
                Some(Box::new(OffsetGenReverseSeq::new(
                    io_len,
                    io_start_offset,
                    block_size as usize,
                )))
            } else {
                Some(Box::new(OffsetGenSequential::new(
                    io_len,
                    io_start_offset,
                    block_size as usize,
                )))
            };

            let rw_inner = self.funcs.rw_inner;
            let inner_result = rw_inner(self);
            let rel_path = self.config.bench_paths()[file_idx].display().to_string();
            self.map_rw_result(inner_result, io_len, file_idx, &rel_path, phase)?;

            let blocks_done = io_len / block_size + u64::from(io_len % block_size != 0);
            current_block += blocks_done;
        }

        self.cur_fd = -1;

        Ok(())
    }

    /// Random file/bdev mode: one offset generator covers the configured
    /// range, the inner loop picks file descriptors round-robin per I/O.
    fn file_mode_iterate_files_rand(&mut self) -> WorkerResult<()> {
        let phase = self.phase;

        if self.gen_bytes_total() > 0 {
            self.handle.mark_got_phase_work();
        }

        let expected = self.gen_bytes_total();
        let rw_inner = self.funcs.rw_inner;
        let inner_result = rw_inner(self);

        let (path_idx, path_str) = match self.error_fd_idx {
            Some(idx) => (idx, self.config.bench_paths()[idx].display().to_string()),
            None => (0, "unavailable".to_string()),
        };

        self.map_rw_result(inner_result, expected, path_idx, &path_str, phase)
    }

    /// File mode delete: all workers attempt to unlink all files, starting
    /// at a rank-dependent index to spread the load; ENOENT is ignored.
    fn file_mode_delete_files(&mut self) -> WorkerResult<()> {
        let num_files = self.config.bench_paths().len();

        self.handle.mark_got_phase_work();

        for file_idx in 0..num_files {
            if file_idx as u64 % INTERRUPTION_CHECK_INTERVAL == 0 {
                self.handle.check_interrupt()?;
            }

            let path_idx = (self.handle.rank() + file_idx) % num_files;
            let path = &self.config.bench_paths()[path_idx];
            let c_path = path_cstring(path)?;

            let res = unsafe { libc::unlink(c_path.as_ptr()) };

            if res == -1 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(WorkerError::failed(format!(
                        "File delete failed. Path: {}; SysErr: {err}",
                        path.display()
                    )));
                }
            }

            self.handle.live_ops.add_entries(1);
        }

        Ok(())
    }

    // ---- sync and drop-caches phases ----

    /// Commit dirty pages to stable storage via syncfs on each benchmark
    /// path. The rank offset lets workers sync different file systems in
    /// parallel.
    fn any_mode_sync(&mut self) -> WorkerResult<()> {
        let fds = self.config.bench_path_fds();
        let num_paths = fds.len();

        for i in 0..num_paths {
            let current_idx = (i + self.handle.rank()) % num_paths;
            let fd = fds[current_idx].as_raw_fd();

            let res = unsafe { libc::syncfs(fd) };

            if res == -1 {
                return Err(WorkerError::failed(format!(
                    "Cache sync failed. Path: {}; SysErr: {}",
                    self.config.bench_paths()[current_idx].display(),
                    std::io::Error::last_os_error()
                )));
            }
        }

        Ok(())
    }

    /// Write "3" to /proc/sys/vm/drop_caches to drop page cache, dentries
    /// and inodes.
    fn any_mode_drop_caches(&mut self) -> WorkerResult<()> {
        let drop_path = "/proc/sys/vm/drop_caches";
        let c_path = rel_cstring(drop_path)?;

        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_WRONLY) };
        if fd == -1 {
            return Err(WorkerError::failed(format!(
                "Opening cache drop command file failed. Path: {drop_path}; SysErr: {}",
                std::io::Error::last_os_error()
            )));
        }

        let value = b"3";
        let res = unsafe { libc::write(fd, value.as_ptr() as *const libc::c_void, value.len()) };
        let write_err = std::io::Error::last_os_error();

        unsafe { libc::close(fd) };

        if res == -1 {
            return Err(WorkerError::failed(format!(
                "Writing to cache drop command file failed. Path: {drop_path}; SysErr: {write_err}"
            )));
        }

        Ok(())
    }

    // ---- error mapping and small syscall helpers ----

    /// Attach path context to an inner-loop outcome and enforce the
    /// expected byte count.
    fn map_rw_result(
        &mut self,
        result: Result<u64, InnerError>,
        expected: u64,
        path_idx: usize,
        rel_path: &str,
        phase: BenchPhase,
    ) -> WorkerResult<()> {
        let verb = if phase == BenchPhase::CreateFiles {
            "write"
        } else {
            "read"
        };

        match result {
            Ok(done) if done == expected => Ok(()),
            Ok(done) => Err(WorkerError::failed(format!(
                "Unexpected short file {verb}. Path: {}; Bytes {verb}: {done}; \
                 Expected {verb}: {expected}",
                self.full_path_str(path_idx, rel_path)
            ))),
            Err(err) => Err(self.map_inner_error(err, path_idx, rel_path, phase)),
        }
    }

    fn map_inner_error(
        &self,
        err: InnerError,
        path_idx: usize,
        rel_path: &str,
        phase: BenchPhase,
    ) -> WorkerError {
        let verb = if phase == BenchPhase::CreateFiles {
            "write"
        } else {
            "read"
        };

        match err {
            InnerError::Interrupted => WorkerError::Interrupted,
            InnerError::Sys(sys_err) => WorkerError::failed(format!(
                "File {verb} failed. Path: {}; SysErr: {sys_err}",
                self.full_path_str(path_idx, rel_path)
            )),
            InnerError::Verify(mismatch) => WorkerError::failed(format!(
                "Data verification failed. Path: {}; Offset: {}; Expected value: {}; \
                 Actual value: {}",
                self.full_path_str(path_idx, rel_path),
                mismatch.offset,
                mismatch.expected,
                mismatch.actual
            )),
            InnerError::Ring(msg) | InnerError::Capability(msg) => WorkerError::failed(msg),
        }
    }

    fn full_path_str(&self, path_idx: usize, rel_path: &str) -> String {
        match self.config.bench_paths().get(path_idx) {
            Some(base) if self.config.bench_path_type() == BenchPathType::Dir => {
                format!("{}/{rel_path}", base.display())
            }
            _ => rel_path.to_string(),
        }
    }

    fn make_dir_at(
        &self,
        path_idx: usize,
        rel_path: &str,
        ignore_exists: bool,
    ) -> WorkerResult<()> {
        let dir_fd = self.config.bench_path_fds()[path_idx].as_raw_fd();
        let c_path = rel_cstring(rel_path)?;

        let res = unsafe { libc::mkdirat(dir_fd, c_path.as_ptr(), MKDIR_MODE) };

        if res == -1 {
            let err = std::io::Error::last_os_error();
            if !(ignore_exists && err.raw_os_error() == Some(libc::EEXIST)) {
                return Err(WorkerError::failed(format!(
                    "Directory creation failed. Path: {}; SysErr: {err}",
                    self.full_path_str(path_idx, rel_path)
                )));
            }
        }

        Ok(())
    }

    fn remove_dir_at(
        &self,
        path_idx: usize,
        rel_path: &str,
        ignore_del_errors: bool,
    ) -> WorkerResult<()> {
        let dir_fd = self.config.bench_path_fds()[path_idx].as_raw_fd();
        let c_path = rel_cstring(rel_path)?;

        let res = unsafe { libc::unlinkat(dir_fd, c_path.as_ptr(), libc::AT_REMOVEDIR) };

        if res == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) || !ignore_del_errors {
                return Err(WorkerError::failed(format!(
                    "Directory deletion failed. Path: {}; SysErr: {err}",
                    self.full_path_str(path_idx, rel_path)
                )));
            }
        }

        Ok(())
    }

    fn stat_file_at(&self, path_idx: usize, rel_path: &str) -> WorkerResult<()> {
        let dir_fd = self.config.bench_path_fds()[path_idx].as_raw_fd();
        let c_path = rel_cstring(rel_path)?;
        let mut stat_buf = std::mem::MaybeUninit::<libc::stat>::uninit();

        let res = unsafe { libc::fstatat(dir_fd, c_path.as_ptr(), stat_buf.as_mut_ptr(), 0) };

        if res == -1 {
            return Err(WorkerError::failed(format!(
                "File stat failed. Path: {}; SysErr: {}",
                self.full_path_str(path_idx, rel_path),
                std::io::Error::last_os_error()
            )));
        }

        Ok(())
    }

    fn unlink_file_at(
        &self,
        path_idx: usize,
        rel_path: &str,
        ignore_del_errors: bool,
    ) -> WorkerResult<()> {
        let dir_fd = self.config.bench_path_fds()[path_idx].as_raw_fd();
        let c_path = rel_cstring(rel_path)?;

        let res = unsafe { libc::unlinkat(dir_fd, c_path.as_ptr(), 0) };

        if res == -1 {
            let err = std::io::Error::last_os_error();
            if !ignore_del_errors || err.raw_os_error() != Some(libc::ENOENT) {
                return Err(WorkerError::failed(format!(
                    "File delete failed. Path: {}; SysErr: {err}",
                    self.full_path_str(path_idx, rel_path)
                )));
            }
        }

        Ok(())
    }
}

fn rel_cstring(path: &str) -> WorkerResult<CString> {
    CString::new(path).map_err(|_| WorkerError::failed(format!("path contains NUL: {path}")))
}

fn path_cstring(path: &Path) -> WorkerResult<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| WorkerError::failed(format!("path contains NUL: {}", path.display())))
}
