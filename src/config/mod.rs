//! Benchmark configuration
//!
//! `BenchConfig` is what the CLI produces and what travels as JSON to
//! service hosts on `/preparephase`. The serialized field names are the
//! protocol keys; unknown keys are rejected. Master-side settings (host
//! list, service port, poll interval) never go over the wire.
//!
//! The config also owns the benchmark-path file descriptors: directory FDs
//! in directory mode (workers open files relative to them), shared file or
//! block-device FDs in file/bdev mode (workers use them without closing).

pub mod cli;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

/// What kind of target the benchmark paths point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BenchPathType {
    /// Directory tree: workers create their own dirs/files beneath it.
    Dir = 0,
    /// Regular file shared by all workers.
    File = 1,
    /// Raw block device shared by all workers.
    BlockDev = 2,
}

impl BenchPathType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Dir),
            1 => Some(Self::File),
            2 => Some(Self::BlockDev),
            _ => None,
        }
    }
}

impl fmt::Display for BenchPathType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dir => write!(f, "dir"),
            Self::File => write!(f, "file"),
            Self::BlockDev => write!(f, "blockdev"),
        }
    }
}

/// Opened benchmark paths. Built by `open_bench_paths()`, dropped between
/// service runs so a new prepare request starts clean.
#[derive(Debug)]
pub(crate) struct PathState {
    paths: Vec<PathBuf>,
    path_type: BenchPathType,
    fds: Vec<OwnedFd>,
}

/// The benchmark configuration, immutable for the duration of a phase.
///
/// Serialized form (JSON) is the remote-control protocol config document.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BenchConfig {
    /// Comma-separated absolute benchmark paths.
    pub path: String,

    /// Local worker thread count. The CLI defaults this to the number of
    /// logical CPUs; the wire default stays 1 so a config document missing
    /// the key behaves the same on every service host.
    pub threads: usize,

    /// Number of threads across all services that share the dataset.
    /// 0 means "derive": local threads, or threads x hosts in master mode.
    #[serde(rename = "datasetthreads")]
    pub dataset_threads: usize,

    /// Directories per worker in directory mode.
    pub dirs: u64,

    /// Files per directory in directory mode.
    pub files: u64,

    /// File size in bytes.
    pub size: u64,

    /// Block size in bytes.
    pub block: u64,

    pub direct: bool,

    /// Truncate files to zero on open for writing.
    pub trunc: bool,

    /// ftruncate files to the configured size before writing.
    #[serde(rename = "trunctosize")]
    pub trunc_to_size: bool,

    /// posix_fallocate files to the configured size before writing.
    #[serde(rename = "preallocfile")]
    pub prealloc_file: bool,

    /// Show per-thread instead of aggregate results.
    #[serde(rename = "perthread")]
    pub show_per_thread: bool,

    /// Ignore ENOENT in delete phases.
    #[serde(rename = "nodelerr")]
    pub ignore_del_errors: bool,

    /// Tolerate phases that finish in 0 microseconds (timer granularity).
    #[serde(rename = "no0usecerr")]
    pub ignore_zero_usec_errors: bool,

    // which phases to run
    #[serde(rename = "mkdirs")]
    pub run_create_dirs: bool,
    #[serde(rename = "deldirs")]
    pub run_delete_dirs: bool,
    #[serde(rename = "write")]
    pub run_create_files: bool,
    #[serde(rename = "read")]
    pub run_read_files: bool,
    #[serde(rename = "delfiles")]
    pub run_delete_files: bool,
    #[serde(rename = "statfiles")]
    pub run_stat_files: bool,
    #[serde(rename = "syncphase")]
    pub run_sync_phase: bool,
    #[serde(rename = "dropcaches")]
    pub run_drop_caches: bool,

    /// Share the rank-0 directories between all workers instead of giving
    /// each worker its own tree.
    #[serde(rename = "dirsharing")]
    pub do_dir_sharing: bool,

    /// Walk sequential offsets backwards (from the end of each range).
    #[serde(rename = "backward")]
    pub use_reverse_seq_offsets: bool,

    #[serde(rename = "rand")]
    pub use_random_offsets: bool,
    #[serde(rename = "randalign")]
    pub use_random_aligned: bool,
    /// Total random bytes per file (file/bdev mode) or per worker file
    /// range (dir mode); divided by the dataset thread count.
    #[serde(rename = "randamount")]
    pub random_amount: u64,

    #[serde(rename = "iodepth")]
    pub io_depth: u64,

    /// First worker rank of this process (nonzero on service hosts).
    #[serde(rename = "rankoffset")]
    pub rank_offset: u64,

    /// Data integrity check salt; 0 disables the check.
    #[serde(rename = "verify")]
    pub integrity_check_salt: u64,

    /// Read each block back and verify it right after writing it.
    #[serde(rename = "verifydirect")]
    pub verify_direct: bool,

    /// Percentage of reads interleaved into the write phase.
    #[serde(rename = "rwmixpct")]
    pub rwmix_percent: u64,

    /// Percentage of write buffers refilled with fresh random content.
    #[serde(rename = "blockvarpct")]
    pub block_variance_percent: u64,

    /// Phase time limit in seconds; 0 disables.
    #[serde(rename = "timelimit")]
    pub time_limit_secs: u64,

    /// Per-thread read throughput limit in bytes/s; 0 disables.
    #[serde(rename = "limitread")]
    pub limit_read_bps: u64,

    /// Per-thread write throughput limit in bytes/s; 0 disables.
    #[serde(rename = "limitwrite")]
    pub limit_write_bps: u64,

    // device capability flags (names fixed by the protocol)
    #[serde(rename = "cufile")]
    pub use_device_staging: bool,
    #[serde(rename = "gdsbufreg")]
    pub use_device_buf_reg: bool,
    #[serde(rename = "cufiledriveropen")]
    pub use_device_driver_open: bool,
    #[serde(rename = "cuhostbufreg")]
    pub use_host_buf_reg: bool,
    /// Comma-separated device IDs, assigned to workers round-robin by rank.
    #[serde(rename = "gpuids")]
    pub device_ids: String,

    // master-side settings, never sent to services
    #[serde(skip)]
    pub hosts: Vec<String>,
    #[serde(skip)]
    pub service_port: u16,
    #[serde(skip)]
    pub svc_update_interval_ms: u64,
    #[serde(skip)]
    pub run_as_service: bool,

    #[serde(skip)]
    pub(crate) state: Option<PathState>,
}

pub const DEFAULT_SERVICE_PORT: u16 = 1611;
pub const DEFAULT_SVC_UPDATE_INTERVAL_MS: u64 = 500;

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            threads: 1,
            dataset_threads: 0,
            dirs: 1,
            files: 1,
            size: 0,
            block: 1 << 20,
            direct: false,
            trunc: false,
            trunc_to_size: false,
            prealloc_file: false,
            show_per_thread: false,
            ignore_del_errors: false,
            ignore_zero_usec_errors: false,
            run_create_dirs: false,
            run_delete_dirs: false,
            run_create_files: false,
            run_read_files: false,
            run_delete_files: false,
            run_stat_files: false,
            run_sync_phase: false,
            run_drop_caches: false,
            do_dir_sharing: false,
            use_reverse_seq_offsets: false,
            use_random_offsets: false,
            use_random_aligned: false,
            random_amount: 0,
            io_depth: 1,
            rank_offset: 0,
            integrity_check_salt: 0,
            verify_direct: false,
            rwmix_percent: 0,
            block_variance_percent: 0,
            time_limit_secs: 0,
            limit_read_bps: 0,
            limit_write_bps: 0,
            use_device_staging: false,
            use_device_buf_reg: false,
            use_device_driver_open: false,
            use_host_buf_reg: false,
            device_ids: String::new(),
            hosts: Vec::new(),
            service_port: DEFAULT_SERVICE_PORT,
            svc_update_interval_ms: DEFAULT_SVC_UPDATE_INTERVAL_MS,
            run_as_service: false,
            state: None,
        }
    }
}

impl BenchConfig {
    /// Parse a config document received on `/preparephase`. Unknown keys
    /// are rejected by serde.
    pub fn from_wire_json(json: &[u8]) -> Result<Self, ConfigError> {
        let mut config: BenchConfig = serde_json::from_slice(json)
            .map_err(|err| ConfigError::new(format!("config document rejected: {err}")))?;

        config.run_as_service = true;
        config.validate()?;

        Ok(config)
    }

    /// The config document sent to the service with the given worker rank
    /// in master mode: per-host rank offset and the cross-service dataset
    /// thread count are filled in.
    pub fn wire_json_for_host(&self, worker_rank: usize) -> Result<serde_json::Value, ConfigError> {
        let mut value = serde_json::to_value(self)
            .map_err(|err| ConfigError::new(format!("config serialization failed: {err}")))?;

        let object = value
            .as_object_mut()
            .ok_or_else(|| ConfigError::new("config did not serialize to an object"))?;

        object.insert(
            "rankoffset".to_string(),
            serde_json::json!(self.rank_offset + (worker_rank * self.threads) as u64),
        );
        object.insert(
            "datasetthreads".to_string(),
            serde_json::json!(self.num_dataset_threads()),
        );

        Ok(value)
    }

    /// Validate and normalize. Must be called before paths are opened.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.path.trim().is_empty() {
            return Err(ConfigError::new("no benchmark path given"));
        }

        if self.threads == 0 {
            return Err(ConfigError::new("number of threads must not be zero"));
        }

        if self.io_depth == 0 {
            return Err(ConfigError::new("IO depth must not be zero"));
        }

        if self.size > 0 && self.block == 0 {
            return Err(ConfigError::new(
                "block size 0 is only allowed with file size 0",
            ));
        }

        // silently requested block sizes beyond the file size make no
        // progress, so clamp with a diagnostic
        if self.size > 0 && self.block > self.size {
            tracing::warn!(
                block = self.block,
                file_size = self.size,
                "block size exceeds file size, falling back to block = file size"
            );
            self.block = self.size;
        }

        if self.verify_direct && self.integrity_check_salt == 0 {
            return Err(ConfigError::new(
                "direct verification requires an integrity check salt",
            ));
        }

        if self.rwmix_percent > 100 {
            return Err(ConfigError::new("rwmix read percentage exceeds 100"));
        }

        if self.block_variance_percent > 100 {
            return Err(ConfigError::new("block variance percentage exceeds 100"));
        }

        if self.use_random_offsets && self.block == 0 {
            return Err(ConfigError::new("random offsets require a nonzero block size"));
        }

        if self.use_reverse_seq_offsets && self.use_random_offsets {
            return Err(ConfigError::new(
                "backward offsets and random offsets are mutually exclusive",
            ));
        }

        if self.use_random_offsets && self.random_amount == 0 {
            // default to one file size worth of random data
            self.random_amount = self.size;
        }

        if (self.use_device_buf_reg || self.use_host_buf_reg || self.use_device_driver_open)
            && !self.use_device_staging
        {
            return Err(ConfigError::new(
                "device buffer/handle registration requires device staging",
            ));
        }

        if self.use_device_staging && self.device_id_list()?.is_empty() {
            return Err(ConfigError::new("device staging requires device IDs"));
        }

        Ok(())
    }

    /// Parse the comma-separated path list, detect the benchmark path type,
    /// and open one FD per path. Skipped in master mode (services open
    /// their own paths).
    pub fn open_bench_paths(&mut self) -> Result<(), ConfigError> {
        let paths: Vec<PathBuf> = self
            .path
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();

        if paths.is_empty() {
            return Err(ConfigError::new("no benchmark path given"));
        }

        let path_type = self.detect_path_type(&paths)?;

        let mut fds = Vec::with_capacity(paths.len());
        for path in &paths {
            fds.push(self.open_one_path(path, path_type)?);
        }

        tracing::debug!(?path_type, num_paths = paths.len(), "benchmark paths opened");

        self.state = Some(PathState { paths, path_type, fds });

        Ok(())
    }

    fn detect_path_type(&self, paths: &[PathBuf]) -> Result<BenchPathType, ConfigError> {
        let mut detected: Option<BenchPathType> = None;

        for path in paths {
            let path_type = match std::fs::metadata(path) {
                Ok(meta) => {
                    use std::os::unix::fs::FileTypeExt;

                    if meta.is_dir() {
                        BenchPathType::Dir
                    } else if meta.file_type().is_block_device() {
                        BenchPathType::BlockDev
                    } else if meta.is_file() {
                        BenchPathType::File
                    } else {
                        return Err(ConfigError::new(format!(
                            "unsupported file type for benchmark path: {}",
                            path.display()
                        )));
                    }
                }
                // nonexistent paths are files-to-be-created in a write run
                Err(_) if self.run_create_files => BenchPathType::File,
                Err(err) => {
                    return Err(ConfigError::new(format!(
                        "unable to access benchmark path: {}; SysErr: {err}",
                        path.display()
                    )));
                }
            };

            match detected {
                None => detected = Some(path_type),
                Some(previous) if previous != path_type => {
                    return Err(ConfigError::new(format!(
                        "conflicting benchmark path types: {previous} vs {path_type}"
                    )));
                }
                Some(_) => {}
            }
        }

        detected.ok_or_else(|| ConfigError::new("no benchmark path given"))
    }

    fn open_one_path(
        &self,
        path: &PathBuf,
        path_type: BenchPathType,
    ) -> Result<OwnedFd, ConfigError> {
        let mut flags = match path_type {
            BenchPathType::Dir => libc::O_DIRECTORY | libc::O_RDONLY,
            BenchPathType::File | BenchPathType::BlockDev => libc::O_RDWR,
        };

        if path_type == BenchPathType::File && self.run_create_files {
            flags |= libc::O_CREAT;
        }

        if self.direct && path_type != BenchPathType::Dir {
            flags |= libc::O_DIRECT;
        }

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| ConfigError::new(format!("path contains NUL: {}", path.display())))?;

        let fd = unsafe { libc::open(c_path.as_ptr(), flags, 0o644) };
        if fd == -1 {
            return Err(ConfigError::new(format!(
                "unable to open benchmark path: {}; SysErr: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }

        let owned = unsafe { OwnedFd::from_raw_fd(fd) };

        // size preparation for shared files happens once at open, not in
        // the measured phase
        if path_type == BenchPathType::File && self.run_create_files && self.size > 0 {
            if self.trunc_to_size {
                let res = unsafe { libc::ftruncate(fd, self.size as libc::off_t) };
                if res == -1 {
                    return Err(ConfigError::new(format!(
                        "unable to set file size through ftruncate. Path: {}; Size: {}; SysErr: {}",
                        path.display(),
                        self.size,
                        std::io::Error::last_os_error()
                    )));
                }
            }

            if self.prealloc_file {
                // posix_fallocate returns the error instead of setting errno
                let res = unsafe { libc::posix_fallocate(fd, 0, self.size as libc::off_t) };
                if res != 0 {
                    return Err(ConfigError::new(format!(
                        "unable to preallocate file. Path: {}; Size: {}; SysErr: {}",
                        path.display(),
                        self.size,
                        std::io::Error::from_raw_os_error(res)
                    )));
                }
            }
        }

        Ok(owned)
    }

    /// Close benchmark path FDs and forget the parsed paths. The service
    /// calls this between benchmark runs.
    pub fn reset_bench_paths(&mut self) {
        self.state = None;
    }

    pub fn bench_paths(&self) -> &[PathBuf] {
        self.state.as_ref().map(|s| s.paths.as_slice()).unwrap_or(&[])
    }

    pub fn bench_path_fds(&self) -> &[OwnedFd] {
        self.state.as_ref().map(|s| s.fds.as_slice()).unwrap_or(&[])
    }

    /// Path type; only meaningful after `open_bench_paths()` (or, on a
    /// master, after services reported theirs).
    pub fn bench_path_type(&self) -> BenchPathType {
        self.state.as_ref().map(|s| s.path_type).unwrap_or(BenchPathType::Dir)
    }

    /// Running as master of remote services?
    pub fn is_master(&self) -> bool {
        !self.hosts.is_empty()
    }

    /// Number of threads sharing the dataset: explicit value if given,
    /// otherwise derived from threads and hosts.
    pub fn num_dataset_threads(&self) -> usize {
        if self.dataset_threads > 0 {
            return self.dataset_threads;
        }

        if self.is_master() {
            self.threads * self.hosts.len()
        } else {
            self.threads
        }
    }

    pub fn device_id_list(&self) -> Result<Vec<u32>, ConfigError> {
        self.device_ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| ConfigError::new(format!("invalid device ID: {s}")))
            })
            .collect()
    }

    /// Phases to run, in benchmark order.
    pub fn phase_sequence(&self) -> Vec<crate::phase::BenchPhase> {
        use crate::phase::BenchPhase;

        let mut phases = Vec::new();

        if self.run_create_dirs {
            phases.push(BenchPhase::CreateDirs);
        }
        if self.run_create_files {
            phases.push(BenchPhase::CreateFiles);
        }
        if self.run_read_files {
            phases.push(BenchPhase::ReadFiles);
        }
        if self.run_stat_files {
            phases.push(BenchPhase::StatFiles);
        }
        if self.run_delete_files {
            phases.push(BenchPhase::DeleteFiles);
        }
        if self.run_delete_dirs {
            phases.push(BenchPhase::DeleteDirs);
        }

        phases
    }
}
