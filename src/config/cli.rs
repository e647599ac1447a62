//! Command line interface
//!
//! The CLI produces a `BenchConfig`. Size-style arguments accept binary
//! unit suffixes (K/M/G/T/P/E), which are expanded here so that raw
//! integers are all that ever appears in the protocol JSON.

use super::{BenchConfig, DEFAULT_SERVICE_PORT, DEFAULT_SVC_UPDATE_INTERVAL_MS};
use crate::error::ConfigError;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "iosurge",
    version,
    about = "Distributed storage benchmark for file systems and block devices",
    after_help = "EXAMPLES:\n  \
        iosurge /mnt/bench -t 4 -n 2 -N 100 -s 1M -w -r --delfiles\n  \
        iosurge /dev/nvme0n1 -t 8 -b 4K --direct --iodepth 16 --rand -w\n  \
        iosurge --service\n  \
        iosurge /mnt/bench --hosts node1,node2 -t 8 -w -r"
)]
pub struct Cli {
    /// Benchmark path(s): directory, file, or block device.
    pub paths: Vec<String>,

    /// Number of worker threads; defaults to the number of logical CPUs.
    #[arg(short = 't', long, default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Number of directories per thread (directory mode).
    #[arg(short = 'n', long = "dirs", default_value_t = 1)]
    pub dirs: u64,

    /// Number of files per directory (directory mode).
    #[arg(short = 'N', long = "files", default_value_t = 1)]
    pub files: u64,

    /// File size (accepts K/M/G/T suffixes).
    #[arg(short = 's', long = "size", default_value = "0", value_parser = parse_size)]
    pub size: u64,

    /// Block size for read/write operations.
    #[arg(short = 'b', long = "block", default_value = "1M", value_parser = parse_size)]
    pub block: u64,

    /// Use direct IO (O_DIRECT), bypassing the page cache.
    #[arg(long)]
    pub direct: bool,

    /// Depth of the async submission queue; 1 selects the sync path.
    #[arg(long, default_value_t = 1)]
    pub iodepth: u64,

    /// Run the directory creation phase.
    #[arg(short = 'd', long)]
    pub mkdirs: bool,

    /// Run the directory deletion phase.
    #[arg(short = 'D', long)]
    pub deldirs: bool,

    /// Run the write (file creation) phase.
    #[arg(short = 'w', long = "write")]
    pub write: bool,

    /// Run the read phase.
    #[arg(short = 'r', long = "read")]
    pub read: bool,

    /// Run the file deletion phase.
    #[arg(short = 'F', long)]
    pub delfiles: bool,

    /// Run the file stat phase.
    #[arg(long)]
    pub statfiles: bool,

    /// Run a sync phase between benchmark phases.
    #[arg(long = "sync")]
    pub syncphase: bool,

    /// Drop the page cache between benchmark phases (needs root).
    #[arg(long)]
    pub dropcaches: bool,

    /// Share the rank-0 directories between all workers.
    #[arg(long)]
    pub dirsharing: bool,

    /// Walk sequential offsets backwards.
    #[arg(long)]
    pub backward: bool,

    /// Use random offsets.
    #[arg(long)]
    pub rand: bool,

    /// Align random offsets to the block size.
    #[arg(long)]
    pub randalign: bool,

    /// Total number of random bytes to read/write.
    #[arg(long, default_value = "0", value_parser = parse_size)]
    pub randamount: u64,

    /// Truncate files to zero on open for writing.
    #[arg(long)]
    pub trunc: bool,

    /// Set file size via ftruncate before writing.
    #[arg(long)]
    pub trunctosize: bool,

    /// Preallocate file disk space before writing.
    #[arg(long)]
    pub preallocfile: bool,

    /// Ignore "not found" errors in deletion phases.
    #[arg(long)]
    pub nodelerr: bool,

    /// Tolerate phases that finish in less than a microsecond.
    #[arg(long)]
    pub no0usecerr: bool,

    /// Show per-thread instead of aggregate results.
    #[arg(long)]
    pub perthread: bool,

    /// Data integrity check salt (0 disables verification).
    #[arg(long, default_value_t = 0)]
    pub verify: u64,

    /// Read each block back and verify it right after writing it.
    #[arg(long)]
    pub verifydirect: bool,

    /// Percentage of reads mixed into the write phase.
    #[arg(long, default_value_t = 0)]
    pub rwmixpct: u64,

    /// Percentage of write buffers refilled with fresh random data.
    #[arg(long, default_value_t = 0)]
    pub blockvarpct: u64,

    /// Phase time limit in seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    pub timelimit: u64,

    /// Per-thread read throughput limit in bytes/s (accepts suffixes).
    #[arg(long, default_value = "0", value_parser = parse_size)]
    pub limitread: u64,

    /// Per-thread write throughput limit in bytes/s (accepts suffixes).
    #[arg(long, default_value = "0", value_parser = parse_size)]
    pub limitwrite: u64,

    /// Offset for worker rank numbering.
    #[arg(long, default_value_t = 0)]
    pub rankoffset: u64,

    /// Comma-separated service hosts ("host" or "host:port"); enables
    /// master mode.
    #[arg(long)]
    pub hosts: Option<String>,

    /// Run as a service process for a remote master.
    #[arg(long)]
    pub service: bool,

    /// TCP port of the service (both for --service and for --hosts entries
    /// without an explicit port).
    #[arg(long, default_value_t = DEFAULT_SERVICE_PORT)]
    pub port: u16,

    /// Interval between service status polls in milliseconds.
    #[arg(long = "svcupdateinterval", default_value_t = DEFAULT_SVC_UPDATE_INTERVAL_MS, env = "IOSURGE_SVC_UPDATE_INTERVAL_MS")]
    pub svc_update_interval_ms: u64,

    /// Tell the given service hosts to interrupt their current phase.
    #[arg(long)]
    pub interrupt: bool,

    /// Tell the given service hosts to interrupt and shut down.
    #[arg(long)]
    pub quit: bool,

    /// Stage IO buffers through device memory.
    #[arg(long)]
    pub cufile: bool,

    /// Register device buffers for DMA.
    #[arg(long)]
    pub gdsbufreg: bool,

    /// Explicitly open the device driver at startup.
    #[arg(long)]
    pub cufiledriveropen: bool,

    /// Register host buffers with the device for pinned transfers.
    #[arg(long)]
    pub cuhostbufreg: bool,

    /// Comma-separated device IDs, assigned round-robin by worker rank.
    #[arg(long, default_value = "")]
    pub gpuids: String,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build a validated `BenchConfig`. Paths are not opened here.
    pub fn into_config(self) -> Result<BenchConfig, ConfigError> {
        let hosts = match &self.hosts {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(|h| {
                    if h.contains(':') {
                        h.to_string()
                    } else {
                        format!("{h}:{}", self.port)
                    }
                })
                .collect(),
            None => Vec::new(),
        };

        let mut config = BenchConfig {
            path: self.paths.join(","),
            threads: self.threads,
            dataset_threads: 0,
            dirs: self.dirs,
            files: self.files,
            size: self.size,
            block: self.block,
            direct: self.direct,
            trunc: self.trunc,
            trunc_to_size: self.trunctosize,
            prealloc_file: self.preallocfile,
            show_per_thread: self.perthread,
            ignore_del_errors: self.nodelerr,
            ignore_zero_usec_errors: self.no0usecerr,
            run_create_dirs: self.mkdirs,
            run_delete_dirs: self.deldirs,
            run_create_files: self.write,
            run_read_files: self.read,
            run_delete_files: self.delfiles,
            run_stat_files: self.statfiles,
            run_sync_phase: self.syncphase,
            run_drop_caches: self.dropcaches,
            do_dir_sharing: self.dirsharing,
            use_reverse_seq_offsets: self.backward,
            use_random_offsets: self.rand,
            use_random_aligned: self.randalign,
            random_amount: self.randamount,
            io_depth: self.iodepth,
            rank_offset: self.rankoffset,
            integrity_check_salt: self.verify,
            verify_direct: self.verifydirect,
            rwmix_percent: self.rwmixpct,
            block_variance_percent: self.blockvarpct,
            time_limit_secs: self.timelimit,
            limit_read_bps: self.limitread,
            limit_write_bps: self.limitwrite,
            use_device_staging: self.cufile,
            use_device_buf_reg: self.gdsbufreg,
            use_device_driver_open: self.cufiledriveropen,
            use_host_buf_reg: self.cuhostbufreg,
            device_ids: self.gpuids,
            hosts,
            service_port: self.port,
            svc_update_interval_ms: self.svc_update_interval_ms,
            run_as_service: self.service,
            ..Default::default()
        };

        config.validate()?;

        Ok(config)
    }
}

/// Parse a size argument with optional binary unit suffix (K/M/G/T/P/E).
pub fn parse_size(arg: &str) -> Result<u64, String> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Err("empty size value".to_string());
    }

    let (digits, shift) = match arg.chars().last() {
        Some(suffix) if suffix.is_ascii_alphabetic() => {
            let shift = match suffix.to_ascii_uppercase() {
                'K' => 10,
                'M' => 20,
                'G' => 30,
                'T' => 40,
                'P' => 50,
                'E' => 60,
                other => return Err(format!("unknown size suffix: {other}")),
            };
            (&arg[..arg.len() - 1], shift)
        }
        _ => (arg, 0),
    };

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size value: {arg}"))?;

    value
        .checked_shl(shift)
        .filter(|_| value.leading_zeros() >= shift)
        .ok_or_else(|| format!("size value out of range: {arg}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_plain() {
        assert_eq!(parse_size("0").unwrap(), 0);
        assert_eq!(parse_size("4096").unwrap(), 4096);
    }

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("4K").unwrap(), 4096);
        assert_eq!(parse_size("4k").unwrap(), 4096);
        assert_eq!(parse_size("1M").unwrap(), 1 << 20);
        assert_eq!(parse_size("2G").unwrap(), 2 << 30);
        assert_eq!(parse_size("1T").unwrap(), 1 << 40);
        assert_eq!(parse_size("1E").unwrap(), 1 << 60);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("1X").is_err());
        assert!(parse_size("99999999999999999999999").is_err());
    }

    #[test]
    fn test_parse_size_rejects_overflow() {
        assert!(parse_size("1024E").is_err());
    }

    #[test]
    fn test_cli_to_config() {
        let cli = Cli::try_parse_from([
            "iosurge", "/tmp/bench", "-t", "2", "-n", "3", "-N", "4", "-s", "1M", "-b", "128K",
            "-w", "-r",
        ])
        .unwrap();

        let config = cli.into_config().unwrap();
        assert_eq!(config.path, "/tmp/bench");
        assert_eq!(config.threads, 2);
        assert_eq!(config.dirs, 3);
        assert_eq!(config.files, 4);
        assert_eq!(config.size, 1 << 20);
        assert_eq!(config.block, 128 << 10);
        assert!(config.run_create_files);
        assert!(config.run_read_files);
        assert!(!config.run_delete_files);
    }

    #[test]
    fn test_cli_threads_default_to_cpu_count() {
        let cli = Cli::try_parse_from(["iosurge", "/tmp/bench", "-w"]).unwrap();
        assert_eq!(cli.threads, num_cpus::get());

        let config = cli.into_config().unwrap();
        assert_eq!(config.threads, num_cpus::get());
    }

    #[test]
    fn test_cli_hosts_get_default_port() {
        let cli = Cli::try_parse_from([
            "iosurge", "/tmp/bench", "--hosts", "node1,node2:9999", "--port", "1234", "-w",
        ])
        .unwrap();

        let config = cli.into_config().unwrap();
        assert_eq!(config.hosts, vec!["node1:1234", "node2:9999"]);
        assert!(config.is_master());
    }

    #[test]
    fn test_cli_multiple_paths_joined() {
        let cli = Cli::try_parse_from(["iosurge", "/a", "/b", "-w"]).unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.path, "/a,/b");
    }
}
