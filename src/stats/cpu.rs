//! CPU utilization snapshots
//!
//! Reads the aggregate cpu line of /proc/stat. `update()` is called at the
//! start and end of the interval of interest (phase start, first finisher,
//! last finisher); `percent()` reports utilization over the last interval.

use std::fs;

/// Two consecutive /proc/stat cpu-time samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuUtil {
    last_idle: u64,
    last_total: u64,
    current_idle: u64,
    current_total: u64,
}

// index of idle and iowait columns in the /proc/stat cpu line
const STAT_CPU_IDLE_IDX: usize = 3;
const STAT_CPU_IOWAIT_IDX: usize = 4;

impl CpuUtil {
    /// Rotate the current sample to last and take a fresh sample. A missing
    /// or unparsable /proc/stat (non-Linux test environments) leaves the
    /// counters untouched, so percent() degrades to 0.
    pub fn update(&mut self) {
        let Some((idle, total)) = read_proc_stat_times() else {
            tracing::debug!("unable to read cpu times from /proc/stat");
            return;
        };

        self.last_idle = self.current_idle;
        self.last_total = self.current_total;

        self.current_idle = idle;
        self.current_total = total;
    }

    /// Utilization percent (0-100) across the interval between the two most
    /// recent update() calls.
    pub fn percent(&self) -> u32 {
        let total_delta = self.current_total.saturating_sub(self.last_total);
        let idle_delta = self.current_idle.saturating_sub(self.last_idle);

        if total_delta == 0 {
            return 0;
        }

        let busy = total_delta.saturating_sub(idle_delta);
        ((busy * 100) / total_delta) as u32
    }
}

/// (idle incl. iowait, total) jiffies from the aggregate cpu line.
fn read_proc_stat_times() -> Option<(u64, u64)> {
    let content = fs::read_to_string("/proc/stat").ok()?;
    let cpu_line = content.lines().next()?;

    let times: Vec<u64> = cpu_line
        .split_whitespace()
        .skip(1) // the "cpu" prefix
        .filter_map(|field| field.parse().ok())
        .collect();

    if times.len() <= STAT_CPU_IOWAIT_IDX {
        return None;
    }

    let idle = times[STAT_CPU_IDLE_IDX] + times[STAT_CPU_IOWAIT_IDX];
    let total = times.iter().sum();

    Some((idle, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_zero_without_samples() {
        let cpu = CpuUtil::default();
        assert_eq!(cpu.percent(), 0);
    }

    #[test]
    fn test_percent_from_synthetic_samples() {
        let cpu = CpuUtil {
            last_idle: 100,
            last_total: 1000,
            current_idle: 150,
            current_total: 1200,
        };

        // 200 total jiffies elapsed, 50 idle => 75% busy
        assert_eq!(cpu.percent(), 75);
    }

    #[test]
    fn test_percent_bounded() {
        let cpu = CpuUtil {
            last_idle: 0,
            last_total: 0,
            current_idle: 0,
            current_total: 500,
        };
        assert!(cpu.percent() <= 100);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_update_reads_proc_stat() {
        let mut cpu = CpuUtil::default();
        cpu.update();
        cpu.update();
        // two samples taken, percent must be a valid percentage
        assert!(cpu.percent() <= 100);
    }
}
