//! Statistics: live counters, latency histograms, CPU utilization, and
//! phase-result aggregation.
//!
//! Workers feed `AtomicLiveOps` and per-worker histograms; the manager sums
//! them into a `PhaseResults` when a phase completes. The stonewall rule
//! gives two result columns: "first done" uses the per-worker counter
//! snapshots taken the moment the first worker finished, "last done" uses
//! the final counters.

pub mod cpu;
pub mod histogram;
pub mod live;

pub use cpu::CpuUtil;
pub use histogram::LatencyHistogram;
pub use live::{AtomicLiveOps, LiveOps};

use crate::phase::BenchPhase;

/// Aggregated results of one completed phase across all workers.
#[derive(Debug, Clone)]
pub struct PhaseResults {
    pub phase: BenchPhase,
    /// Sum of final live counters.
    pub total_ops: LiveOps,
    /// Sum of rw-mix read counters (create-files phase with rwmix only).
    pub total_rwmix_read_ops: LiveOps,
    /// Sum of stonewall snapshots (counters at the first finisher's moment).
    pub stonewall_ops: LiveOps,
    pub stonewall_rwmix_read_ops: LiveOps,
    /// Fastest finisher's elapsed time.
    pub first_elapsed_usec: u64,
    /// Slowest finisher's elapsed time.
    pub last_elapsed_usec: u64,
    pub iops_latency: LatencyHistogram,
    pub entries_latency: LatencyHistogram,
    pub cpu_util_stonewall: u32,
    pub cpu_util_last: u32,
    /// Expected totals, for the progress percentage.
    pub expected_ops: LiveOps,
}

impl PhaseResults {
    /// Percent of the expected entries (or bytes for pure-IO phases) done.
    pub fn percent_done(&self) -> u64 {
        if self.expected_ops.entries_done > 0 {
            (self.total_ops.entries_done * 100) / self.expected_ops.entries_done
        } else if self.expected_ops.bytes_done > 0 {
            (self.total_ops.bytes_done * 100) / self.expected_ops.bytes_done
        } else {
            100
        }
    }
}

const RESULT_LABEL_WIDTH: usize = 20;
const RESULT_COL_WIDTH: usize = 12;

/// Print the two-column result table header.
pub fn print_results_table_header() {
    println!(
        "{:<10} {:<l$} {:>c$} {:>c$}",
        "OPERATION",
        "RESULT TYPE",
        "FIRST DONE",
        "LAST DONE",
        l = RESULT_LABEL_WIDTH,
        c = RESULT_COL_WIDTH,
    );
    println!(
        "{:=<10} {:=<l$} {:=>c$} {:=>c$}",
        "",
        "",
        "",
        "",
        l = RESULT_LABEL_WIDTH,
        c = RESULT_COL_WIDTH,
    );
}

fn print_result_row(op: &str, label: &str, first: impl std::fmt::Display, last: impl std::fmt::Display) {
    println!(
        "{:<10} {:<l$} {:>c$} {:>c$}",
        op,
        label,
        first,
        last,
        l = RESULT_LABEL_WIDTH,
        c = RESULT_COL_WIDTH,
    );
}

/// Print the aggregated results of one phase as table rows.
pub fn print_phase_results(results: &PhaseResults) {
    let op = results.phase.name();

    let first_usec = results.first_elapsed_usec;
    let last_usec = results.last_elapsed_usec;

    print_result_row(op, "Elapsed time ms", first_usec / 1000, last_usec / 1000);

    if results.total_ops.entries_done > 0 {
        let label = format!("{}/s", results.phase.entry_type());
        print_result_row(
            op,
            &label,
            results.stonewall_ops.per_sec_from_usec(first_usec).entries_done,
            results.total_ops.per_sec_from_usec(last_usec).entries_done,
        );
        print_result_row(
            op,
            &format!("{} total", results.phase.entry_type()),
            results.stonewall_ops.entries_done,
            results.total_ops.entries_done,
        );
    }

    if results.total_ops.iops_done > 0 {
        print_result_row(
            op,
            "IOPS",
            results.stonewall_ops.per_sec_from_usec(first_usec).iops_done,
            results.total_ops.per_sec_from_usec(last_usec).iops_done,
        );
        print_result_row(
            op,
            "Throughput MiB/s",
            results.stonewall_ops.per_sec_from_usec(first_usec).bytes_done >> 20,
            results.total_ops.per_sec_from_usec(last_usec).bytes_done >> 20,
        );
        print_result_row(
            op,
            "Total MiB",
            results.stonewall_ops.bytes_done >> 20,
            results.total_ops.bytes_done >> 20,
        );
    }

    if !results.total_rwmix_read_ops.is_zero() {
        print_result_row(
            op,
            "Read IOPS (rwmix)",
            results.stonewall_rwmix_read_ops.per_sec_from_usec(first_usec).iops_done,
            results.total_rwmix_read_ops.per_sec_from_usec(last_usec).iops_done,
        );
        print_result_row(
            op,
            "Read MiB (rwmix)",
            results.stonewall_rwmix_read_ops.bytes_done >> 20,
            results.total_rwmix_read_ops.bytes_done >> 20,
        );
    }

    print_latency_rows(op, "IO", &results.iops_latency);
    print_latency_rows(op, "Entry", &results.entries_latency);

    print_result_row(op, "CPU util %", results.cpu_util_stonewall, results.cpu_util_last);

    let percent = results.percent_done();
    if percent < 100 {
        print_result_row(op, "Progress %", "-", percent);
    }
}

fn print_latency_rows(op: &str, lat_type: &str, histo: &LatencyHistogram) {
    if histo.is_empty() {
        return;
    }

    print_result_row(
        op,
        &format!("{lat_type} lat us min/avg/max"),
        "-",
        format!("{}/{}/{}", histo.min_usec(), histo.average_usec(), histo.max_usec()),
    );

    if !histo.exceeded() {
        print_result_row(
            op,
            &format!("{lat_type} lat us p50/p99"),
            "-",
            format!("{:.0}/{:.0}", histo.percentile(50.0), histo.percentile(99.0)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_results() -> PhaseResults {
        let mut iops_latency = LatencyHistogram::new();
        iops_latency.add_latency(100);

        PhaseResults {
            phase: BenchPhase::CreateFiles,
            total_ops: LiveOps { entries_done: 24, bytes_done: 24 << 20, iops_done: 192 },
            total_rwmix_read_ops: LiveOps::default(),
            stonewall_ops: LiveOps { entries_done: 20, bytes_done: 20 << 20, iops_done: 160 },
            stonewall_rwmix_read_ops: LiveOps::default(),
            first_elapsed_usec: 1_000_000,
            last_elapsed_usec: 2_000_000,
            iops_latency,
            entries_latency: LatencyHistogram::new(),
            cpu_util_stonewall: 10,
            cpu_util_last: 20,
            expected_ops: LiveOps { entries_done: 24, bytes_done: 24 << 20, iops_done: 0 },
        }
    }

    #[test]
    fn test_percent_done_complete() {
        assert_eq!(sample_results().percent_done(), 100);
    }

    #[test]
    fn test_percent_done_partial() {
        let mut results = sample_results();
        results.total_ops.entries_done = 12;
        assert_eq!(results.percent_done(), 50);
    }

    #[test]
    fn test_percent_done_bytes_based() {
        let mut results = sample_results();
        results.expected_ops.entries_done = 0;
        results.expected_ops.bytes_done = 48 << 20;
        assert_eq!(results.percent_done(), 50);
    }

    #[test]
    fn test_print_does_not_panic() {
        print_results_table_header();
        print_phase_results(&sample_results());
    }
}
