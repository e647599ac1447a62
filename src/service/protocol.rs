//! Remote-control protocol
//!
//! The master/service protocol is plain HTTP: JSON bodies for documents,
//! query-string parameters for scalars. This module holds the protocol
//! version, the endpoint paths and parameter names, and the wire structs
//! for status, bench-result, and prepare responses.

use crate::phase::BenchPhase;
use crate::stats::histogram::{LatencyHistogram, NUM_BUCKETS};
use crate::stats::LiveOps;
use serde::{Deserialize, Serialize};

/// Exchanged verbatim on `/preparephase`; a mismatch between master and
/// service is fatal.
pub const PROTOCOL_VERSION: &str = "2.0.1";

pub const PATH_INFO: &str = "/info";
pub const PATH_PROTOCOL_VERSION: &str = "/protocolversion";
pub const PATH_STATUS: &str = "/status";
pub const PATH_BENCH_RESULT: &str = "/benchresult";
pub const PATH_PREPARE_PHASE: &str = "/preparephase";
pub const PATH_START_PHASE: &str = "/startphase";
pub const PATH_INTERRUPT_PHASE: &str = "/interruptphase";

pub const PARAM_PROTOCOL_VERSION: &str = "protocolversion";
pub const PARAM_BENCH_PHASE_CODE: &str = "benchphasecode";
pub const PARAM_BENCH_ID: &str = "benchid";
pub const PARAM_QUIT: &str = "quit";

/// Serialized latency histogram: the scalar summary plus the flat bucket
/// array, so master-side addition is lossless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramXfer {
    pub count: u64,
    #[serde(rename = "sumusec")]
    pub sum_usec: u64,
    #[serde(rename = "minusec")]
    pub min_usec: u64,
    #[serde(rename = "maxusec")]
    pub max_usec: u64,
    pub buckets: Vec<u64>,
}

impl From<&LatencyHistogram> for HistogramXfer {
    fn from(histo: &LatencyHistogram) -> Self {
        Self {
            count: histo.num_values(),
            sum_usec: histo.sum_usec(),
            min_usec: histo.min_usec(),
            max_usec: histo.max_usec(),
            buckets: histo.buckets().to_vec(),
        }
    }
}

impl HistogramXfer {
    pub fn to_histogram(&self) -> Result<LatencyHistogram, String> {
        if self.buckets.len() != NUM_BUCKETS {
            return Err(format!(
                "histogram bucket count mismatch: expected {NUM_BUCKETS}, got {}",
                self.buckets.len()
            ));
        }

        let mut buckets = [0u64; NUM_BUCKETS];
        buckets.copy_from_slice(&self.buckets);

        Ok(LatencyHistogram::from_raw_parts(
            buckets,
            self.count,
            self.sum_usec,
            self.min_usec,
            self.max_usec,
        ))
    }
}

/// Response of `/status`: live counters plus the error history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusXfer {
    #[serde(rename = "benchid")]
    pub bench_id: String,
    #[serde(rename = "phasename")]
    pub phase_name: String,
    #[serde(rename = "phasecode")]
    pub phase_code: u8,
    #[serde(rename = "numworkersdone")]
    pub num_workers_done: usize,
    #[serde(rename = "numworkersdonewitherr")]
    pub num_workers_done_with_err: usize,
    #[serde(rename = "numentriesdone")]
    pub num_entries_done: u64,
    #[serde(rename = "numbytesdone")]
    pub num_bytes_done: u64,
    #[serde(rename = "numiopsdone")]
    pub num_iops_done: u64,
    #[serde(rename = "cpuutil")]
    pub cpu_util: u32,
    #[serde(rename = "elapsedsecs")]
    pub elapsed_secs: u64,
    #[serde(
        rename = "numbytesdonerwmixread",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rwmix_read_bytes_done: Option<u64>,
    #[serde(
        rename = "numiopsdonerwmixread",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rwmix_read_iops_done: Option<u64>,
    #[serde(rename = "errorhistory")]
    pub error_history: String,
}

impl StatusXfer {
    pub fn live_ops(&self) -> LiveOps {
        LiveOps {
            entries_done: self.num_entries_done,
            bytes_done: self.num_bytes_done,
            iops_done: self.num_iops_done,
        }
    }

    /// Placeholder status of a service that has not prepared a benchmark.
    pub fn idle(error_history: String) -> Self {
        Self {
            bench_id: uuid::Uuid::nil().to_string(),
            phase_name: BenchPhase::Idle.name().to_string(),
            phase_code: BenchPhase::Idle.code(),
            num_workers_done: 0,
            num_workers_done_with_err: 0,
            num_entries_done: 0,
            num_bytes_done: 0,
            num_iops_done: 0,
            cpu_util: 0,
            elapsed_secs: 0,
            rwmix_read_bytes_done: None,
            rwmix_read_iops_done: None,
            error_history,
        }
    }
}

/// Response of `/benchresult`: final counters, per-thread elapsed times,
/// CPU snapshots, and the serialized histograms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchResultXfer {
    #[serde(rename = "benchid")]
    pub bench_id: String,
    #[serde(rename = "phasename")]
    pub phase_name: String,
    #[serde(rename = "phasecode")]
    pub phase_code: u8,
    #[serde(rename = "numworkersdone")]
    pub num_workers_done: usize,
    #[serde(rename = "numworkersdonewitherr")]
    pub num_workers_done_with_err: usize,
    #[serde(rename = "numentriesdone")]
    pub num_entries_done: u64,
    #[serde(rename = "numbytesdone")]
    pub num_bytes_done: u64,
    #[serde(rename = "numiopsdone")]
    pub num_iops_done: u64,
    #[serde(rename = "cpuutilstonewall")]
    pub cpu_util_stonewall: u32,
    #[serde(rename = "cpuutil")]
    pub cpu_util: u32,
    #[serde(rename = "elapseduseclist")]
    pub elapsed_usec_list: Vec<u64>,
    #[serde(rename = "iopslat")]
    pub iops_latency: HistogramXfer,
    #[serde(rename = "entrieslat")]
    pub entries_latency: HistogramXfer,
    #[serde(
        rename = "numbytesdonerwmixread",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rwmix_read_bytes_done: Option<u64>,
    #[serde(
        rename = "numiopsdonerwmixread",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub rwmix_read_iops_done: Option<u64>,
    #[serde(rename = "errorhistory")]
    pub error_history: String,
}

/// Response of `/preparephase`: the path type the service detected (the
/// master verifies all services agree) plus any errors so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparePhaseResponse {
    #[serde(rename = "benchpathtype")]
    pub bench_path_type: u8,
    #[serde(rename = "errorhistory")]
    pub error_history: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_xfer_round_trip() {
        let mut histo = LatencyHistogram::new();
        for v in [3u64, 77, 900, 100_000] {
            histo.add_latency(v);
        }

        let xfer = HistogramXfer::from(&histo);
        let json = serde_json::to_string(&xfer).unwrap();
        let parsed: HistogramXfer = serde_json::from_str(&json).unwrap();
        let back = parsed.to_histogram().unwrap();

        assert_eq!(back, histo);
    }

    #[test]
    fn test_histogram_xfer_rejects_wrong_bucket_count() {
        let xfer = HistogramXfer {
            count: 0,
            sum_usec: 0,
            min_usec: 0,
            max_usec: 0,
            buckets: vec![0; 3],
        };
        assert!(xfer.to_histogram().is_err());
    }

    #[test]
    fn test_empty_histogram_survives_wire_merge() {
        let empty_wire = HistogramXfer::from(&LatencyHistogram::new());
        assert_eq!(empty_wire.min_usec, 0);

        let mut merged = empty_wire.to_histogram().unwrap();
        let mut other = LatencyHistogram::new();
        other.add_latency(42);
        merged += &other;

        assert_eq!(merged.min_usec(), 42);
    }

    #[test]
    fn test_status_rwmix_fields_optional() {
        let status = StatusXfer::idle(String::new());
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("rwmixread"));

        let parsed: StatusXfer = serde_json::from_str(&json).unwrap();
        assert!(parsed.rwmix_read_bytes_done.is_none());
    }

    #[test]
    fn test_status_required_keys_present() {
        let status = StatusXfer::idle("boom".into());
        let value: serde_json::Value = serde_json::to_value(&status).unwrap();

        for key in [
            "benchid",
            "phasename",
            "phasecode",
            "numworkersdone",
            "numworkersdonewitherr",
            "numentriesdone",
            "numbytesdone",
            "numiopsdone",
            "cpuutil",
            "errorhistory",
        ] {
            assert!(value.get(key).is_some(), "missing key {key}");
        }
    }
}
