//! Error taxonomy
//!
//! Three kinds of failure flow through the benchmark: configuration errors
//! (fatal before any phase runs), worker interruption (cooperative, not a
//! failure), and worker failure (syscall errors, short transfers, ring
//! errors, integrity mismatches). Remote-protocol problems are folded into
//! worker failure with a host/rank frame around the message.

use thiserror::Error;

/// Invalid configuration, rejected before any phase runs.
///
/// Raised by config validation, by offset-generator constructors, and by the
/// service when a prepare request carries an unusable config.
#[derive(Debug, Clone, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        ConfigError(msg.into())
    }
}

/// Outcome of a worker thread's phase work.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Cooperative cancellation. The worker reports done (not
    /// done-with-error) and this is never surfaced as a failure.
    #[error("received friendly request to interrupt execution")]
    Interrupted,

    /// Anything fatal for the worker: syscall errors, short reads/writes,
    /// async ring errors, integrity mismatches, remote protocol errors.
    /// The message carries path, expected and actual values where known.
    #[error("{0}")]
    Failed(String),
}

impl WorkerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        WorkerError::Failed(msg.into())
    }
}

impl From<ConfigError> for WorkerError {
    fn from(err: ConfigError) -> Self {
        WorkerError::Failed(err.to_string())
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Wrap a remote-side error message with a clear host/rank frame so that
/// multi-line service errors have an unambiguous start and end in the
/// master's output.
pub fn frame_host_error(host: &str, rank: usize, msg: &str) -> String {
    let indented = msg
        .trim_end_matches('\n')
        .lines()
        .map(|line| format!("  {line}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!("=== [ HOST: {host} (Rank: {rank}) ] ===\n{indented}\n=== [ END ] ===")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupted_is_not_failed() {
        let err = WorkerError::Interrupted;
        assert!(matches!(err, WorkerError::Interrupted));
    }

    #[test]
    fn test_config_error_message() {
        let err = ConfigError::new("block size larger than file size");
        assert_eq!(
            err.to_string(),
            "invalid configuration: block size larger than file size"
        );
    }

    #[test]
    fn test_frame_host_error_single_line() {
        let framed = frame_host_error("node1:1611", 3, "File open failed");
        assert!(framed.starts_with("=== [ HOST: node1:1611 (Rank: 3) ] ==="));
        assert!(framed.contains("  File open failed"));
        assert!(framed.ends_with("=== [ END ] ==="));
    }

    #[test]
    fn test_frame_host_error_multi_line() {
        let framed = frame_host_error("h:1", 0, "line one\nline two\n");
        assert!(framed.contains("  line one\n  line two"));
    }
}
