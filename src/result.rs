//! Error types shared by every layer of the crate.
//!
//! `Error` follows the measurement pipeline: transport problems (`Connection`,
//! `Protocol`, `Timeout`) are recoverable and may be retried by the sweep
//! controller, while calibration and file-format problems point at bad input
//! and are surfaced immediately.
//!
//! Physically valid edge cases such as total reflection (infinite VSWR) or an
//! open-circuit impedance are *not* errors; the calculators in
//! [`crate::derived`] return sentinels for them.

use std::path::PathBuf;

use thiserror::Error;

use crate::calibration::StandardKind;
use crate::network::SParam;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error on '{port}': {message}")]
    Connection { port: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("No response to '{command}' within {timeout_ms} ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Calibration is missing the {missing:?} standard(s)")]
    IncompleteCalibration { missing: Vec<StandardKind> },

    #[error("Calibration is degenerate at {frequency} Hz (correction denominator ~ 0)")]
    CalibrationDegenerate { frequency: u64 },

    #[error("Touchstone format error on line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("Frequency {frequency} Hz is not covered by the calibration")]
    FrequencyMismatch { frequency: u64 },

    #[error("Invalid sweep: {0}")]
    InvalidSweep(String),

    #[error("{label} has {actual} values but the sweep has {expected} points")]
    LengthMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },

    #[error("{0} is required but missing from the data set")]
    MissingParameter(SParam),

    #[error("Data has already been corrected; apply calibration to raw data only")]
    AlreadyCorrected,

    #[error("Insufficient data: need at least {needed} points, got {actual}")]
    InsufficientData { needed: usize, actual: usize },

    #[error(
        "Sweep aborted at segment {segment} of {segments} after {points_acquired} points: {source}"
    )]
    SweepAborted {
        segment: usize,
        segments: usize,
        points_acquired: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Sweep worker has shut down")]
    WorkerStopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Calibration file error in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported calibration file version {0}")]
    CalibrationVersion(u32),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl Error {
    pub(crate) fn format(line: usize, message: impl Into<String>) -> Self {
        Error::Format {
            line,
            message: message.into(),
        }
    }

    /// Transport-level failures that a caller may retry on the same connection.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Timeout { .. })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transport_errors_are_recoverable() {
        assert!(Error::Protocol("bad echo".into()).is_recoverable());
        assert!(Error::Timeout {
            command: "scan".into(),
            timeout_ms: 100
        }
        .is_recoverable());
        assert!(!Error::AlreadyCorrected.is_recoverable());
        assert!(!Error::format(3, "x").is_recoverable());
    }

    #[test]
    fn abort_message_carries_progress() {
        let err = Error::SweepAborted {
            segment: 2,
            segments: 4,
            points_acquired: 202,
            source: Box::new(Error::Protocol("short record".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("segment 2 of 4"));
        assert!(msg.contains("202 points"));
    }
}
