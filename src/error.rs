//! Domain-specific error types for delay-scope.
//!
//! Uses `thiserror` for the typed errors of each layer; the binary wraps
//! them with `anyhow` context.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while reading a capture or record file.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture file not found: {0}")]
    NotFound(String),

    #[error("Failed to open capture file '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: pcap::Error,
    },

    #[error("Failed to read packet record file '{path}': {source}")]
    Records {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Packet channel closed before the capture was fully read")]
    ChannelClosed,
}

/// Errors that abort an analysis run.
///
/// Detector-level shortfalls never surface here: a detector without enough
/// data reports itself as skipped in the run statistics instead.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyzerError {
    #[error("Insufficient timestamps for delay analysis (need at least {required}, got {actual})")]
    DegenerateInput { required: usize, actual: usize },

    #[error("Invalid analysis configuration: {reason}")]
    InvalidConfig { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_input_message() {
        let err = AnalyzerError::DegenerateInput {
            required: 2,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient timestamps for delay analysis (need at least 2, got 1)"
        );
    }

    #[test]
    fn test_analyzer_error_serializes_with_kind() {
        let err = AnalyzerError::DegenerateInput {
            required: 2,
            actual: 0,
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "degenerate_input");
        assert_eq!(value["actual"], 0);
    }
}
