// SPDX-FileCopyrightText: © 2025 revid contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for revid.
//!
//! Mirrors the shape of a typical embedded-pipeline error hierarchy: a small,
//! closed set of variants that map onto the taxonomy a caller actually needs
//! to act on (log-and-continue vs. fail construction), rather than one error
//! type per fallible call site.

use thiserror::Error;

/// Main error type for revid pipeline operations.
#[derive(Debug, Error)]
pub enum RevidError {
    /// Configuration or parameter validation error.
    ///
    /// Examples: unknown input/codec combination, impossible encoder/input
    /// pairing, missing required field for a selected output.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Runtime processing error during normal pipeline operation.
    ///
    /// Examples: malformed MTS packet, lexer framing error, filter failure.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Network-related error (sockets, HTTP, RTMP, RTP).
    #[error("network error: {0}")]
    Network(String),

    /// Codec-specific error (MTS/FLV encoding, PSI construction).
    #[error("codec error: {0}")]
    Codec(String),

    /// I/O error (file operations, device access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource exhaustion or limit exceeded.
    ///
    /// Examples: pool buffer overflow that could not be absorbed, disk
    /// exhaustion in the file sender.
    #[error("resource exhaustion: {0}")]
    ResourceExhausted(String),
}

/// Convenience alias for `Result<T, RevidError>`.
pub type Result<T> = std::result::Result<T, RevidError>;

impl From<RevidError> for String {
    fn from(err: RevidError) -> Self {
        err.to_string()
    }
}

impl From<String> for RevidError {
    fn from(s: String) -> Self {
        Self::Runtime(s)
    }
}

impl From<&str> for RevidError {
    fn from(s: &str) -> Self {
        Self::Runtime(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category() {
        let err = RevidError::Configuration("bad input codec".to_string());
        assert_eq!(err.to_string(), "configuration error: bad input codec");
    }

    #[test]
    fn string_conversion_round_trips_through_runtime() {
        let err: RevidError = "lost sync".into();
        assert_eq!(err.to_string(), "runtime error: lost sync");
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing device");
        let err: RevidError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("missing device"));
    }
}
