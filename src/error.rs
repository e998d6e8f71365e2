// Enviro Relay - Resilient environmental telemetry collector
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for Enviro Relay
//!
//! Each stage of the pipeline reports its own error kind. Only the cycle
//! boundary in [`crate::scheduler`] folds them into [`RelayError`] and
//! decides what to log; nothing below it ever terminates the process.

use crate::sensor::Metric;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for relay operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Sensor read error
    #[error("Sensor error: {0}")]
    Read(#[from] ReadError),

    /// Delivery error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Spool persistence error
    #[error("Spool error: {0}")]
    Spool(#[from] SpoolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A cycle panicked; the payload message is kept for the log
    #[error("Cycle aborted: {0}")]
    CycleAborted(String),
}

/// Errors raised by a sensor adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    /// Device or bus fault
    #[error("Device fault on {metric}: {reason}")]
    Device { metric: Metric, reason: String },

    /// The adapter has no source for this metric
    #[error("No source configured for {0}")]
    Unsupported(Metric),

    /// The adapter produced a value that is not a number
    #[error("Malformed reading for {metric}: {raw:?}")]
    Malformed { metric: Metric, raw: String },

    /// The auxiliary heat source could not be read
    #[error("Heat source unavailable: {0}")]
    HeatSource(String),
}

/// Errors raised while talking to the time-series database
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Pre-flight probe failed
    #[error("Database unreachable at {endpoint}")]
    Unreachable { endpoint: String },

    /// Operation timed out
    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Connection-level failure (DNS, refused, reset, ...)
    #[error("Connection failed: {reason}")]
    Connection { reason: String },

    /// No live connection handle
    #[error("Not connected")]
    NotConnected,

    /// The server answered but refused the write
    #[error("Write rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The cycle's delivery budget ran out
    #[error("Delivery deadline exceeded")]
    DeadlineExceeded,
}

impl TransportError {
    /// Whether the error means the connection handle can no longer be trusted
    ///
    /// Client-side rejections (4xx other than 408 and 429) come from a healthy
    /// server; the link itself is fine. An exhausted deadline says nothing
    /// about the link either.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => !(400..500).contains(status) || *status == 408 || *status == 429,
            Self::DeadlineExceeded => false,
            _ => true,
        }
    }
}

/// Errors raised by the durable spool
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpoolError {
    /// Filesystem error
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// Spool file exists but does not parse
    #[error("Corrupt spool file {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A value is outside its allowed range
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// A per-metric bounds override could not be parsed
    #[error("Invalid bounds override {0:?}, expected metric=min,max,step")]
    InvalidBounds(String),

    /// Unknown metric name
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
}
