//! Domain-specific error types for RCA streaming.
//!
//! All fallible operations return `Result<T, RcaError>`.
//! Routing misses and stale frames are *not* errors: they are logged or
//! counted where they happen and never surface to the caller.

use thiserror::Error;

/// The canonical error type for the RCA crates.
#[derive(Debug, Error)]
pub enum RcaError {
    // ── Configuration Errors ─────────────────────────────────────
    /// A component was constructed with an unusable configuration,
    /// e.g. a frame source lacking a required capability.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An argument was outside the accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Registry / RPC Errors ────────────────────────────────────
    /// An area name was not registered. Only raised by direct
    /// unregistration; inbound RPC misses are logged and dropped.
    #[error("unknown area: {0}")]
    UnknownArea(String),

    /// An inbound call named a method the relay does not export.
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    // ── Pipeline Errors ──────────────────────────────────────────
    /// The frame source failed to produce a frame.
    #[error("capture failed: {0}")]
    Capture(String),

    /// An image codec rejected the frame.
    #[error("{format} encode failed: {reason}")]
    Encode {
        format: &'static str,
        reason: String,
    },

    /// A worker thread of the encode pool panicked or was cancelled.
    #[error("worker error: {0}")]
    Worker(String),

    // ── Wire Errors ──────────────────────────────────────────────
    /// Received bytes that do not start with the RCA magic sequence.
    #[error("invalid magic bytes: expected RCA1")]
    InvalidMagic,

    /// The packet body failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The received frame is shorter or longer than its header announces.
    #[error("invalid packet length: expected {expected}, got {actual}")]
    InvalidPacketLength { expected: usize, actual: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Serialization Errors ─────────────────────────────────────
    /// A JSON body could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl RcaError {
    /// Shorthand for an [`RcaError::Encode`] from any displayable cause.
    pub fn encode(format: &'static str, reason: impl std::fmt::Display) -> Self {
        RcaError::Encode {
            format,
            reason: reason.to_string(),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RcaError {
    fn from(s: String) -> Self {
        RcaError::Other(s)
    }
}

impl From<&str> for RcaError {
    fn from(s: &str) -> Self {
        RcaError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RcaError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RcaError::ChannelClosed
    }
}

impl From<tokio::task::JoinError> for RcaError {
    fn from(e: tokio::task::JoinError) -> Self {
        RcaError::Worker(e.to_string())
    }
}
