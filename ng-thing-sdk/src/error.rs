use std::{str::Utf8Error, string::FromUtf8Error};
use thiserror::Error;

/// Failures reported by the transport collaborator.
///
/// These are surfaced to the caller through the corresponding operation and are never
/// retried automatically, with the exception of connection establishment which is
/// driven by [`crate::ConnectStrategy`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Transport has no live connection
    #[error("Not connected - operation requires an active connection")]
    NotConnected,

    /// Connection attempt rejected
    #[error("Connect failed: {reason}")]
    Connect { reason: String },

    /// Publish rejected
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Publish { topic: String, reason: String },

    /// Subscribe rejected
    #[error("Failed to subscribe to '{expression}': {reason}")]
    Subscribe { expression: String, reason: String },

    /// Unsubscribe rejected
    #[error("Failed to unsubscribe from '{expression}': {reason}")]
    Unsubscribe { expression: String, reason: String },

    /// Transport was shut down
    #[error("Transport closed")]
    Closed,
}

/// Encode-side pipeline failures.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("json encode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("encode failed: {reason}")]
    Invalid { reason: String },
}

/// Decode-side pipeline failures.
///
/// A decode failure is distinct from a skipped message: stages signal "drop this
/// message" with `Ok(None)`, never with an error.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("utf-8 decode failed: {0}")]
    Utf8(#[from] Utf8Error),
    #[error("decode failed: {reason}")]
    Invalid { reason: String },
}

impl From<FromUtf8Error> for DecodeError {
    fn from(err: FromUtf8Error) -> Self {
        DecodeError::Utf8(err.utf8_error())
    }
}

/// A reply that decoded successfully but carries a non-OK application code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Operation '{token}' failed with code {code}: {desc}")]
pub struct OperationError {
    pub token: String,
    pub code: i32,
    pub desc: String,
}

pub type OpResult<T> = Result<T, OpError>;

/// Top-level error for every operation exposed by the SDK.
#[derive(Error, Debug)]
pub enum OpError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// No reply arrived before the call deadline
    #[error("Call '{token}' timed out after {timeout_ms}ms")]
    Timeout { token: String, timeout_ms: u64 },

    /// Pending call canceled by unbind or connection teardown
    #[error("Call '{token}' canceled")]
    Canceled { token: String },

    /// Dispatch pool refused the work item
    #[error("Rejected: {reason}")]
    Rejected { reason: String },

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Application consumer reported a failure
    #[error("Handler failed: {reason}")]
    Handler { reason: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    /// Owning connection was destroyed
    #[error("Thing connection destroyed")]
    Destroyed,
}

impl OpError {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, OpError::Timeout { .. })
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, OpError::Canceled { .. } | OpError::Destroyed)
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, OpError::Rejected { .. })
    }

    /// Build a handler failure from any displayable cause.
    pub fn handler(reason: impl std::fmt::Display) -> Self {
        OpError::Handler {
            reason: reason.to_string(),
        }
    }
}
