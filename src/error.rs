//! Error types for the register-map engine
//!
//! Errors are split by blast radius:
//!
//! | Type | Scope | Effect |
//! |------|-------|--------|
//! | [`TransportError`] | one read request | fatal to the current cycle |
//! | [`ScanError`] | one update cycle | cycle fails, last snapshot kept |
//! | [`FieldDecodeError`] | one field | field omitted (or empty string), logged |
//! | [`ConfigError`] | static configuration | reported by validation helpers |

use std::time::Duration;

use thiserror::Error;

use crate::schema::BankKind;

/// Result type for scan and identification operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors reported by a [`RegisterTransport`](crate::transport::RegisterTransport).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Connection could not be opened or was lost
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// A read was issued outside of an open session
    #[error("Transport is not connected")]
    NotConnected,

    /// Connect or read did not complete within the caller-supplied timeout
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Malformed or unexpected response frame
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Device answered with a protocol exception
    #[error("Device exception code {code:#04x}")]
    Exception { code: u8 },
}

impl TransportError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Timeout error for an operation bounded by `limit`.
    pub fn timeout_after(operation: impl Into<String>, limit: Duration) -> Self {
        Self::timeout(operation, u64::try_from(limit.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Check if this error is a timeout.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Cycle-fatal errors raised while scanning or identifying a device.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Returned word count differs from the requested window size
    #[error("Size mismatch on {bank} window at {start}: expected {expected} words, got {actual}")]
    SizeMismatch {
        bank: BankKind,
        start: u16,
        expected: u16,
        actual: usize,
    },

    /// Device type code has no catalog entry
    #[error("Unsupported device type code {0:#06x}")]
    UnsupportedDevice(u16),

    /// Identification window decoded without a usable value for a required field
    #[error("Identification field '{key}' missing or not numeric")]
    MissingIdentity { key: String },
}

impl ScanError {
    /// Check if the failure originated in the transport layer.
    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// A single field could not be decoded. Never propagates past the decoder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldDecodeError {
    #[error("Field '{key}': raw value {raw} has no lookup table entry")]
    MissingLookup { key: String, raw: i64 },

    #[error("Field '{key}': invalid UTF-8 payload")]
    InvalidUtf8 { key: String },
}

/// Static configuration defects found by the validation helpers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Empty {bank} window at {start}")]
    EmptyWindow { bank: BankKind, start: u16 },

    #[error("{bank} window at {start} requests {count} registers, device limit is {max}")]
    WindowTooLarge {
        bank: BankKind,
        start: u16,
        count: u16,
        max: u16,
    },

    /// Register addresses are 1-based; 0 is never valid
    #[error("Field '{key}' has invalid register address {address}")]
    InvalidAddress { key: String, address: u16 },

    #[error("Field '{key}' at {bank} register {address} is not covered by any scan window")]
    UncoveredField {
        key: String,
        bank: BankKind,
        address: u16,
    },

    #[error("Duplicate field key '{key}'")]
    DuplicateKey { key: String },
}
