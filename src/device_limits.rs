//! # Device Limits
//!
//! Per-device read constraints applied to scan windows.
//!
//! The protocol allows up to 125 registers per input/holding read, but many
//! inverters and meters reject anything above 100, and some drop requests that
//! arrive back to back on the same connection.

use crate::constants::MAX_READ_REGISTERS;
use crate::plan::ScanWindow;

/// Default window size limit: the protocol maximum.
pub const DEFAULT_MAX_READ_REGISTERS: u16 = MAX_READ_REGISTERS;

/// Default pause between window reads: none.
pub const DEFAULT_INTER_REQUEST_DELAY_MS: u64 = 0;

/// Read limits of one device model.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::{DeviceLimits, ScanWindow};
///
/// let limits = DeviceLimits::new()
///     .with_max_read_registers(100)
///     .with_inter_request_delay_ms(10);
///
/// assert!(limits.admits(&ScanWindow::input(4999, 100)));
/// assert!(!limits.admits(&ScanWindow::input(4999, 101)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct DeviceLimits {
    /// Largest window the device answers in one read.
    pub max_read_registers: u16,
    /// Pause inserted between consecutive reads of one cycle (milliseconds).
    pub inter_request_delay_ms: u64,
}

impl DeviceLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// 50-register windows, 10 ms between reads. Suits slow RS485 gateways.
    pub fn conservative() -> Self {
        Self {
            max_read_registers: 50,
            inter_request_delay_ms: 10,
        }
    }

    /// Set the window size limit, clamped to `1..=125`.
    pub fn with_max_read_registers(mut self, count: u16) -> Self {
        self.max_read_registers = count.clamp(1, MAX_READ_REGISTERS);
        self
    }

    pub fn with_inter_request_delay_ms(mut self, delay_ms: u64) -> Self {
        self.inter_request_delay_ms = delay_ms;
        self
    }

    /// Check whether a non-empty window fits in one read.
    #[inline]
    pub fn admits(&self, window: &ScanWindow) -> bool {
        window.count > 0 && window.count <= self.max_read_registers
    }
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_read_registers: DEFAULT_MAX_READ_REGISTERS,
            inter_request_delay_ms: DEFAULT_INTER_REQUEST_DELAY_MS,
        }
    }
}
