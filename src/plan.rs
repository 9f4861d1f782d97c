//! # Scan Plans
//!
//! A scan plan is the ordered list of register windows read during one pass
//! over a device. Windows are kept in scan order: the input bank before the
//! holding bank, ascending start address within a bank.
//!
//! ## Example
//!
//! ```rust
//! use voltage_regmap::{BankKind, DataType, DeviceLimits, RegisterSchema, ScanPlan};
//!
//! let schemas = vec![
//!     RegisterSchema::new("daily_yield", BankKind::Input, 5003, DataType::U16),
//!     RegisterSchema::new("total_yield", BankKind::Input, 5004, DataType::U32),
//!     RegisterSchema::new("year", BankKind::Holding, 5000, DataType::U16),
//! ];
//!
//! let plan = ScanPlan::from_schemas(&schemas, &DeviceLimits::new());
//! assert_eq!(plan.len(), 2);
//! assert_eq!(plan.windows()[0].bank, BankKind::Input);
//! assert_eq!(plan.windows()[0].start, 5002);
//! assert_eq!(plan.windows()[0].count, 3);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::device_limits::DeviceLimits;
use crate::error::ConfigError;
use crate::schema::{BankKind, RegisterSchema};

/// A contiguous run of registers fetched in one request.
///
/// `start` is the 0-based protocol address of the first register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanWindow {
    pub bank: BankKind,
    pub start: u16,
    pub count: u16,
}

impl ScanWindow {
    pub fn new(bank: BankKind, start: u16, count: u16) -> Self {
        Self { bank, start, count }
    }

    /// Window over the read-only input bank.
    pub fn input(start: u16, count: u16) -> Self {
        Self::new(BankKind::Input, start, count)
    }

    /// Window over the holding bank.
    pub fn holding(start: u16, count: u16) -> Self {
        Self::new(BankKind::Holding, start, count)
    }

    /// Exclusive end address.
    #[inline]
    pub fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }

    /// Word offset of a field inside this window, if its whole span was fetched.
    #[inline]
    pub fn offset_of(&self, schema: &RegisterSchema) -> Option<usize> {
        if schema.bank != self.bank {
            return None;
        }
        let first = schema.protocol_address()?;
        let last = schema.protocol_end()?;
        if first < self.start || last >= self.end() {
            return None;
        }
        Some(usize::from(first - self.start))
    }

    /// Check whether a field lies entirely inside this window.
    #[inline]
    pub fn contains(&self, schema: &RegisterSchema) -> bool {
        self.offset_of(schema).is_some()
    }
}

impl fmt::Display for ScanWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}+{}", self.bank, self.start, self.count)
    }
}

/// Ordered set of windows to read for one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(from = "Vec<ScanWindow>", into = "Vec<ScanWindow>")
)]
pub struct ScanPlan {
    windows: Vec<ScanWindow>,
}

impl ScanPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a window, keeping scan order.
    pub fn with_window(mut self, window: ScanWindow) -> Self {
        self.windows.push(window);
        self.sort();
        self
    }

    /// Windows in scan order.
    #[inline]
    pub fn windows(&self) -> &[ScanWindow] {
        &self.windows
    }

    /// Windows of one bank, ascending start address.
    pub fn windows_for(&self, bank: BankKind) -> impl Iterator<Item = &ScanWindow> {
        self.windows.iter().filter(move |w| w.bank == bank)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Check whether some window fetches the whole span of a field.
    pub fn covers(&self, schema: &RegisterSchema) -> bool {
        self.windows.iter().any(|w| w.contains(schema))
    }

    /// Derive a plan that covers every field.
    ///
    /// Fields are grouped per bank, sorted by address and packed greedily into
    /// windows no larger than `limits.max_read_registers`. Fields with the
    /// invalid address 0 are ignored. A single field longer than the limit gets
    /// a window of its own (and will fail [`validate`](Self::validate)).
    pub fn from_schemas(schemas: &[RegisterSchema], limits: &DeviceLimits) -> Self {
        let max = u32::from(limits.max_read_registers);
        let mut spans: BTreeMap<BankKind, Vec<(u32, u32)>> = BTreeMap::new();
        for schema in schemas {
            if let (Some(first), Some(last)) = (schema.protocol_address(), schema.protocol_end()) {
                spans
                    .entry(schema.bank)
                    .or_default()
                    .push((u32::from(first), last));
            }
        }

        let mut windows = Vec::new();
        for (bank, mut bank_spans) in spans {
            bank_spans.sort_unstable();
            let mut current: Option<(u32, u32)> = None;

            for (first, last) in bank_spans {
                current = match current {
                    Some((start, end)) if last.max(end) - start < max => Some((start, last.max(end))),
                    Some((start, end)) => {
                        windows.push(window_from_span(bank, start, end));
                        Some((first, last))
                    }
                    None => Some((first, last)),
                };
            }
            if let Some((start, end)) = current {
                windows.push(window_from_span(bank, start, end));
            }
        }

        let mut plan = Self { windows };
        plan.sort();
        plan
    }

    /// Check every window against the device limits.
    pub fn validate(&self, limits: &DeviceLimits) -> Result<(), ConfigError> {
        let Some(window) = self.windows.iter().find(|w| !limits.admits(w)) else {
            return Ok(());
        };
        if window.count == 0 {
            return Err(ConfigError::EmptyWindow {
                bank: window.bank,
                start: window.start,
            });
        }
        Err(ConfigError::WindowTooLarge {
            bank: window.bank,
            start: window.start,
            count: window.count,
            max: limits.max_read_registers,
        })
    }

    fn sort(&mut self) {
        self.windows.sort_by_key(|w| (w.bank, w.start));
    }
}

impl From<Vec<ScanWindow>> for ScanPlan {
    fn from(windows: Vec<ScanWindow>) -> Self {
        let mut plan = Self { windows };
        plan.sort();
        plan
    }
}

impl From<ScanPlan> for Vec<ScanWindow> {
    fn from(plan: ScanPlan) -> Self {
        plan.windows
    }
}

impl FromIterator<ScanWindow> for ScanPlan {
    fn from_iter<I: IntoIterator<Item = ScanWindow>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

fn window_from_span(bank: BankKind, start: u32, end: u32) -> ScanWindow {
    // spans come from u16 addresses, so `start` fits; clamp the count at the bank end
    let start = start as u16;
    let count = (end + 1 - u32::from(start)).min(u32::from(u16::MAX - start)) as u16;
    ScanWindow::new(bank, start, count)
}
