//! # Register Word Handling
//!
//! Conversion between 16-bit register words and the multi-word values and
//! strings carried in a register map.
//!
//! Bytes inside a register are always big-endian. Only the order of the two
//! words of a 32-bit value varies between devices:
//!
//! | Order | Registers for `0x12345678` |
//! |-------|----------------------------|
//! | `HighFirst` (ABCD) | \[0x1234, 0x5678\] |
//! | `LowFirst` (CDAB) | \[0x5678, 0x1234\] |
//!
//! The decoder always composes 32-bit values with
//! [`REGISTER_WORD_ORDER`](crate::constants::REGISTER_WORD_ORDER).

use std::fmt;

/// Order of the two words of a 32-bit register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WordOrder {
    /// Most significant word at the lower address (ABCD)
    HighFirst,
    /// Least significant word at the lower address (CDAB)
    LowFirst,
}

impl WordOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighFirst => "ABCD (high word first)",
            Self::LowFirst => "CDAB (low word first)",
        }
    }
}

impl fmt::Display for WordOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Register to Value Conversions
// ============================================================================

/// Compose a u32 from two registers.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::bytes::{regs_to_u32, WordOrder};
///
/// assert_eq!(regs_to_u32(&[0x0001, 0x0002], WordOrder::LowFirst), 0x0002_0001);
/// assert_eq!(regs_to_u32(&[0x0001, 0x0002], WordOrder::HighFirst), 0x0001_0002);
/// ```
#[inline]
pub fn regs_to_u32(regs: &[u16; 2], order: WordOrder) -> u32 {
    let [hi, lo] = match order {
        WordOrder::HighFirst => [regs[0], regs[1]],
        WordOrder::LowFirst => [regs[1], regs[0]],
    };
    (u32::from(hi) << 16) | u32::from(lo)
}

/// Compose a two's-complement i32 from two registers.
#[inline]
pub fn regs_to_i32(regs: &[u16; 2], order: WordOrder) -> i32 {
    regs_to_u32(regs, order) as i32
}

/// Reinterpret a single register as two's-complement i16.
#[inline]
pub fn reg_to_i16(reg: u16) -> i16 {
    reg as i16
}

/// Unpack registers into their byte stream, high byte of each word first,
/// truncated at the first NUL byte.
pub fn regs_to_text_bytes(regs: &[u16]) -> Vec<u8> {
    let mut bytes: Vec<u8> = regs.iter().flat_map(|reg| reg.to_be_bytes()).collect();
    if let Some(nul) = bytes.iter().position(|&b| b == 0) {
        bytes.truncate(nul);
    }
    bytes
}

// ============================================================================
// Value to Register Conversions (for building register images)
// ============================================================================

/// Split a u32 into two registers.
#[inline]
pub fn u32_to_regs(value: u32, order: WordOrder) -> [u16; 2] {
    let hi = (value >> 16) as u16;
    let lo = value as u16;
    match order {
        WordOrder::HighFirst => [hi, lo],
        WordOrder::LowFirst => [lo, hi],
    }
}

/// Split an i32 into two registers.
#[inline]
pub fn i32_to_regs(value: i32, order: WordOrder) -> [u16; 2] {
    u32_to_regs(value as u32, order)
}

/// Pack a string into `words` registers, two bytes per word, NUL padded.
///
/// Bytes beyond `words * 2` are dropped.
pub fn text_to_regs(text: &str, words: usize) -> Vec<u16> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.resize(words * 2, 0);
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
