//! Protocol and engine constants
//!
//! Register limits are derived from the Modbus PDU size constraint:
//! - Maximum PDU size: 253 bytes (inherited from RS485 ADU limit of 256 bytes)
//! - A register read response carries 2 bytes per register

use crate::bytes::WordOrder;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Calculation for response PDU:
/// - Function Code: 1 byte
/// - Byte Count: 1 byte
/// - Register Data: N × 2 bytes
/// - Total: 1 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ (253 - 2) / 2 = 125.5 → 125 registers
pub const MAX_READ_REGISTERS: u16 = 125;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

// ============================================================================
// Engine Defaults
// ============================================================================

/// Default per-read timeout (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Word order for 32-bit register pairs: low word first (CDAB).
/// Applies to every field; there is no per-field override.
pub const REGISTER_WORD_ORDER: WordOrder = WordOrder::LowFirst;

/// Number of decimals kept after applying a field's unit scale.
pub const SCALE_DECIMALS: i32 = 1;
