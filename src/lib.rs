//! # Voltage RegMap - Schema-Driven Register Map Engine
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **License:** MIT
//!
//! Turns the raw 16-bit register banks of a field device (solar inverter,
//! battery system, meter) into a typed telemetry snapshot, driven entirely by
//! static register schemas and a catalog of device models.
//!
//! ## Features
//!
//! - **Schema Driven**: fields declare bank, 1-based address, type, scale, lookup
//! - **Model Discovery**: device-type code lookup, sub-component probing
//! - **Deterministic Scans**: one read per window, fixed order, all-or-nothing cycles
//! - **Transport Agnostic**: any [`RegisterTransport`] (TCP, RTU, in-memory)
//! - **Lock-Free Readers**: snapshots published through a `tokio::sync::watch` channel
//!
//! ## Decoding Rules
//!
//! | Data type | Words | Value |
//! |-----------|-------|-------|
//! | U16 / S16 | 1 | `Int` |
//! | U32 / S32 | 2, low word first | `Int` |
//! | any numeric with scale | - | `Float`, one decimal |
//! | Utf8 | `length` | `Text`, NUL stripped |
//! | lookup table | - | `Text` label |
//! | bit flags | - | one `Bool` per flag |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use voltage_regmap::{
//!     BankKind, CatalogEntry, DataType, DeviceCatalog, IdentificationPlan, MemoryTransport,
//!     RegisterSchema, ScanPlan, ScanWindow, SchemaSet, Topology, UpdateOrchestrator, Value,
//! };
//!
//! # tokio_test::block_on(async {
//! let code = RegisterSchema::new("device_type_code", BankKind::Input, 5000, DataType::U16);
//! let power = RegisterSchema::new("total_active_power", BankKind::Input, 5009, DataType::U32);
//!
//! let catalog = DeviceCatalog::new(IdentificationPlan::new(
//!     ScanPlan::from(vec![ScanWindow::input(4999, 1)]),
//!     vec![code.clone()],
//!     "device_type_code",
//! ))
//! .with_entry(CatalogEntry::new(
//!     0x0d06,
//!     "SG5.0RS",
//!     Topology::StringOnly,
//!     Arc::new(SchemaSet::new(vec![power.clone()], ScanPlan::from(vec![ScanWindow::input(5008, 2)]))),
//! ));
//!
//! let mut transport = MemoryTransport::new();
//! transport.put(&code, 0x0d06);
//! transport.put(&power, 3250);
//!
//! let mut orchestrator = UpdateOrchestrator::new(transport, Arc::new(catalog));
//! let snapshot = orchestrator.update().await.unwrap();
//! assert_eq!(snapshot.get("total_active_power"), Some(&Value::Int(3250)));
//! # });
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error types and result handling
pub mod error;

/// Protocol constants and fixed decoding parameters
pub mod constants;

/// Register word order and text conversions
pub mod bytes;

/// Decoded telemetry value types
pub mod value;

// ============================================================================
// Configuration
// ============================================================================

/// Register schema definitions
pub mod schema;

/// Scan windows and plans
pub mod plan;

/// Device-specific protocol limits configuration
pub mod device_limits;

/// Device model catalog
pub mod catalog;

/// Composite fields computed after a cycle
pub mod derived;

// ============================================================================
// Runtime
// ============================================================================

/// Pure register window decoding
pub mod decoder;

/// Transport abstraction and scoped sessions
pub mod transport;

/// Scan plan execution
pub mod executor;

/// Device identification
pub mod resolver;

/// Update cycles and snapshot publication
pub mod orchestrator;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_regmap::tokio) ===
pub use tokio;

// === Error handling ===
pub use error::{ConfigError, FieldDecodeError, ScanError, ScanResult, TransportError};

// === Core types ===
pub use bytes::WordOrder;
pub use value::{FieldMap, Value};

// === Configuration ===
pub use catalog::{
    CatalogEntry, ComponentProbe, DeviceCatalog, DeviceModel, IdentificationPlan, SchemaSet,
    Topology,
};
pub use derived::DerivedField;
pub use device_limits::DeviceLimits;
pub use plan::{ScanPlan, ScanWindow};
pub use schema::{BankKind, DataType, LookupTable, RegisterSchema, Transform};

// === Runtime ===
pub use decoder::{Decoder, DeviceScope};
pub use executor::ScanExecutor;
pub use orchestrator::{CycleStats, OrchestratorState, Snapshot, UpdateOrchestrator};
pub use resolver::DeviceResolver;
pub use transport::{MemoryTransport, RegisterTransport, TransportSession};

// === Protocol limits (commonly needed constants) ===
pub use constants::{DEFAULT_TIMEOUT_MS, MAX_READ_REGISTERS, REGISTER_WORD_ORDER};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage RegMap v{} - Schema-driven register map engine by Evan Liu",
        VERSION
    )
}
