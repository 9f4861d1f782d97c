//! # Register Schema
//!
//! Static description of where one telemetry field lives in a register bank
//! and how its raw words turn into a [`Value`](crate::Value).
//!
//! ## Supported Data Types
//!
//! | Type | Registers | Decoding |
//! |------|-----------|----------|
//! | U16 | 1 | unsigned |
//! | S16 | 1 | two's complement |
//! | U32 | 2 | low word first |
//! | S32 | 2 | low word first, two's complement |
//! | Utf8 | `length` | two bytes per word, high byte first, NUL terminated |
//!
//! Addresses are the 1-based register numbers published in vendor register
//! tables. The protocol address of a field is `address - 1`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::constants::{FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS};

/// Register address space. Each bank has independent addressing.
///
/// Ordering follows scan order: the read-only input bank before the holding bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum BankKind {
    /// Read-only input registers (FC04)
    Input,
    /// Holding registers (FC03)
    Holding,
}

impl BankKind {
    /// Modbus function code used to read this bank.
    #[inline]
    pub fn function_code(&self) -> u8 {
        match self {
            BankKind::Input => FC_READ_INPUT_REGISTERS,
            BankKind::Holding => FC_READ_HOLDING_REGISTERS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BankKind::Input => "input",
            BankKind::Holding => "holding",
        }
    }
}

impl fmt::Display for BankKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire encoding of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum DataType {
    U16,
    U32,
    S16,
    S32,
    Utf8,
}

impl DataType {
    /// Natural register count. Strings default to one word and are sized
    /// with [`RegisterSchema::with_length`].
    #[inline]
    pub fn word_count(&self) -> u16 {
        match self {
            DataType::U16 | DataType::S16 | DataType::Utf8 => 1,
            DataType::U32 | DataType::S32 => 2,
        }
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        !matches!(self, DataType::Utf8)
    }
}

/// Post-decode interpretation of a field's lookup table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Transform {
    /// Raw value indexes the table directly
    #[default]
    None,
    /// Table maps flag values to output field names; each yields a boolean
    BitFlags,
}

/// Integer to label table used for enumerations and bit flags.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::LookupTable;
///
/// let table: LookupTable = [(0, "Stop"), (1, "Run")].into_iter().collect();
/// assert_eq!(table.get(1), Some("Run"));
/// assert_eq!(table.get(7), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct LookupTable {
    entries: BTreeMap<i64, String>,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn insert(&mut self, raw: i64, label: impl Into<String>) {
        self.entries.insert(raw, label.into());
    }

    #[inline]
    pub fn get(&self, raw: i64) -> Option<&str> {
        self.entries.get(&raw).map(String::as_str)
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(i64, S)> for LookupTable {
    fn from_iter<I: IntoIterator<Item = (i64, S)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }
}

/// Location and decode rule for one named telemetry field.
///
/// # Example
///
/// ```rust
/// use voltage_regmap::{BankKind, DataType, RegisterSchema};
///
/// let power = RegisterSchema::new("total_dc_power", BankKind::Input, 5017, DataType::U32)
///     .with_scale(0.1);
/// assert_eq!(power.length, 2);
/// assert_eq!(power.protocol_address(), Some(5016));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegisterSchema {
    /// Output field name
    pub key: String,
    /// Bank the register lives in
    pub bank: BankKind,
    /// 1-based register address as published by the vendor
    pub address: u16,
    pub data_type: DataType,
    /// Word count (string length in words for `Utf8`)
    pub length: u16,
    /// Multiplicative precision factor applied after decode
    #[cfg_attr(feature = "serde", serde(default))]
    pub unit_scale: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub lookup_table: Option<LookupTable>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub transform: Transform,
    /// Device codes this field exists on; `None` means every device
    #[cfg_attr(feature = "serde", serde(default))]
    pub applicability: Option<BTreeSet<u16>>,
    /// 1-based instance number of a repeated sub-component
    #[cfg_attr(feature = "serde", serde(default))]
    pub group_index: Option<u32>,
}

impl RegisterSchema {
    /// Create a plain field with the data type's natural length.
    pub fn new(key: impl Into<String>, bank: BankKind, address: u16, data_type: DataType) -> Self {
        Self {
            key: key.into(),
            bank,
            address,
            data_type,
            length: data_type.word_count(),
            unit_scale: None,
            lookup_table: None,
            transform: Transform::None,
            applicability: None,
            group_index: None,
        }
    }

    /// Set the word count (string fields).
    pub fn with_length(mut self, words: u16) -> Self {
        self.length = words;
        self
    }

    /// Set the unit scale.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.unit_scale = Some(scale);
        self
    }

    /// Map raw values through an enumeration table.
    pub fn with_lookup(mut self, table: LookupTable) -> Self {
        self.lookup_table = Some(table);
        self.transform = Transform::None;
        self
    }

    /// Expand the register into one boolean field per table entry.
    pub fn with_bit_flags(mut self, table: LookupTable) -> Self {
        self.lookup_table = Some(table);
        self.transform = Transform::BitFlags;
        self
    }

    /// Restrict the field to the given device codes.
    pub fn applicable_to(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.applicability = Some(codes.into_iter().collect());
        self
    }

    /// Mark the field as belonging to sub-component instance `index` (1-based).
    pub fn in_group(mut self, index: u32) -> Self {
        self.group_index = Some(index);
        self
    }

    /// 0-based protocol address, `None` for the invalid register number 0.
    #[inline]
    pub fn protocol_address(&self) -> Option<u16> {
        self.address.checked_sub(1)
    }

    /// Last protocol address occupied by the field (inclusive).
    #[inline]
    pub fn protocol_end(&self) -> Option<u32> {
        self.protocol_address()
            .map(|start| u32::from(start) + u32::from(self.length.max(1)) - 1)
    }

    /// Check whether the field exists on a device. Unknown devices only see
    /// universally applicable fields.
    #[inline]
    pub fn is_applicable(&self, device_code: Option<u16>) -> bool {
        match (&self.applicability, device_code) {
            (None, _) => true,
            (Some(codes), Some(code)) => codes.contains(&code),
            (Some(_), None) => false,
        }
    }

    /// Expand a repeated sub-component field into `count` flat entries.
    ///
    /// Instance `n` (1-based) is keyed `{key}_{n}`, sits `stride * (n - 1)`
    /// registers after the template address and carries `group_index = n`.
    ///
    /// ```rust
    /// use voltage_regmap::{BankKind, DataType, RegisterSchema};
    ///
    /// let template = RegisterSchema::new("mppt_voltage", BankKind::Input, 5011, DataType::U16)
    ///     .with_scale(0.1);
    /// let family = RegisterSchema::group_family(&template, 2, 3);
    /// assert_eq!(family[2].key, "mppt_voltage_3");
    /// assert_eq!(family[2].address, 5015);
    /// assert_eq!(family[2].group_index, Some(3));
    /// ```
    pub fn group_family(template: &RegisterSchema, stride: u16, count: u32) -> Vec<RegisterSchema> {
        (1..=count)
            .filter_map(|n| {
                let step = u16::try_from(n - 1).ok()?.checked_mul(stride)?;
                let address = template.address.checked_add(step)?;
                let mut schema = template.clone();
                schema.key = format!("{}_{}", template.key, n);
                schema.address = address;
                schema.group_index = Some(n);
                Some(schema)
            })
            .collect()
    }
}
