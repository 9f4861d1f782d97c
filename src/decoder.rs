//! # Register Window Decoder
//!
//! Pure conversion of one fetched register window into named values.
//!
//! For every schema whose whole word span lies inside the window:
//! 1. fields not applicable to the device code are skipped
//! 2. fields of sub-component instances beyond the device's count are skipped
//! 3. the raw value is decoded by data type (32-bit values low word first)
//! 4. `unit_scale` is applied, rounded to one decimal
//! 5. lookup tables and bit flags are resolved
//!
//! A field that fails to decode never aborts the window: a missing lookup
//! entry omits the field, an invalid UTF-8 payload yields an empty string.
//! Both are logged.

use tracing::{debug, warn};

use crate::bytes::{reg_to_i16, regs_to_i32, regs_to_text_bytes, regs_to_u32};
use crate::catalog::DeviceModel;
use crate::constants::{REGISTER_WORD_ORDER, SCALE_DECIMALS};
use crate::error::FieldDecodeError;
use crate::plan::ScanWindow;
use crate::schema::{DataType, RegisterSchema, Transform};
use crate::value::{FieldMap, Value};

/// The part of a device identity the decoder filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceScope {
    /// `None` before identification: only universally applicable fields decode
    pub device_code: Option<u16>,
    pub component_count: u32,
}

impl DeviceScope {
    /// Scope used while the device is still unknown.
    pub fn bootstrap() -> Self {
        Self {
            device_code: None,
            component_count: 0,
        }
    }

    pub fn device(device_code: u16, component_count: u32) -> Self {
        Self {
            device_code: Some(device_code),
            component_count,
        }
    }

    /// Check both the applicability set and the sub-component bound.
    #[inline]
    pub fn admits(&self, schema: &RegisterSchema) -> bool {
        schema.is_applicable(self.device_code)
            && schema
                .group_index
                .map_or(true, |group| group <= self.component_count)
    }
}

impl From<&DeviceModel> for DeviceScope {
    fn from(device: &DeviceModel) -> Self {
        Self::device(device.device_code, device.component_count)
    }
}

/// Schema-driven register decoder.
pub struct Decoder;

impl Decoder {
    /// Decode every field of `schemas` that lies inside `window`.
    ///
    /// `words` is the slice returned for the window; word 0 holds protocol
    /// address `window.start`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use voltage_regmap::{BankKind, DataType, Decoder, DeviceScope, RegisterSchema, ScanWindow, Value};
    ///
    /// let schemas = [RegisterSchema::new("power", BankKind::Input, 5001, DataType::U32)];
    /// let window = ScanWindow::input(5000, 2);
    ///
    /// let fields = Decoder::decode_scoped(&[0x0001, 0x0002], &window, &schemas, &DeviceScope::bootstrap());
    /// assert_eq!(fields["power"], Value::Int(131073));
    /// ```
    pub fn decode(
        words: &[u16],
        window: &ScanWindow,
        schemas: &[RegisterSchema],
        device: &DeviceModel,
    ) -> FieldMap {
        Self::decode_scoped(words, window, schemas, &DeviceScope::from(device))
    }

    /// Decode against an explicit [`DeviceScope`].
    pub fn decode_scoped(
        words: &[u16],
        window: &ScanWindow,
        schemas: &[RegisterSchema],
        scope: &DeviceScope,
    ) -> FieldMap {
        let mut fields = FieldMap::new();

        for schema in schemas {
            let Some(offset) = window.offset_of(schema) else {
                continue;
            };
            if !scope.admits(schema) {
                debug!("Skipping field '{}' for {:?}", schema.key, scope);
                continue;
            }
            let Some(slice) = words.get(offset..offset + usize::from(schema.length)) else {
                debug!(
                    "Field '{}' beyond the {} words supplied for {}",
                    schema.key,
                    words.len(),
                    window
                );
                continue;
            };

            match Self::decode_field(slice, schema) {
                Ok(decoded) => fields.extend(decoded),
                Err(err) => {
                    warn!("{} (window {})", err, window);
                    if let FieldDecodeError::InvalidUtf8 { key } = err {
                        fields.insert(key, Value::Text(String::new()));
                    }
                }
            }
        }

        fields
    }

    /// Decode one field from exactly its own words.
    ///
    /// Returns one entry for scalar fields and one boolean entry per table
    /// entry for bit-flag fields.
    pub fn decode_field(
        words: &[u16],
        schema: &RegisterSchema,
    ) -> Result<Vec<(String, Value)>, FieldDecodeError> {
        if schema.data_type == DataType::Utf8 {
            let text = String::from_utf8(regs_to_text_bytes(words)).map_err(|_| {
                FieldDecodeError::InvalidUtf8 {
                    key: schema.key.clone(),
                }
            })?;
            return Ok(vec![(schema.key.clone(), Value::Text(text))]);
        }
        let Some(raw) = decode_integer(words, schema.data_type) else {
            debug!("Field '{}' declared shorter than its data type", schema.key);
            return Ok(Vec::new());
        };

        match (schema.transform, &schema.lookup_table) {
            (Transform::BitFlags, Some(table)) => Ok(table
                .iter()
                .map(|(flag, name)| (name.to_string(), Value::Bool((raw & flag) != 0)))
                .collect()),
            (Transform::BitFlags, None) => Ok(Vec::new()),
            (Transform::None, Some(table)) => match table.get(raw) {
                Some(label) => Ok(vec![(schema.key.clone(), Value::Text(label.to_string()))]),
                None => Err(FieldDecodeError::MissingLookup {
                    key: schema.key.clone(),
                    raw,
                }),
            },
            (Transform::None, None) => {
                let value = match schema.unit_scale {
                    Some(scale) => Value::Float(apply_scale(raw, scale)),
                    None => Value::Int(raw),
                };
                Ok(vec![(schema.key.clone(), value)])
            }
        }
    }
}

/// Decode a numeric register value. Returns `None` for strings or when too
/// few words are supplied.
///
/// 32-bit values are composed low word first: `[lo, hi]` → `(hi << 16) | lo`.
pub fn decode_integer(words: &[u16], data_type: DataType) -> Option<i64> {
    match data_type {
        DataType::U16 => words.first().map(|&w| i64::from(w)),
        DataType::S16 => words.first().map(|&w| i64::from(reg_to_i16(w))),
        DataType::U32 => pair(words).map(|regs| i64::from(regs_to_u32(&regs, REGISTER_WORD_ORDER))),
        DataType::S32 => pair(words).map(|regs| i64::from(regs_to_i32(&regs, REGISTER_WORD_ORDER))),
        DataType::Utf8 => None,
    }
}

/// Multiply by the unit scale and round to one decimal.
#[inline]
pub fn apply_scale(raw: i64, scale: f64) -> f64 {
    let factor = 10f64.powi(SCALE_DECIMALS);
    (raw as f64 * scale * factor).round() / factor
}

#[inline]
fn pair(words: &[u16]) -> Option<[u16; 2]> {
    match words {
        [lo, hi, ..] => Some([*lo, *hi]),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
