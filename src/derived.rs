//! Composite fields computed from decoded values after a cycle's merge.
//!
//! Derivation never fails a cycle: if a component is missing or out of range
//! the composite field is left out of the snapshot.

use chrono::NaiveDate;
use tracing::trace;

use crate::value::{FieldMap, Value};

/// A field assembled from other decoded fields.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "kind", rename_all = "snake_case")
)]
pub enum DerivedField {
    /// Device clock split over six registers
    Timestamp {
        key: String,
        year: String,
        month: String,
        day: String,
        hour: String,
        minute: String,
        second: String,
    },
}

impl DerivedField {
    /// Timestamp from `[year, month, day, hour, minute, second]` field keys.
    ///
    /// ```rust
    /// use voltage_regmap::{DerivedField, FieldMap, Value};
    ///
    /// let clock = DerivedField::timestamp(
    ///     "device_time",
    ///     ["year", "month", "day", "hour", "minute", "second"],
    /// );
    /// let mut fields = FieldMap::new();
    /// for (key, v) in [("year", 2024), ("month", 6), ("day", 1), ("hour", 12), ("minute", 30), ("second", 5)] {
    ///     fields.insert(key.to_string(), Value::Int(v));
    /// }
    /// assert_eq!(clock.evaluate(&fields).unwrap().to_string(), "2024-06-01 12:30:05");
    /// ```
    pub fn timestamp(key: impl Into<String>, parts: [&str; 6]) -> Self {
        let [year, month, day, hour, minute, second] = parts.map(str::to_string);
        DerivedField::Timestamp {
            key: key.into(),
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Output key.
    pub fn key(&self) -> &str {
        match self {
            DerivedField::Timestamp { key, .. } => key,
        }
    }

    /// Compute the value, `None` if any input is missing or invalid.
    pub fn evaluate(&self, fields: &FieldMap) -> Option<Value> {
        match self {
            DerivedField::Timestamp {
                year,
                month,
                day,
                hour,
                minute,
                second,
                ..
            } => {
                let part = |key: &String| fields.get(key).and_then(Value::as_i64);
                let mut year = i32::try_from(part(year)?).ok()?;
                // two-digit device years are offsets from 2000
                if (0..100).contains(&year) {
                    year += 2000;
                }
                let date = NaiveDate::from_ymd_opt(
                    year,
                    u32::try_from(part(month)?).ok()?,
                    u32::try_from(part(day)?).ok()?,
                )?;
                let time = date.and_hms_opt(
                    u32::try_from(part(hour)?).ok()?,
                    u32::try_from(part(minute)?).ok()?,
                    u32::try_from(part(second)?).ok()?,
                )?;
                Some(Value::Timestamp(time))
            }
        }
    }
}

/// Evaluate every derived field and insert the ones that resolve.
pub fn apply_derived(fields: &mut FieldMap, derived: &[DerivedField]) {
    for field in derived {
        match field.evaluate(fields) {
            Some(value) => {
                fields.insert(field.key().to_string(), value);
            }
            None => trace!("Derived field '{}' omitted", field.key()),
        }
    }
}
