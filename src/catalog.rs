//! # Device Catalog
//!
//! Static mapping from a discovered device-type code to the model descriptor
//! that drives scanning: topology, register schema set, scan plans and the
//! sub-component bounds.
//!
//! The catalog is built once at start-up and only read afterwards, so it can be
//! shared behind an `Arc` without locking.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::derived::DerivedField;
use crate::device_limits::DeviceLimits;
use crate::error::ConfigError;
use crate::plan::{ScanPlan, ScanWindow};
use crate::schema::{RegisterSchema, Transform};

/// Power-conversion topology of a device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Topology {
    /// Inverter with an attached battery; scans the battery-status bank
    Hybrid,
    /// PV string inverter without storage
    StringOnly,
}

impl Topology {
    #[inline]
    pub fn has_battery(&self) -> bool {
        matches!(self, Topology::Hybrid)
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Hybrid => f.write_str("hybrid"),
            Topology::StringOnly => f.write_str("string"),
        }
    }
}

/// Register schemas, scan plans and derived fields shared by one or more models.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SchemaSet {
    /// Flat field list; group families are already expanded
    pub schemas: Vec<RegisterSchema>,
    /// Windows scanned on every device
    pub plan: ScanPlan,
    /// Battery-status windows, scanned on hybrid devices only
    #[cfg_attr(feature = "serde", serde(default))]
    pub battery_plan: ScanPlan,
    #[cfg_attr(feature = "serde", serde(default))]
    pub derived: Vec<DerivedField>,
}

impl SchemaSet {
    pub fn new(schemas: Vec<RegisterSchema>, plan: ScanPlan) -> Self {
        Self {
            schemas,
            plan,
            battery_plan: ScanPlan::new(),
            derived: Vec::new(),
        }
    }

    pub fn with_battery_plan(mut self, plan: ScanPlan) -> Self {
        self.battery_plan = plan;
        self
    }

    pub fn with_derived(mut self, field: DerivedField) -> Self {
        self.derived.push(field);
        self
    }

    /// Plans to run for a topology, in scan order.
    pub fn plans_for(&self, topology: Topology) -> Vec<&ScanPlan> {
        let mut plans = vec![&self.plan];
        if topology.has_battery() && !self.battery_plan.is_empty() {
            plans.push(&self.battery_plan);
        }
        plans
    }

    /// Check the static invariants of the configuration:
    /// windows within device limits, valid addresses, every field covered by
    /// some window, unique output keys.
    pub fn validate(&self, limits: &DeviceLimits) -> Result<(), ConfigError> {
        self.plan.validate(limits)?;
        self.battery_plan.validate(limits)?;

        let mut seen = HashSet::new();
        for schema in &self.schemas {
            if schema.protocol_address().is_none() {
                return Err(ConfigError::InvalidAddress {
                    key: schema.key.clone(),
                    address: schema.address,
                });
            }
            if !self.plan.covers(schema) && !self.battery_plan.covers(schema) {
                return Err(ConfigError::UncoveredField {
                    key: schema.key.clone(),
                    bank: schema.bank,
                    address: schema.address,
                });
            }
            for key in output_keys(schema) {
                if !seen.insert(key.to_string()) {
                    return Err(ConfigError::DuplicateKey {
                        key: key.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Keys a schema can emit: its own key, or one per flag for bit-flag fields.
fn output_keys(schema: &RegisterSchema) -> Vec<&str> {
    match (schema.transform, &schema.lookup_table) {
        (Transform::BitFlags, Some(table)) => table.iter().map(|(_, name)| name).collect(),
        (Transform::BitFlags, None) => Vec::new(),
        (Transform::None, _) => vec![schema.key.as_str()],
    }
}

/// Secondary read that discovers how many sub-components are attached.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ComponentProbe {
    pub window: ScanWindow,
    /// Numeric field holding the component count
    pub schema: RegisterSchema,
}

impl ComponentProbe {
    pub fn new(window: ScanWindow, schema: RegisterSchema) -> Self {
        Self { window, schema }
    }
}

/// Catalog descriptor of one device model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CatalogEntry {
    pub device_code: u16,
    pub name: String,
    pub topology: Topology,
    /// Sub-component count used when no probe is configured
    pub component_count: u32,
    /// Upper bound applied to a probed count
    pub max_components: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub component_probe: Option<ComponentProbe>,
    pub schema_set: Arc<SchemaSet>,
}

impl CatalogEntry {
    pub fn new(
        device_code: u16,
        name: impl Into<String>,
        topology: Topology,
        schema_set: Arc<SchemaSet>,
    ) -> Self {
        Self {
            device_code,
            name: name.into(),
            topology,
            component_count: 0,
            max_components: 0,
            component_probe: None,
            schema_set,
        }
    }

    /// Fixed sub-component count.
    pub fn with_components(mut self, count: u32) -> Self {
        self.component_count = count;
        self.max_components = self.max_components.max(count);
        self
    }

    /// Discover the sub-component count at identification, bounded by `max`.
    pub fn with_component_probe(mut self, probe: ComponentProbe, max: u32) -> Self {
        self.component_probe = Some(probe);
        self.max_components = max;
        self
    }
}

/// Fixed bootstrap scan used to identify the attached device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IdentificationPlan {
    pub plan: ScanPlan,
    /// Universally applicable fields only
    pub schemas: Vec<RegisterSchema>,
    pub device_code_key: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub serial_key: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub nominal_output_key: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub firmware_key: Option<String>,
}

impl IdentificationPlan {
    pub fn new(plan: ScanPlan, schemas: Vec<RegisterSchema>, device_code_key: impl Into<String>) -> Self {
        Self {
            plan,
            schemas,
            device_code_key: device_code_key.into(),
            serial_key: None,
            nominal_output_key: None,
            firmware_key: None,
        }
    }

    pub fn with_serial_key(mut self, key: impl Into<String>) -> Self {
        self.serial_key = Some(key.into());
        self
    }

    pub fn with_nominal_output_key(mut self, key: impl Into<String>) -> Self {
        self.nominal_output_key = Some(key.into());
        self
    }

    pub fn with_firmware_key(mut self, key: impl Into<String>) -> Self {
        self.firmware_key = Some(key.into());
        self
    }
}

/// Lookup table from device-type code to model descriptor.
#[derive(Debug, Clone)]
pub struct DeviceCatalog {
    identification: IdentificationPlan,
    entries: HashMap<u16, CatalogEntry>,
}

impl DeviceCatalog {
    pub fn new(identification: IdentificationPlan) -> Self {
        Self {
            identification,
            entries: HashMap::new(),
        }
    }

    /// Add a model. A later entry with the same code replaces the earlier one.
    pub fn with_entry(mut self, entry: CatalogEntry) -> Self {
        self.entries.insert(entry.device_code, entry);
        self
    }

    #[inline]
    pub fn identification(&self) -> &IdentificationPlan {
        &self.identification
    }

    #[inline]
    pub fn lookup(&self, device_code: u16) -> Option<&CatalogEntry> {
        self.entries.get(&device_code)
    }

    /// Supported device codes, ascending.
    pub fn codes(&self) -> Vec<u16> {
        let mut codes: Vec<u16> = self.entries.keys().copied().collect();
        codes.sort_unstable();
        codes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate the identification plan and every model's schema set.
    pub fn validate(&self, limits: &DeviceLimits) -> Result<(), ConfigError> {
        let identification = &self.identification;
        identification.plan.validate(limits)?;
        for schema in &identification.schemas {
            if !identification.plan.covers(schema) {
                return Err(ConfigError::UncoveredField {
                    key: schema.key.clone(),
                    bank: schema.bank,
                    address: schema.address,
                });
            }
        }

        for code in self.codes() {
            if let Some(entry) = self.entries.get(&code) {
                entry.schema_set.validate(limits)?;
                if let Some(probe) = &entry.component_probe {
                    ScanPlan::from(vec![probe.window]).validate(limits)?;
                    if !probe.window.contains(&probe.schema) {
                        return Err(ConfigError::UncoveredField {
                            key: probe.schema.key.clone(),
                            bank: probe.schema.bank,
                            address: probe.schema.address,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Identified device: catalog descriptor plus the values read from the device.
///
/// Immutable after identification and shared across update cycles.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceModel {
    pub device_code: u16,
    pub name: String,
    pub topology: Topology,
    /// Attached sub-components; bounds `group_index` fields
    pub component_count: u32,
    /// Nominal output rating as reported by the device
    pub nominal_output: Option<f64>,
    pub serial: Option<String>,
    pub firmware: Option<String>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub schema_set: Arc<SchemaSet>,
}

impl DeviceModel {
    /// Model for a catalog entry with the given sub-component count.
    pub fn from_entry(entry: &CatalogEntry, component_count: u32) -> Self {
        Self {
            device_code: entry.device_code,
            name: entry.name.clone(),
            topology: entry.topology,
            component_count,
            nominal_output: None,
            serial: None,
            firmware: None,
            schema_set: Arc::clone(&entry.schema_set),
        }
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:#06x}, {}, {} components)",
            self.name, self.device_code, self.topology, self.component_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BankKind, DataType, LookupTable};

    fn u16_field(key: &str, address: u16) -> RegisterSchema {
        RegisterSchema::new(key, BankKind::Input, address, DataType::U16)
    }

    fn identification() -> IdentificationPlan {
        IdentificationPlan::new(
            ScanPlan::from(vec![ScanWindow::input(4999, 1)]),
            vec![u16_field("device_type_code", 5000)],
            "device_type_code",
        )
    }

    #[test]
    fn test_plans_for_topology() {
        let set = SchemaSet::new(vec![], ScanPlan::from(vec![ScanWindow::input(0, 10)]))
            .with_battery_plan(ScanPlan::from(vec![ScanWindow::input(100, 10)]));

        assert_eq!(set.plans_for(Topology::Hybrid).len(), 2);
        assert_eq!(set.plans_for(Topology::StringOnly).len(), 1);

        let without_battery = SchemaSet::new(vec![], ScanPlan::new());
        assert_eq!(without_battery.plans_for(Topology::Hybrid).len(), 1);
    }

    #[test]
    fn test_validate_detects_uncovered_field() {
        let set = SchemaSet::new(
            vec![u16_field("a", 1), u16_field("b", 20)],
            ScanPlan::from(vec![ScanWindow::input(0, 10)]),
        );
        assert_eq!(
            set.validate(&DeviceLimits::new()),
            Err(ConfigError::UncoveredField {
                key: "b".to_string(),
                bank: BankKind::Input,
                address: 20
            })
        );
    }

    #[test]
    fn test_validate_detects_duplicate_flag_key() {
        let flags: LookupTable = [(1, "grid_fault"), (2, "a")].into_iter().collect();
        let set = SchemaSet::new(
            vec![
                u16_field("a", 1),
                u16_field("faults", 2).with_bit_flags(flags),
            ],
            ScanPlan::from(vec![ScanWindow::input(0, 10)]),
        );
        assert_eq!(
            set.validate(&DeviceLimits::new()),
            Err(ConfigError::DuplicateKey {
                key: "a".to_string()
            })
        );
    }

    #[test]
    fn test_validate_rejects_address_zero() {
        let set = SchemaSet::new(
            vec![u16_field("zero", 0)],
            ScanPlan::from(vec![ScanWindow::input(0, 10)]),
        );
        assert!(matches!(
            set.validate(&DeviceLimits::new()),
            Err(ConfigError::InvalidAddress { address: 0, .. })
        ));
    }

    #[test]
    fn test_battery_plan_covers_battery_fields() {
        let set = SchemaSet::new(
            vec![u16_field("pv", 1), u16_field("battery_soc", 101)],
            ScanPlan::from(vec![ScanWindow::input(0, 10)]),
        )
        .with_battery_plan(ScanPlan::from(vec![ScanWindow::input(100, 10)]));
        assert_eq!(set.validate(&DeviceLimits::new()), Ok(()));
    }

    #[test]
    fn test_catalog_lookup() {
        let set = Arc::new(SchemaSet::default());
        let catalog = DeviceCatalog::new(identification())
            .with_entry(CatalogEntry::new(0x0d0f, "SH5.0RT", Topology::Hybrid, Arc::clone(&set)).with_components(2))
            .with_entry(CatalogEntry::new(0x0d06, "SG5.0RT", Topology::StringOnly, set));

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.codes(), vec![0x0d06, 0x0d0f]);
        assert_eq!(catalog.lookup(0x0d0f).map(|e| e.name.as_str()), Some("SH5.0RT"));
        assert!(catalog.lookup(0x1234).is_none());
        assert_eq!(catalog.validate(&DeviceLimits::new()), Ok(()));
    }

    #[test]
    fn test_catalog_validate_checks_probe() {
        let probe = ComponentProbe::new(ScanWindow::input(0, 1), u16_field("mppt_count", 5));
        let catalog = DeviceCatalog::new(identification()).with_entry(
            CatalogEntry::new(1, "X", Topology::StringOnly, Arc::new(SchemaSet::default()))
                .with_component_probe(probe, 4),
        );
        assert!(matches!(
            catalog.validate(&DeviceLimits::new()),
            Err(ConfigError::UncoveredField { .. })
        ));
    }

    #[test]
    fn test_device_model_from_entry() {
        let entry = CatalogEntry::new(0x0d0f, "SH5.0RT", Topology::Hybrid, Arc::new(SchemaSet::default()))
            .with_components(2);
        let model = DeviceModel::from_entry(&entry, 2);
        assert_eq!(model.device_code, 0x0d0f);
        assert_eq!(model.to_string(), "SH5.0RT (0x0d0f, hybrid, 2 components)");
        assert_eq!(model, DeviceModel::from_entry(&entry, 2));
    }
}
